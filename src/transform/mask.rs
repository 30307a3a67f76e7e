//! Time-tagged rectangular mask regions for inpainting

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::video::types::FrameGeometry;

/// Fraction of the frame height covered by the default region
pub const DEFAULT_BOTTOM_FRACTION: f64 = 0.25;

/// A rectangle to inpaint, optionally limited to a time range
///
/// Coordinates are pixels with exclusive `right`/`bottom`. When
/// `reference_width`/`reference_height` are set, the rectangle was drawn on a
/// frame of that size and is rescaled to the decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,

    /// Seconds; region inactive before this time
    #[serde(default)]
    pub start_time: Option<f64>,

    /// Seconds; region inactive after this time
    #[serde(default)]
    pub end_time: Option<f64>,

    #[serde(default)]
    pub reference_width: Option<u32>,

    #[serde(default)]
    pub reference_height: Option<u32>,
}

impl MaskRegion {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            start_time: None,
            end_time: None,
            reference_width: None,
            reference_height: None,
        }
    }

    pub fn between(mut self, start_time: f64, end_time: f64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn drawn_on(mut self, reference: FrameGeometry) -> Self {
        self.reference_width = Some(reference.width);
        self.reference_height = Some(reference.height);
        self
    }

    /// Whether the region applies at `time` seconds (bounds inclusive)
    pub fn is_active_at(&self, time: f64) -> bool {
        self.start_time.map_or(true, |start| time >= start) && self.end_time.map_or(true, |end| time <= end)
    }

    /// Pixel rectangle on a frame of `geometry`, or `None` if it is empty
    pub fn resolve(&self, geometry: FrameGeometry) -> Option<PixelRect> {
        let scale_x = match self.reference_width {
            Some(w) if w > 0 && w != geometry.width => geometry.width as f64 / w as f64,
            _ => 1.0,
        };
        let scale_y = match self.reference_height {
            Some(h) if h > 0 && h != geometry.height => geometry.height as f64 / h as f64,
            _ => 1.0,
        };

        let scale = |value: u32, factor: f64| (value as f64 * factor) as u32;

        let rect = PixelRect {
            left: scale(self.left, scale_x).min(geometry.width.saturating_sub(1)),
            top: scale(self.top, scale_y).min(geometry.height.saturating_sub(1)),
            right: scale(self.right, scale_x).min(geometry.width),
            bottom: scale(self.bottom, scale_y).min(geometry.height),
        };

        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }
}

/// A clamped pixel rectangle, exclusive on the right and bottom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// The set of pixels to inpaint in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    geometry: FrameGeometry,
    rects: Vec<PixelRect>,
}

impl Mask {
    /// Mask for the frame at `time` seconds
    ///
    /// With no regions declared the bottom quarter of the frame is masked.
    /// With regions declared but none active at `time`, the mask is empty.
    pub fn for_time(geometry: FrameGeometry, regions: &[MaskRegion], time: f64) -> Self {
        if regions.is_empty() {
            return Self::default_region(geometry);
        }

        let rects = regions
            .iter()
            .filter(|region| region.is_active_at(time))
            .filter_map(|region| region.resolve(geometry))
            .collect();

        Self { geometry, rects }
    }

    pub fn default_region(geometry: FrameGeometry) -> Self {
        let top = (geometry.height as f64 * (1.0 - DEFAULT_BOTTOM_FRACTION)) as u32;
        let rect = PixelRect {
            left: 0,
            top,
            right: geometry.width,
            bottom: geometry.height,
        };
        Self {
            geometry,
            rects: if rect.is_empty() { Vec::new() } else { vec![rect] },
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn rects(&self) -> &[PixelRect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.rects.iter().any(|rect| rect.contains(x, y))
    }
}

/// Regions file layout: `[[regions]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionFile {
    #[serde(default)]
    pub regions: Vec<MaskRegion>,
}

impl RegionFile {
    /// Load regions from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let file: RegionFile = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HD: FrameGeometry = FrameGeometry { width: 1920, height: 1080 };

    #[test]
    fn test_default_region_is_bottom_quarter() {
        let mask = Mask::for_time(HD, &[], 3.0);
        assert_eq!(
            mask.rects(),
            &[PixelRect { left: 0, top: 810, right: 1920, bottom: 1080 }]
        );
        assert!(mask.contains(0, 1079));
        assert!(!mask.contains(0, 809));
    }

    #[test]
    fn test_time_range_selects_regions() {
        let regions = vec![
            MaskRegion::new(0, 0, 100, 100).between(0.0, 5.0),
            MaskRegion::new(200, 200, 300, 300).between(5.0, 10.0),
        ];

        assert_eq!(Mask::for_time(HD, &regions, 1.0).rects().len(), 1);
        // Both bounds are inclusive
        assert_eq!(Mask::for_time(HD, &regions, 5.0).rects().len(), 2);
        assert!(Mask::for_time(HD, &regions, 12.0).is_empty());
    }

    #[test]
    fn test_reference_rescaling_and_clamp() {
        let region = MaskRegion::new(100, 100, 5000, 400).drawn_on(FrameGeometry::new(960, 540));
        let rect = region.resolve(HD).unwrap();
        assert_eq!(rect, PixelRect { left: 200, top: 200, right: 1920, bottom: 800 });
    }

    #[test]
    fn test_empty_region_dropped() {
        assert!(MaskRegion::new(50, 50, 50, 80).resolve(HD).is_none());
        assert!(MaskRegion::new(100, 80, 50, 90).resolve(HD).is_none());
    }

    #[test]
    fn test_region_file() {
        let file: RegionFile = toml::from_str(
            r#"
            [[regions]]
            left = 0
            top = 900
            right = 1920
            bottom = 1080

            [[regions]]
            left = 10
            top = 10
            right = 200
            bottom = 60
            start_time = 2.5
            end_time = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(file.regions.len(), 2);
        assert!(!file.regions[1].is_active_at(1.0));
        assert!(file.regions[0].is_active_at(1.0));
    }

    #[test]
    fn test_region_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.toml");
        std::fs::write(&path, "[[regions]]\nleft = 0\ntop = 0\nright = 10\nbottom = 10\n").unwrap();
        assert_eq!(RegionFile::from_file(&path).unwrap().regions.len(), 1);
        assert!(RegionFile::from_file(dir.path().join("missing.toml")).is_err());
    }
}
