use std::fmt;
use std::path::PathBuf;

use image::{ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};

/// Bytes per RGB24 pixel
pub const BYTES_PER_PIXEL: usize = 3;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both dimensions down to the nearest even value (minimum 2)
    pub fn even(self) -> Self {
        Self {
            width: (self.width & !1).max(2),
            height: (self.height & !1).max(2),
        }
    }

    /// Size in bytes of one RGB24 frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            width: self.width.saturating_mul(factor),
            height: self.height.saturating_mul(factor),
        }
    }

    /// True when either side exceeds `limit`
    pub fn exceeds(&self, limit: u32) -> bool {
        self.width > limit || self.height > limit
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Exact frame rate as a reduced fraction
///
/// Kept rational end to end so NTSC rates such as 30000/1001 reach the
/// encoder unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    num: u64,
    den: u64,
}

impl FrameRate {
    /// `num/den` in lowest terms; `None` unless both are positive
    pub fn new(num: u64, den: u64) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        let divisor = gcd(num, den);
        Some(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    /// A whole number of frames per second
    pub const fn whole(fps: u64) -> Self {
        Self { num: fps, den: 1 }
    }

    /// Parse ffprobe's "30000/1001" as well as plain "25" or "23.976"
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some((num, den)) = value.split_once('/') {
            return Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?);
        }
        if let Ok(whole) = value.parse::<u64>() {
            return Self::new(whole, 1);
        }

        let fps = value.parse::<f64>().ok()?;
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        Self::new((fps * 1000.0).round() as u64, 1000)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Rate of a stream with `factor` times as many frames over the same duration
    pub fn multiplied(self, factor: u64) -> Self {
        Self::new(self.num.saturating_mul(factor.max(1)), self.den).unwrap_or(self)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// One decoded RGB24 frame
///
/// Frames travel between pipeline stages by value. The buffer is always
/// exactly `width * height * 3` bytes, row-major, no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    geometry: FrameGeometry,
    data: Vec<u8>,
}

impl RawFrame {
    /// Wrap raw bytes, rejecting buffers of the wrong length
    pub fn from_bytes(geometry: FrameGeometry, data: Vec<u8>) -> Option<Self> {
        if data.len() != geometry.frame_size() {
            return None;
        }
        Some(Self { geometry, data })
    }

    /// Create a frame filled with the specified color
    pub fn filled(geometry: FrameGeometry, color: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(geometry.frame_size());
        for _ in 0..geometry.pixel_count() {
            data.extend_from_slice(&color);
        }
        Self { geometry, data }
    }

    pub fn black(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.frame_size()],
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get a pixel at the given coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = self.offset(x, y);
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let offset = self.offset(x, y);
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color);
    }

    /// Convert to an image buffer for use with `image::imageops`
    pub fn to_image(&self) -> RgbImage {
        // Length is checked at construction, so from_raw cannot fail here
        ImageBuffer::from_raw(self.geometry.width, self.geometry.height, self.data.clone())
            .unwrap_or_else(|| ImageBuffer::new(self.geometry.width, self.geometry.height))
    }

    pub fn from_image(image: RgbImage) -> Self {
        let geometry = FrameGeometry::new(image.width(), image.height());
        Self {
            geometry,
            data: image.into_raw(),
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.geometry.width as usize + x as usize) * BYTES_PER_PIXEL
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("geometry", &self.geometry)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl From<RgbImage> for RawFrame {
    fn from(image: RgbImage) -> Self {
        Self::from_image(image)
    }
}

/// Consecutive frames submitted to a transform in one call
#[derive(Debug, Clone, Default)]
pub struct FrameBatch {
    /// Stream index of the first frame
    pub first_index: u64,
    pub frames: Vec<RawFrame>,
}

impl FrameBatch {
    pub fn new(first_index: u64) -> Self {
        Self {
            first_index,
            frames: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: RawFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Stream index one past the last frame
    pub fn end_index(&self) -> u64 {
        self.first_index + self.frames.len() as u64
    }
}

/// Probed description of an input video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDescriptor {
    pub path: PathBuf,

    /// Geometry the decoder emits (even-rounded)
    pub geometry: FrameGeometry,

    /// Geometry as stored in the container
    pub source_geometry: FrameGeometry,

    pub frame_rate: FrameRate,

    /// Duration in seconds
    pub duration: f64,

    pub has_audio: bool,

    pub codec: Option<String>,

    /// Frame count reported by the container, when present
    pub frame_count: Option<u64>,
}

impl VideoDescriptor {
    /// Frame count estimate used for progress reporting
    ///
    /// Prefers the container's count; otherwise `floor(duration * fps)`.
    pub fn estimated_frames(&self) -> u64 {
        match self.frame_count {
            Some(count) if count > 0 => count,
            _ => {
                let estimate = (self.duration * self.frame_rate.as_f64()).floor();
                if estimate.is_finite() && estimate > 0.0 {
                    estimate as u64
                } else {
                    0
                }
            }
        }
    }

    /// True when the decoder must scale to reach the even geometry
    pub fn needs_scale(&self) -> bool {
        self.geometry != self.source_geometry
    }
}
