//! Encoder selection and per-encoder quality arguments

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::video::types::FrameGeometry;

/// Accelerator encoders in preference order
pub const ACCELERATOR_PRIORITY: &[&str] = &[
    "h264_nvenc",
    "hevc_nvenc",
    "h264_amf",
    "hevc_amf",
    "h264_qsv",
    "hevc_qsv",
    "h264_videotoolbox",
];

/// Source of usable accelerator encoder identifiers
///
/// The pipeline only consumes the returned list; how availability is
/// determined is up to the implementation.
pub trait EncoderCapabilities: Send + Sync {
    /// Usable accelerator encoders, best first
    fn accelerated_encoders(&self) -> Vec<String>;
}

/// Fixed list of encoders, for tests and `--encoder` overrides
#[derive(Debug, Clone, Default)]
pub struct StaticEncoders(pub Vec<String>);

impl EncoderCapabilities for StaticEncoders {
    fn accelerated_encoders(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Detects accelerator encoders compiled into the local ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegEncoderProbe {
    available: Vec<String>,
}

impl FfmpegEncoderProbe {
    /// Run `ffmpeg -encoders` once and remember the result
    pub async fn detect(ffmpeg: &Path, timeout: Duration) -> Self {
        let mut command = Command::new(ffmpeg);
        command
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match command.spawn() {
            Ok(child) => tokio::time::timeout(timeout, child.wait_with_output()).await,
            Err(e) => {
                warn!("Could not query encoders from {}: {}", ffmpeg.display(), e);
                return Self { available: Vec::new() };
            }
        };

        let available = match output {
            Ok(Ok(output)) if output.status.success() => {
                parse_encoder_list(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                warn!("Encoder query exited with {}", output.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!("Encoder query failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!("Encoder query timed out after {:?}", timeout);
                Vec::new()
            }
        };

        if available.is_empty() {
            info!("No accelerator encoders detected; using software encoding");
        } else {
            info!("Accelerator encoders available: {}", available.join(", "));
        }
        Self { available }
    }
}

impl EncoderCapabilities for FfmpegEncoderProbe {
    fn accelerated_encoders(&self) -> Vec<String> {
        self.available.clone()
    }
}

/// Pick the known accelerator encoders out of `ffmpeg -encoders` output
pub fn parse_encoder_list(listing: &str) -> Vec<String> {
    let listed: Vec<&str> = listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            // Video encoder rows start with a "V....." flag column
            if flags.starts_with('V') && flags.len() == 6 {
                Some(name)
            } else {
                None
            }
        })
        .collect();

    ACCELERATOR_PRIORITY
        .iter()
        .filter(|candidate| listed.contains(*candidate))
        .map(|s| s.to_string())
        .collect()
}

/// Encoder family, which determines the quality flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFamily {
    Nvenc,
    Amf,
    Qsv,
    VideoToolbox,
    X26x,
    Other,
}

impl EncoderFamily {
    pub fn of(encoder: &str) -> Self {
        if encoder.ends_with("_nvenc") {
            Self::Nvenc
        } else if encoder.ends_with("_amf") {
            Self::Amf
        } else if encoder.ends_with("_qsv") {
            Self::Qsv
        } else if encoder.ends_with("_videotoolbox") {
            Self::VideoToolbox
        } else if encoder == "libx264" || encoder == "libx265" {
            Self::X26x
        } else {
            Self::Other
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Nvenc | Self::Amf | Self::Qsv | Self::VideoToolbox)
    }
}

/// The encoder chosen for one job
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderChoice {
    pub encoder: String,
    pub family: EncoderFamily,

    /// Set when an accelerator was available but could not be used
    pub degraded: Option<String>,
}

impl EncoderChoice {
    pub fn is_accelerated(&self) -> bool {
        self.family.is_accelerated()
    }

    /// Quality and rate-control flags for this encoder
    pub fn quality_args(&self, config: &EncoderConfig) -> Vec<String> {
        let quality = config.quality.to_string();
        let q = quality.as_str();
        let vt_quality = videotoolbox_quality(config.quality).to_string();
        let args: Vec<&str> = match self.family {
            EncoderFamily::Nvenc => vec!["-cq", q, "-preset", "p4", "-bf", "0"],
            EncoderFamily::Amf => vec!["-quality", "balanced", "-rc", "cqp", "-qp_i", q, "-qp_p", q],
            EncoderFamily::Qsv => vec!["-global_quality", q],
            EncoderFamily::VideoToolbox => vec!["-q:v", vt_quality.as_str()],
            EncoderFamily::X26x => vec!["-crf", q, "-preset", config.software_preset.as_str(), "-bf", "0"],
            EncoderFamily::Other => vec!["-crf", q],
        };
        args.into_iter().map(String::from).collect()
    }
}

/// Map a CRF-style value (0 best, 51 worst) onto VideoToolbox's `-q:v` (1 worst, 100 best)
fn videotoolbox_quality(crf: u8) -> u8 {
    let scaled = 100.0 - f64::from(crf.min(51)) * 99.0 / 51.0;
    scaled.round() as u8
}

/// Choose an encoder for `target`
///
/// Targets larger than `accelerator_max_dimension` in either axis always get
/// the software encoder, with a degraded notice when an accelerator was
/// otherwise available.
pub fn select_encoder(candidates: &[String], target: FrameGeometry, config: &EncoderConfig) -> EncoderChoice {
    let software = || EncoderChoice {
        encoder: config.software_encoder.clone(),
        family: EncoderFamily::of(&config.software_encoder),
        degraded: None,
    };

    if !config.use_accelerator {
        debug!("Accelerator encoders disabled by configuration");
        return software();
    }

    let Some(best) = candidates.first() else {
        return software();
    };

    if target.exceeds(config.accelerator_max_dimension) {
        let notice = format!(
            "output {} exceeds the accelerator limit of {}; encoding with {} instead of {}",
            target, config.accelerator_max_dimension, config.software_encoder, best
        );
        warn!("{}", notice);
        return EncoderChoice {
            degraded: Some(notice),
            ..software()
        };
    }

    EncoderChoice {
        encoder: best.clone(),
        family: EncoderFamily::of(best),
        degraded: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nvenc() -> Vec<String> {
        vec!["h264_nvenc".to_string(), "hevc_nvenc".to_string()]
    }

    #[test]
    fn test_accelerator_preferred() {
        let choice = select_encoder(&nvenc(), FrameGeometry::new(1920, 1080), &EncoderConfig::default());
        assert_eq!(choice.encoder, "h264_nvenc");
        assert!(choice.is_accelerated());
        assert!(choice.degraded.is_none());
    }

    #[test]
    fn test_oversize_forces_software() {
        let config = EncoderConfig::default();
        for target in [FrameGeometry::new(4098, 1000), FrameGeometry::new(1000, 4098), FrameGeometry::new(7680, 4320)] {
            let choice = select_encoder(&nvenc(), target, &config);
            assert_eq!(choice.encoder, "libx264");
            assert!(!choice.is_accelerated());
            assert!(choice.degraded.is_some());
        }

        let choice = select_encoder(&nvenc(), FrameGeometry::new(4096, 4096), &config);
        assert!(choice.is_accelerated());
    }

    #[test]
    fn test_no_candidates_is_not_degraded() {
        let choice = select_encoder(&[], FrameGeometry::new(8192, 8192), &EncoderConfig::default());
        assert_eq!(choice.encoder, "libx264");
        assert!(choice.degraded.is_none());
    }

    #[test]
    fn test_accelerator_disabled() {
        let config = EncoderConfig {
            use_accelerator: false,
            ..EncoderConfig::default()
        };
        let choice = select_encoder(&nvenc(), FrameGeometry::new(640, 360), &config);
        assert_eq!(choice.encoder, "libx264");
    }

    #[test]
    fn test_quality_args() {
        let config = EncoderConfig::default();
        let x264 = select_encoder(&[], FrameGeometry::new(640, 360), &config);
        assert_eq!(x264.quality_args(&config), ["-crf", "20", "-preset", "medium", "-bf", "0"]);

        let amf = EncoderChoice {
            encoder: "h264_amf".into(),
            family: EncoderFamily::of("h264_amf"),
            degraded: None,
        };
        assert!(amf.quality_args(&config).windows(2).any(|w| w == ["-rc", "cqp"]));

        let videotoolbox = EncoderChoice {
            encoder: "h264_videotoolbox".into(),
            family: EncoderFamily::of("h264_videotoolbox"),
            degraded: None,
        };
        assert_eq!(videotoolbox.quality_args(&config), ["-q:v", "61"]);
        let best = EncoderConfig {
            quality: 0,
            ..EncoderConfig::default()
        };
        assert_eq!(videotoolbox.quality_args(&best), ["-q:v", "100"]);
        let worst = EncoderConfig {
            quality: 51,
            ..EncoderConfig::default()
        };
        assert_eq!(videotoolbox.quality_args(&worst), ["-q:v", "1"]);

        assert_eq!(EncoderFamily::of("hevc_qsv"), EncoderFamily::Qsv);
        assert_eq!(EncoderFamily::of("libsvtav1"), EncoderFamily::Other);
    }

    #[test]
    fn test_parse_encoder_list() {
        let listing = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D hevc_nvenc           NVIDIA NVENC hevc encoder (codec hevc)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";
        assert_eq!(parse_encoder_list(listing), ["h264_nvenc", "hevc_nvenc"]);
    }
}
