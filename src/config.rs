use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for reframe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations
    pub tools: ToolsConfig,

    /// Queueing, batching and timeout settings
    pub pipeline: PipelineConfig,

    /// Encoder selection and quality
    pub encoder: EncoderConfig,

    /// Decoder pre-filters
    pub decoder: DecoderConfig,

    /// Audio side-channel settings
    pub audio: AudioConfig,

    /// Output naming
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string(),
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.encoder.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Locations of the external decoder/encoder and probe binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Pipeline scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long the transform stage keeps collecting a partial batch (ms)
    pub batch_window_ms: u64,

    /// Poll interval for readers waiting on an empty queue (ms)
    pub queue_poll_ms: u64,

    /// Wait per retry when the encoder queue is full (ms)
    pub write_retry_wait_ms: u64,

    /// Number of full-queue retries before the encoder counts as stalled
    pub write_retry_budget: u32,

    /// Time between terminate and forceful kill (ms)
    pub process_grace_ms: u64,

    /// Bounded wait for the encoder to exit after end-of-stream (s)
    pub encoder_exit_timeout_secs: u64,

    /// Bounded wait for the decoder to exit after end-of-stream (s)
    pub decoder_exit_timeout_secs: u64,

    /// Timeout for ffprobe (s)
    pub probe_timeout_secs: u64,

    /// Timeout for one-shot tools: audio extraction and remux (s)
    pub tool_timeout_secs: u64,

    /// Per-item budget for the single-frame fallback path (s)
    pub fallback_frame_timeout_secs: u64,

    /// Override the computed batch size
    pub batch_size: Option<usize>,

    /// Override the computed queue depth
    pub queue_depth: Option<usize>,

    /// Worker threads for CPU transforms
    pub transform_threads: usize,

    /// Parent directory for per-job working directories (defaults to the output directory)
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 10,
            queue_poll_ms: 100,
            write_retry_wait_ms: 500,
            write_retry_budget: 120,
            process_grace_ms: 500,
            encoder_exit_timeout_secs: 120,
            decoder_exit_timeout_secs: 10,
            probe_timeout_secs: 10,
            tool_timeout_secs: 300,
            fallback_frame_timeout_secs: 30,
            batch_size: None,
            queue_depth: None,
            transform_threads: num_cpus::get(),
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn write_retry_wait(&self) -> Duration {
        Duration::from_millis(self.write_retry_wait_ms)
    }

    pub fn process_grace(&self) -> Duration {
        Duration::from_millis(self.process_grace_ms)
    }

    pub fn encoder_exit_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_exit_timeout_secs)
    }

    pub fn decoder_exit_timeout(&self) -> Duration {
        Duration::from_secs(self.decoder_exit_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn fallback_frame_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_frame_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        let non_zero = [
            ("pipeline.batch_window_ms", self.batch_window_ms),
            ("pipeline.queue_poll_ms", self.queue_poll_ms),
            ("pipeline.write_retry_wait_ms", self.write_retry_wait_ms),
            ("pipeline.write_retry_budget", u64::from(self.write_retry_budget)),
            ("pipeline.encoder_exit_timeout_secs", self.encoder_exit_timeout_secs),
            ("pipeline.decoder_exit_timeout_secs", self.decoder_exit_timeout_secs),
            ("pipeline.probe_timeout_secs", self.probe_timeout_secs),
            ("pipeline.tool_timeout_secs", self.tool_timeout_secs),
            ("pipeline.fallback_frame_timeout_secs", self.fallback_frame_timeout_secs),
            ("pipeline.transform_threads", self.transform_threads as u64),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(invalid(key, value).into());
            }
        }

        if self.batch_size == Some(0) {
            return Err(invalid("pipeline.batch_size", 0).into());
        }

        if self.queue_depth == Some(0) {
            return Err(invalid("pipeline.queue_depth", 0).into());
        }

        Ok(())
    }
}

/// Encoder selection and quality configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// CRF-style quality, 0 (lossless) to 51 (worst)
    pub quality: u8,

    /// Largest width or height the accelerator encoders accept
    pub accelerator_max_dimension: u32,

    /// Universal software fallback encoder
    pub software_encoder: String,

    /// Preset passed to the software encoder
    pub software_preset: String,

    /// Keyframe interval
    pub gop_size: u32,

    /// Allow accelerator encoders at all
    pub use_accelerator: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 20,
            accelerator_max_dimension: 4096,
            software_encoder: "libx264".to_string(),
            software_preset: "medium".to_string(),
            gop_size: 250,
            use_accelerator: true,
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<()> {
        if self.quality > 51 {
            return Err(invalid("encoder.quality", self.quality).into());
        }

        if self.accelerator_max_dimension < 2 {
            return Err(invalid("encoder.accelerator_max_dimension", self.accelerator_max_dimension).into());
        }

        if self.software_encoder.trim().is_empty() {
            return Err(ConfigError::MissingKey { key: "encoder.software_encoder".to_string() }.into());
        }

        if self.gop_size == 0 {
            return Err(invalid("encoder.gop_size", self.gop_size).into());
        }

        Ok(())
    }
}

/// Decoder pre-filter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Run a de-interlacing filter before frames reach the transform
    pub deinterlace: bool,

    /// Hardware decode acceleration passed as `-hwaccel`
    pub hwaccel: Option<String>,
}

/// Audio side-channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Carry the source audio into the output
    pub enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Output naming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory; `None` writes next to each input
    pub directory: Option<PathBuf>,

    /// Container extension override; `None` keeps the input's extension
    pub container: Option<String>,

    pub enhance_suffix: String,
    pub interpolate_suffix: String,
    pub inpaint_suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            container: None,
            enhance_suffix: "enhanced".to_string(),
            interpolate_suffix: "interpolated".to_string(),
            inpaint_suffix: "inpainted".to_string(),
        }
    }
}

impl OutputConfig {
    /// Filename suffix for a transform name
    pub fn suffix_for<'a>(&'a self, transform: &'a str) -> &'a str {
        match transform {
            "enhance" => &self.enhance_suffix,
            "interpolate" => &self.interpolate_suffix,
            "inpaint" => &self.inpaint_suffix,
            other => other,
        }
    }

    /// Output path for an input: `{stem}_{suffix}.{ext}`
    pub fn output_path_for(&self, input: &Path, transform: &str) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let extension = self
            .container
            .as_deref()
            .or_else(|| input.extension().and_then(|e| e.to_str()))
            .unwrap_or("mp4");
        let file_name = format!("{}_{}.{}", stem, self.suffix_for(transform), extension);

        match &self.directory {
            Some(dir) => dir.join(file_name),
            None => input.with_file_name(file_name),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(container) = &self.container {
            if container.is_empty() || container.contains(['.', '/', '\\']) {
                return Err(invalid("output.container", container).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.encoder.quality = 28;
        original_config.pipeline.batch_size = Some(6);

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded_config.encoder.quality, 28);
        assert_eq!(loaded_config.pipeline.batch_size, Some(6));
        assert_eq!(loaded_config.pipeline.queue_depth, None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[encoder]\nquality = 30\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.encoder.quality, 30);
        assert_eq!(config.encoder.accelerator_max_dimension, 4096);
        assert_eq!(config.pipeline.batch_window_ms, 10);
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = Config::default();
        config.encoder.quality = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let mut config = Config::default();
        config.pipeline.write_retry_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_naming() {
        let output = OutputConfig::default();
        let path = output.output_path_for(Path::new("/videos/clip.mkv"), "interpolate");
        assert_eq!(path, PathBuf::from("/videos/clip_interpolated.mkv"));

        let output = OutputConfig {
            directory: Some(PathBuf::from("/out")),
            container: Some("mp4".to_string()),
            ..OutputConfig::default()
        };
        let path = output.output_path_for(Path::new("/videos/clip.mkv"), "enhance");
        assert_eq!(path, PathBuf::from("/out/clip_enhanced.mp4"));
    }

    #[test]
    fn test_custom_transform_suffix_is_its_name() {
        let output = OutputConfig::default();
        let name = String::from("denoise");
        assert_eq!(output.suffix_for(&name), "denoise");
        assert_eq!(output.suffix_for("inpaint"), "inpainted");

        let path = output.output_path_for(Path::new("clip.mp4"), &name);
        assert_eq!(path, PathBuf::from("clip_denoise.mp4"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not/here.toml"));
    }
}
