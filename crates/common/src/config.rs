//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CamcordError, CamcordResult};

/// File name of the recorded container inside the output directory.
pub const OUTPUT_FILE_NAME: &str = "h264.mp4";

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// App-private storage directory the container file is written to.
    pub output_dir: PathBuf,

    /// Encoder and capture defaults.
    pub recording: RecordingDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDefaults {
    /// Encoder MIME type.
    pub mime_type: String,

    /// Encoder input width. Fixed for the lifetime of the encoder.
    pub width: u32,

    /// Encoder input height.
    pub height: u32,

    /// Target bit rate in bits per second.
    pub bit_rate: u32,

    /// Target frame rate.
    pub frame_rate: u32,

    /// Seconds between key frames.
    pub key_frame_interval_secs: u32,

    /// Upper bound on the larger dimension of the capture size.
    pub max_capture_dimension: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "camcord=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Parameters handed to the hardware encoder at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
}

impl EncoderConfig {
    /// Reject configurations no encoder could accept.
    pub fn validate(&self) -> CamcordResult<()> {
        if self.mime_type.trim().is_empty() {
            return Err(CamcordError::invalid_argument("Encoder MIME type is empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CamcordError::invalid_argument(format!(
                "Encoder size {}x{} has a zero dimension",
                self.width, self.height
            )));
        }
        if self.bit_rate == 0 {
            return Err(CamcordError::invalid_argument("Encoder bit rate is zero"));
        }
        if self.frame_rate == 0 {
            return Err(CamcordError::invalid_argument("Encoder frame rate is zero"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            recording: RecordingDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            mime_type: "video/avc".to_string(),
            width: 1440,
            height: 1080,
            bit_rate: 125_000,
            frame_rate: 30,
            key_frame_interval_secs: 5,
            max_capture_dimension: 1080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            mime_type: self.mime_type.clone(),
            width: self.width,
            height: self.height,
            bit_rate: self.bit_rate,
            frame_rate: self.frame_rate,
            key_frame_interval_secs: self.key_frame_interval_secs,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Path of the single container file recordings are muxed into.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_FILE_NAME)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("camcord").join("config.json")
}

/// Default app-private output directory.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("camcord")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_uses_fixed_file_name() {
        let config = AppConfig {
            output_dir: PathBuf::from("/data/app"),
            ..AppConfig::default()
        };
        assert_eq!(config.output_path(), PathBuf::from("/data/app/h264.mp4"));
    }

    #[test]
    fn default_encoder_config_is_valid() {
        let encoder = RecordingDefaults::default().encoder_config();
        assert_eq!(encoder.mime_type, "video/avc");
        assert_eq!((encoder.width, encoder.height), (1440, 1080));
        assert_eq!(encoder.bit_rate, 125_000);
        assert!(encoder.validate().is_ok());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut encoder = RecordingDefaults::default().encoder_config();
        encoder.height = 0;
        let err = encoder.validate().unwrap_err();
        assert!(matches!(err, CamcordError::InvalidArgument { .. }));
    }

    #[test]
    fn config_survives_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recording.frame_rate, 30);
        assert_eq!(parsed.recording.max_capture_dimension, 1080);
        assert_eq!(parsed.output_dir, config.output_dir);
    }
}
