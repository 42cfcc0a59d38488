use crate::mode::ThetaMode;
use crate::stream::{StopSignal, StreamOptions};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ThetaConfig {
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    pub viewer: ViewerConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Index among attached THETAs (0-based)
    #[serde(default = "default_device_index")]
    pub index: usize,

    /// Live streaming mode: uhd_2997 or fhd_2997
    #[serde(default)]
    pub mode: ThetaMode,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StreamConfig {
    /// End a session when no frame arrives for this many seconds
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_seconds: u64,

    /// Frame rate log period in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,

    /// Frames buffered between the USB transfer thread and the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Start a new session when the previous one ends
    #[serde(default = "default_restart_on_exit")]
    pub restart_on_exit: bool,

    /// Delay before restarting, in seconds
    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,

    /// Give up after this many restarts
    pub max_restarts: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ViewerConfig {
    /// GStreamer elements placed after the H.264 parser
    #[serde(default = "default_viewer_pipeline")]
    pub pipeline: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FanoutConfig {
    /// Build the viewer pipeline from this section instead of `viewer.pipeline`
    #[serde(default)]
    pub enabled: bool,

    /// Device key used in fifo and recording names
    #[serde(default = "default_fanout_key")]
    pub key: String,

    #[serde(default = "default_fanout_width")]
    pub width: u32,

    #[serde(default = "default_fanout_height")]
    pub height: u32,

    #[serde(default)]
    pub crop_top: u32,

    #[serde(default)]
    pub crop_bottom: u32,

    /// Directory holding the JPEG fifos
    #[serde(default = "default_pipe_dir")]
    pub pipe_dir: String,

    /// Directory for raw Matroska recordings (optional)
    pub record_path: Option<String>,
}

impl ThetaConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("thetauvc.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("device.index", default_device_index() as i64)?
            .set_default("device.mode", ThetaMode::default().as_str())?
            .set_default(
                "stream.watchdog_timeout_seconds",
                default_watchdog_timeout(),
            )?
            .set_default("stream.stats_interval_seconds", default_stats_interval())?
            .set_default("stream.channel_capacity", default_channel_capacity() as i64)?
            .set_default("stream.restart_on_exit", default_restart_on_exit())?
            .set_default("stream.restart_delay_seconds", default_restart_delay())?
            .set_default("viewer.pipeline", default_viewer_pipeline())?
            .set_default("fanout.enabled", false)?
            .set_default("fanout.key", default_fanout_key())?
            .set_default("fanout.width", default_fanout_width())?
            .set_default("fanout.height", default_fanout_height())?
            .set_default("fanout.crop_top", 0)?
            .set_default("fanout.crop_bottom", 0)?
            .set_default("fanout.pipe_dir", default_pipe_dir())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // THETAUVC_DEVICE__INDEX=1 overrides device.index
            .add_source(
                Environment::with_prefix("THETAUVC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: ThetaConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.watchdog_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Stream watchdog_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Stream channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.viewer.pipeline.trim().is_empty() {
            return Err(ConfigError::Message(
                "Viewer pipeline must not be empty".to_string(),
            ));
        }

        if self.fanout.enabled {
            crate::pipeline::validate_key(&self.fanout.key)
                .map_err(|e| ConfigError::Message(e.to_string()))?;

            if self.fanout.width == 0 || self.fanout.height == 0 {
                return Err(ConfigError::Message(
                    "Fanout resolution must be greater than 0".to_string(),
                ));
            }

            let crop = self.fanout.crop_top.checked_add(self.fanout.crop_bottom);
            if !matches!(crop, Some(crop) if crop < self.fanout.height) {
                return Err(ConfigError::Message(
                    "Fanout crop must leave part of the image".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Session options derived from the `[stream]` section
    pub fn stream_options(&self, stop: StopSignal) -> StreamOptions {
        StreamOptions {
            stop,
            watchdog_timeout: Duration::from_secs(self.stream.watchdog_timeout_seconds),
            stats_interval: Duration::from_secs(self.stream.stats_interval_seconds),
            channel_capacity: self.stream.channel_capacity,
        }
    }

    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for ThetaConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                index: default_device_index(),
                mode: ThetaMode::default(),
            },
            stream: StreamConfig {
                watchdog_timeout_seconds: default_watchdog_timeout(),
                stats_interval_seconds: default_stats_interval(),
                channel_capacity: default_channel_capacity(),
                restart_on_exit: default_restart_on_exit(),
                restart_delay_seconds: default_restart_delay(),
                max_restarts: None,
            },
            viewer: ViewerConfig {
                pipeline: default_viewer_pipeline(),
            },
            fanout: FanoutConfig {
                enabled: false,
                key: default_fanout_key(),
                width: default_fanout_width(),
                height: default_fanout_height(),
                crop_top: 0,
                crop_bottom: 0,
                pipe_dir: default_pipe_dir(),
                record_path: None,
            },
        }
    }
}

// Default value functions
fn default_device_index() -> usize {
    0
}

fn default_watchdog_timeout() -> u64 {
    5
}
fn default_stats_interval() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    8
}
fn default_restart_on_exit() -> bool {
    true
}
fn default_restart_delay() -> u64 {
    5
}

fn default_viewer_pipeline() -> String {
    "decodebin ! autovideosink sync=false".to_string()
}

fn default_fanout_key() -> String {
    "theta".to_string()
}
fn default_fanout_width() -> u32 {
    3840
}
fn default_fanout_height() -> u32 {
    1920
}
fn default_pipe_dir() -> String {
    "/tmp".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ThetaConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.device.mode, ThetaMode::Uhd2997);
        assert_eq!(config.stream.restart_delay_seconds, 5);
        assert_eq!(config.stream.stats_interval_seconds, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[device]
index = 1
mode = "fhd"

[stream]
restart_on_exit = false
max_restarts = 3

[fanout]
enabled = true
key = "front"
crop_bottom = 120
"#
        )
        .unwrap();

        let config = ThetaConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.device.index, 1);
        assert_eq!(config.device.mode, ThetaMode::Fhd2997);
        assert!(!config.stream.restart_on_exit);
        assert_eq!(config.stream.max_restarts, Some(3));
        assert_eq!(config.stream.watchdog_timeout_seconds, 5);
        assert!(config.fanout.enabled);
        assert_eq!(config.fanout.key, "front");
        assert_eq!(config.fanout.crop_bottom, 120);
        assert_eq!(config.fanout.width, 3840);
        assert!(config.fanout.record_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ThetaConfig::load_from_file(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ThetaConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ThetaConfig::default();

        config.stream.watchdog_timeout_seconds = 0;
        assert!(config.validate().is_err());
        config.stream.watchdog_timeout_seconds = 5;

        config.fanout.enabled = true;
        config.fanout.key = "front door".to_string();
        assert!(config.validate().is_err());

        config.fanout.key = "front_door".to_string();
        config.fanout.crop_top = 1000;
        config.fanout.crop_bottom = 1000;
        assert!(config.validate().is_err());

        config.fanout.crop_top = 0;
        config.fanout.crop_bottom = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_crop_overflow_rejected() {
        let mut config = ThetaConfig::default();
        config.fanout.enabled = true;
        config.fanout.crop_top = u32::MAX;
        config.fanout.crop_bottom = 1;

        match config.validate() {
            Err(ConfigError::Message(msg)) => assert!(msg.contains("crop")),
            other => panic!("expected crop error, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_options() {
        let config = ThetaConfig::default();
        let stop = StopSignal::new();
        let options = config.stream_options(stop.clone());

        assert_eq!(options.watchdog_timeout, Duration::from_secs(5));
        assert_eq!(options.stats_interval, Duration::from_secs(10));
        assert_eq!(options.channel_capacity, 8);

        stop.stop();
        assert!(options.stop.is_stopped());
    }

    #[test]
    fn test_print_round_trip() {
        let config = ThetaConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("mode = \"uhd_2997\""));

        let parsed: ThetaConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
