//! # Configuration Module
//!
//! TOML configuration with defaults for every field, so an empty file (or
//! no file at all) yields a working setup: four uniform colour bands over a
//! 100-LED strip.
//!
//! ```toml
//! [audio]
//! block_size = 1024
//! smoothing_window = 3
//!
//! [output]
//! led_count = 60
//!
//! [[filters]]
//! shape = "gaussian"
//! center = 440.0
//! width = 80.0
//! colour = [1.0, 0.0, 1.0]
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::control::OutletTable;
use crate::emit::{Topics, RGB_TOPIC_ID};
use crate::filter::{FilterBank, FilterSpec};
use crate::smoothing::DEFAULT_WINDOW;
use crate::{ConfigError, Rgb};

/// The stock colour bands: bass blue, low-mid green, mid yellow, treble red.
static DEFAULT_FILTERS: Lazy<Vec<FilterSpec>> = Lazy::new(|| {
    vec![
        FilterSpec::uniform(50.0, 50.0, Rgb(0.0, 0.0, 1.0)),
        FilterSpec::uniform(350.0, 150.0, Rgb(0.0, 1.0, 0.0)),
        FilterSpec::uniform(1000.0, 500.0, Rgb(1.0, 1.0, 0.0)),
        FilterSpec::uniform(3000.0, 1000.0, Rgb(1.0, 0.0, 0.0)),
    ]
});

/// Capture and spectrum settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Frames per analysis block
    pub block_size: usize,
    /// Number of spectra in the moving average
    pub smoothing_window: usize,
    /// Full-scale level the dB values are relative to
    pub reference: f32,
    /// Channel analysed when the device is multi-channel
    pub channel: u16,
    /// Substring of the input device name; default device when absent
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            smoothing_window: DEFAULT_WINDOW,
            reference: 1.0,
            channel: 0,
            device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub led_count: usize,
    /// Topic id the colours are published under
    pub topic: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            led_count: 100,
            topic: RGB_TOPIC_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub output: OutputConfig,
    pub filters: Vec<FilterSpec>,
    pub topics: Topics,
    pub power: OutletTable,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            output: OutputConfig::default(),
            filters: DEFAULT_FILTERS.clone(),
            topics: Topics::default(),
            power: OutletTable::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value the pipeline cannot work with, naming the
    /// offending parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidParameter(msg));

        if self.audio.block_size < 2 {
            return invalid(format!(
                "audio.block_size must be at least 2, got {}",
                self.audio.block_size
            ));
        }
        if self.audio.smoothing_window == 0 {
            return invalid("audio.smoothing_window must be at least 1".into());
        }
        if !(self.audio.reference.is_finite() && self.audio.reference > 0.0) {
            return invalid(format!(
                "audio.reference must be > 0, got {}",
                self.audio.reference
            ));
        }
        if self.output.led_count == 0 {
            return invalid("output.led_count must be at least 1".into());
        }
        if let Err(e) = self.topics.resolve(&self.output.topic) {
            return invalid(format!("output.topic: {e}"));
        }

        FilterBank::new(self.filters.iter().cloned())
            .map_err(|e| ConfigError::InvalidParameter(format!("filters: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterShape;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.filters.len(), 4);
        assert_eq!(config.output.led_count, 100);
        assert_eq!(config.audio.smoothing_window, 3);
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[audio]
block_size = 2048

[output]
led_count = 60

[[filters]]
shape = "gaussian"
center = 440.0
width = 80.0
colour = [1.0, 0.0, 1.0]

[power.outlets]
lamp = "1"

[power.radio_codes.1]
on = 1361
off = 1364
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.audio.block_size, 2048);
        assert_eq!(config.audio.smoothing_window, 3);
        assert_eq!(config.output.led_count, 60);
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.filters[0].shape, FilterShape::Gaussian);
        assert_eq!(config.filters[0].colour, Rgb(1.0, 0.0, 1.0));
        assert_eq!(config.power.radio_codes["1"].on, 1361);
    }

    #[test]
    fn invalid_values_name_the_parameter() {
        let mut config = Config::default();
        config.filters[1].width = 0.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("width"), "{err}");

        let mut config = Config::default();
        config.output.led_count = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("led_count"), "{err}");

        let mut config = Config::default();
        config.output.topic = "missing".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filters.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio\nblock_size = ").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
