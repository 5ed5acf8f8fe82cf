//! Engine and import configuration
//!
//! Both structs are serde-serializable so front ends can keep them in a JSON
//! file; every field has a default so partial files are accepted.

use crate::synth::ChipType;
use crate::{FmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of each message ring, in bytes
pub const DEFAULT_FIFO_CAPACITY: usize = 8192;

/// Default output sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Longest MIDI message accepted into the MIDI ring
pub const DEFAULT_MIDI_MESSAGE_MAX: usize = 64;

/// Producer poll interval while a ring is full, in microseconds
pub const DEFAULT_BACKOFF_MICROS: u64 = 1000;

/// Configuration of the realtime dispatch engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the control ring and of the MIDI ring, in bytes
    pub fifo_capacity: usize,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Chip backend selected at startup
    pub chip: ChipType,
    /// Longest MIDI message accepted (longer ones are dropped)
    pub midi_message_max: usize,
    /// Sleep between retries while the control ring is full
    pub backoff_micros: u64,
}

impl EngineConfig {
    /// Smaller rings and a tighter poll interval
    pub fn low_latency(sample_rate: u32) -> Self {
        EngineConfig {
            fifo_capacity: 2048,
            sample_rate,
            backoff_micros: 250,
            ..EngineConfig::default()
        }
    }

    /// Read a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FmError::NoFile(format!("{}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| FmError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(FmError::ConfigError("sample rate must be non-zero".into()));
        }
        #[cfg(feature = "realtime")]
        {
            use crate::realtime::message::{HEADER_SIZE, MIN_FIFO_CAPACITY};
            let needed = MIN_FIFO_CAPACITY.max(HEADER_SIZE + self.midi_message_max);
            if self.fifo_capacity < needed {
                return Err(FmError::ConfigError(format!(
                    "fifo capacity {} is below the {} byte minimum",
                    self.fifo_capacity, needed
                )));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fifo_capacity: DEFAULT_FIFO_CAPACITY,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chip: ChipType::default(),
            midi_message_max: DEFAULT_MIDI_MESSAGE_MAX,
            backoff_micros: DEFAULT_BACKOFF_MICROS,
        }
    }
}

/// Options for register-trace imports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Emit each distinct captured instrument only once
    pub dedupe: bool,
    /// Prefix of generated instrument names
    pub name_prefix: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            dedupe: false,
            name_prefix: "Ins".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fifo_capacity, 8192);
        assert_eq!(config.sample_rate, 44_100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{ "sample_rate": 48000 }"#).unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.fifo_capacity, DEFAULT_FIFO_CAPACITY);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "chip": "Ym2608", "backoff_micros": 500 }}"#).unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.chip, ChipType::Ym2608);
        assert_eq!(config.backoff_micros, 500);
    }

    #[test]
    fn test_invalid_values() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(FmError::ConfigError(_))));

        #[cfg(feature = "realtime")]
        {
            let config = EngineConfig {
                fifo_capacity: 16,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());

            // One patch change alone is not enough
            let config = EngineConfig {
                fifo_capacity: crate::realtime::message::MAX_WIRE_SIZE + 8,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err());
            let config = EngineConfig {
                fifo_capacity: crate::realtime::message::MIN_FIFO_CAPACITY,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = EngineConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, FmError::ConfigError(_)));
    }
}
