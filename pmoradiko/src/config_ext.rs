//! Extension to read the recorder settings from pmoconfig
//!
//! This module provides the `RadikoConfigExt` trait, which adds typed
//! accessors for the `radiko` section of the configuration to
//! `pmoconfig::Config`.
//!
//! ```yaml
//! radiko:
//!   station: TBS
//!   bitrate: 64k
//!   buffer_secs: 60
//!   timeout_secs: 0
//!   converter: /usr/local/bin/ffmpeg   # optional
//!   output:
//!     directory: podcasts
//!   temp:
//!     directory: tmp
//!   retry:
//!     max_retries: 5
//!     backoff_secs: 10
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmoradiko::RadikoConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! println!("Recording {}", config.get_radiko_station()?);
//! println!("Saving into {}", config.get_radiko_output_dir()?);
//! # Ok(())
//! # }
//! ```

use crate::session::RetryPolicy;
use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::time::Duration;

pub const DEFAULT_STATION: &str = "TBS";
pub const DEFAULT_BITRATE: &str = crate::recorder::DEFAULT_BITRATE;
pub const DEFAULT_BUFFER_SECS: i64 = crate::recorder::DEFAULT_BUFFER_SECS;
pub const DEFAULT_OUTPUT_DIR: &str = "podcasts";
pub const DEFAULT_TEMP_DIR: &str = "tmp";
pub const DEFAULT_MAX_RETRIES: u32 = crate::session::DEFAULT_MAX_RETRIES;
pub const DEFAULT_BACKOFF_SECS: u64 = 10;
/// No run timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 0;

/// Typed access to the `radiko` section of the configuration
///
/// Getters persist their default value when the key is missing.
pub trait RadikoConfigExt {
    /// Station id to record (default `TBS`)
    fn get_radiko_station(&self) -> Result<String>;
    fn set_radiko_station(&self, station: &str) -> Result<()>;

    /// Bitrate label passed along with each capture (default `64k`)
    fn get_radiko_bitrate(&self) -> Result<String>;
    fn set_radiko_bitrate(&self, bitrate: &str) -> Result<()>;

    /// Seconds recorded past the scheduled end (default 60)
    fn get_radiko_buffer_secs(&self) -> Result<i64>;
    fn set_radiko_buffer_secs(&self, secs: i64) -> Result<()>;

    /// Root directory for saved programs, created if needed
    fn get_radiko_output_dir(&self) -> Result<String>;
    fn set_radiko_output_dir(&self, directory: String) -> Result<()>;

    /// Directory for capture segments and merge output, created if needed
    fn get_radiko_temp_dir(&self) -> Result<String>;
    fn set_radiko_temp_dir(&self, directory: String) -> Result<()>;

    fn get_radiko_max_retries(&self) -> Result<u32>;
    fn set_radiko_max_retries(&self, retries: u32) -> Result<()>;

    fn get_radiko_backoff_secs(&self) -> Result<u64>;
    fn set_radiko_backoff_secs(&self, secs: u64) -> Result<()>;

    /// Explicit decoder path; `None` means look `ffmpeg` / `avconv` up on `PATH`
    fn get_radiko_converter(&self) -> Result<Option<String>>;
    fn set_radiko_converter(&self, path: &str) -> Result<()>;

    /// Maximum run time in seconds, 0 for none
    fn get_radiko_timeout_secs(&self) -> Result<u64>;
    fn set_radiko_timeout_secs(&self, secs: u64) -> Result<()>;

    /// Retry ceiling and backoff as a [`RetryPolicy`]
    fn get_radiko_retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.get_radiko_max_retries()?,
            backoff: Duration::from_secs(self.get_radiko_backoff_secs()?),
            ..Default::default()
        })
    }
}

const STATION: &[&str] = &["radiko", "station"];
const BITRATE: &[&str] = &["radiko", "bitrate"];
const BUFFER_SECS: &[&str] = &["radiko", "buffer_secs"];
const OUTPUT_DIR: &[&str] = &["radiko", "output", "directory"];
const TEMP_DIR: &[&str] = &["radiko", "temp", "directory"];
const MAX_RETRIES: &[&str] = &["radiko", "retry", "max_retries"];
const BACKOFF_SECS: &[&str] = &["radiko", "retry", "backoff_secs"];
const CONVERTER: &[&str] = &["radiko", "converter"];
const TIMEOUT_SECS: &[&str] = &["radiko", "timeout_secs"];

fn get_string(config: &Config, path: &[&str], default: &str) -> Result<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => {
            config.set_value(path, Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}

fn get_u64(config: &Config, path: &[&str], default: u64) -> Result<u64> {
    match config.get_value(path).ok().and_then(|v| v.as_u64()) {
        Some(value) => Ok(value),
        None => {
            config.set_value(path, Value::Number(Number::from(default)))?;
            Ok(default)
        }
    }
}

impl RadikoConfigExt for Config {
    fn get_radiko_station(&self) -> Result<String> {
        get_string(self, STATION, DEFAULT_STATION)
    }

    fn set_radiko_station(&self, station: &str) -> Result<()> {
        self.set_value(STATION, Value::String(station.to_string()))
    }

    fn get_radiko_bitrate(&self) -> Result<String> {
        get_string(self, BITRATE, DEFAULT_BITRATE)
    }

    fn set_radiko_bitrate(&self, bitrate: &str) -> Result<()> {
        self.set_value(BITRATE, Value::String(bitrate.to_string()))
    }

    fn get_radiko_buffer_secs(&self) -> Result<i64> {
        match self.get_value(BUFFER_SECS).ok().and_then(|v| v.as_i64()) {
            Some(secs) => Ok(secs),
            None => {
                self.set_radiko_buffer_secs(DEFAULT_BUFFER_SECS)?;
                Ok(DEFAULT_BUFFER_SECS)
            }
        }
    }

    fn set_radiko_buffer_secs(&self, secs: i64) -> Result<()> {
        self.set_value(BUFFER_SECS, Value::Number(Number::from(secs)))
    }

    fn get_radiko_output_dir(&self) -> Result<String> {
        self.get_managed_dir(OUTPUT_DIR, DEFAULT_OUTPUT_DIR)
    }

    fn set_radiko_output_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(OUTPUT_DIR, directory)
    }

    fn get_radiko_temp_dir(&self) -> Result<String> {
        self.get_managed_dir(TEMP_DIR, DEFAULT_TEMP_DIR)
    }

    fn set_radiko_temp_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(TEMP_DIR, directory)
    }

    fn get_radiko_max_retries(&self) -> Result<u32> {
        let retries = get_u64(self, MAX_RETRIES, DEFAULT_MAX_RETRIES as u64)?;
        Ok(u32::try_from(retries).unwrap_or(u32::MAX))
    }

    fn set_radiko_max_retries(&self, retries: u32) -> Result<()> {
        self.set_value(MAX_RETRIES, Value::Number(Number::from(retries)))
    }

    fn get_radiko_backoff_secs(&self) -> Result<u64> {
        get_u64(self, BACKOFF_SECS, DEFAULT_BACKOFF_SECS)
    }

    fn set_radiko_backoff_secs(&self, secs: u64) -> Result<()> {
        self.set_value(BACKOFF_SECS, Value::Number(Number::from(secs)))
    }

    fn get_radiko_converter(&self) -> Result<Option<String>> {
        match self.get_value(CONVERTER) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    fn set_radiko_converter(&self, path: &str) -> Result<()> {
        self.set_value(CONVERTER, Value::String(path.to_string()))
    }

    fn get_radiko_timeout_secs(&self) -> Result<u64> {
        get_u64(self, TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS)
    }

    fn set_radiko_timeout_secs(&self, secs: u64) -> Result<()> {
        self.set_value(TIMEOUT_SECS, Value::Number(Number::from(secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(dir: &TempDir) -> Config {
        Config::load_config(&dir.path().to_string_lossy()).unwrap()
    }

    #[test]
    fn test_embedded_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_radiko_station().unwrap(), "TBS");
        assert_eq!(config.get_radiko_bitrate().unwrap(), "64k");
        assert_eq!(config.get_radiko_buffer_secs().unwrap(), 60);
        assert_eq!(config.get_radiko_max_retries().unwrap(), 5);
        assert_eq!(config.get_radiko_backoff_secs().unwrap(), 10);
        assert_eq!(config.get_radiko_timeout_secs().unwrap(), 0);
        assert_eq!(config.get_radiko_converter().unwrap(), None);
    }

    #[test]
    fn test_managed_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);

        let output = config.get_radiko_output_dir().unwrap();
        assert_eq!(output, dir.path().join("podcasts").to_string_lossy());
        assert!(dir.path().join("podcasts").is_dir());

        let temp = config.get_radiko_temp_dir().unwrap();
        assert!(std::path::Path::new(&temp).is_dir());
    }

    #[test]
    fn test_settings_are_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let config = load(&dir);
            config.set_radiko_station("QRR").unwrap();
            config.set_radiko_max_retries(2).unwrap();
            config.set_radiko_backoff_secs(3).unwrap();
            config.set_radiko_converter("/opt/bin/avconv").unwrap();
        }

        let config = load(&dir);
        assert_eq!(config.get_radiko_station().unwrap(), "QRR");
        assert_eq!(
            config.get_radiko_converter().unwrap().as_deref(),
            Some("/opt/bin/avconv")
        );

        let policy = config.get_radiko_retry_policy().unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_value_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);
        config
            .set_value(&["radiko", "retry", "max_retries"], Value::String("many".into()))
            .unwrap();

        assert_eq!(config.get_radiko_max_retries().unwrap(), DEFAULT_MAX_RETRIES);
        assert!(matches!(
            config.get_value(&["radiko", "retry", "max_retries"]),
            Ok(Value::Number(_))
        ));
    }
}
