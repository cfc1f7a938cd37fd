//! Adapter configuration using Figment.
//!
//! Settings are loaded from:
//! 1. an optional TOML file,
//! 2. environment variables prefixed with `DEVADAPT_`.
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! DEVADAPT_AUTOFOCUS__SERIAL_PORT=/dev/ttyUSB0
//! DEVADAPT_AUTOFOCUS__WDI_HOST=192.168.0.20
//! DEVADAPT_LOGGING__LEVEL=debug
//! ```
//!
//! Every section has defaults, so an empty file (or no file) yields a usable
//! configuration. The `autofocus` section supplies the initial values of the
//! WDI adapter's pre-init properties.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The provider chain could not be read or deserialized.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// A loaded value is out of range.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level adapter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// WDI autofocus adapter defaults.
    pub autofocus: AutofocusSettings,
    /// Array camera settings.
    pub camera: CameraSettings,
    /// ASCII link settings.
    pub transport: TransportSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Connection parameters of the WDI autofocus adapter.
///
/// Field types follow the host property types: numbers are plain integers
/// so out-of-range values can be reported instead of wrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusSettings {
    /// Serial port of the Zaber controller chain.
    pub serial_port: String,
    /// Hostname or IP address of the WDI sensor.
    pub wdi_host: String,
    /// TCP port of the WDI sensor.
    pub wdi_port: i64,
    /// Device number of the focus stage (1-99).
    pub focus_device: i64,
    /// Axis number of the focus stage (1-99).
    pub focus_axis: i64,
    /// Device number of the objective turret; non-positive means none.
    pub turret_device: i64,
}

impl Default for AutofocusSettings {
    fn default() -> Self {
        Self {
            serial_port: String::new(),
            wdi_host: "Undefined".to_string(),
            wdi_port: 27,
            focus_device: 1,
            focus_axis: 1,
            turret_device: -1,
        }
    }
}

/// Array camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Name the camera is registered under.
    pub label: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            label: "ArrayCamera".to_string(),
        }
    }
}

/// ASCII link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// How long to wait for a reply line before giving up.
    pub read_timeout_ms: u64,
    /// Port used when a TCP endpoint is given without one.
    pub tcp_default_port: u16,
}

impl TransportSettings {
    /// Reply timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            tcp_default_port: 55550,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

const ENV_PREFIX: &str = "DEVADAPT_";

impl AdapterSettings {
    /// Load from environment variables over the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::base())
    }

    /// Load from `path`, with environment variables taking precedence.
    ///
    /// A missing file is treated as empty.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(Self::base().merge(Toml::file(path.as_ref())))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let af = &self.autofocus;
        for (name, value, min) in [
            ("focus_device", af.focus_device, 1),
            ("focus_axis", af.focus_axis, 1),
            ("turret_device", af.turret_device, -1),
        ] {
            if !(min..=99).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "autofocus.{name} = {value} is outside {min}..=99"
                )));
            }
        }

        if !(0..=i64::from(u16::MAX)).contains(&af.wdi_port) {
            return Err(ConfigError::ValidationError(format!(
                "autofocus.wdi_port = {} is not a TCP port",
                af.wdi_port
            )));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.level cannot be empty".to_string(),
            ));
        }

        if self.transport.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "transport.read_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_adapter_defaults() {
        let settings = AdapterSettings::default();
        assert_eq!(settings.autofocus.wdi_host, "Undefined");
        assert_eq!(settings.autofocus.wdi_port, 27);
        assert_eq!(settings.autofocus.turret_device, -1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
            [autofocus]
            serial_port = "/dev/ttyUSB3"
            focus_axis = 2

            [transport]
            read_timeout_ms = 250
            "#,
        );

        let settings = AdapterSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.autofocus.serial_port, "/dev/ttyUSB3");
        assert_eq!(settings.autofocus.focus_axis, 2);
        assert_eq!(settings.autofocus.focus_device, 1);
        assert_eq!(settings.transport.read_timeout(), Duration::from_millis(250));
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AdapterSettings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.camera.label, "ArrayCamera");
    }

    #[test]
    fn rejects_out_of_range_axis() {
        let file = write_config("[autofocus]\nfocus_axis = 100\n");
        let err = AdapterSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("focus_axis"));
    }

    #[test]
    fn rejects_wrong_types() {
        let file = write_config("[autofocus]\nwdi_port = \"twenty-seven\"\n");
        assert!(matches!(
            AdapterSettings::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }

    #[test]
    fn saved_settings_load_back() {
        let mut settings = AdapterSettings::default();
        settings.autofocus.wdi_host = "10.0.0.7".into();
        settings.autofocus.turret_device = 2;
        settings.logging.level = "debug".into();

        let file = write_config(&toml::to_string(&settings).unwrap());
        assert_eq!(AdapterSettings::load_from(file.path()).unwrap(), settings);
    }

    #[test]
    fn rejects_empty_log_level() {
        let mut settings = AdapterSettings::default();
        settings.logging.level = "  ".into();
        assert!(settings.validate().is_err());
    }
}
