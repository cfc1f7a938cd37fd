//! Error types and the host status-code translation.
//!
//! Two layers of errors exist in this crate:
//!
//! - **`DriverError`**: failures reported by the vendor driver boundary
//!   (see [`crate::driver`]). These are what a motion controller library or
//!   an autofocus provider raises.
//! - **`AdapterError`**: the adapter-level taxonomy. Driver errors convert into
//!   it with `?`, and acquisition-source failures are wrapped into it with
//!   their context preserved.
//!
//! The host never sees either type. Every public entry point of an adapter
//! runs its body as an `AdapterResult` and hands the outcome to [`translate`],
//! which logs the diagnostic and collapses the error into the fixed
//! [`StatusCode`] vocabulary.
//!
//! | Error                                   | Status code             |
//! |-----------------------------------------|-------------------------|
//! | `Configuration`, `InvalidPropertyValue` | `InvalidPropertyValue`  |
//! | everything else                         | `Error`                 |

use thiserror::Error;
use tracing::warn;

/// Convenience alias for results using the adapter error type.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Result type returned to the host: a value or a bare status code.
pub type HostResult<T> = std::result::Result<T, StatusCode>;

/// Adapter-level error taxonomy.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport unreachable, or the addressed device/axis is absent.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected response from the driver.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An acquired frame failed its shape/type/layout/size checks.
    #[error("Frame validation error: {0}")]
    Validation(String),

    /// Unsupported configuration value (e.g. binning other than 1).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The acquisition source failed to trigger or deliver a frame.
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// No property of that name is registered.
    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    /// The value has the wrong kind or is out of bounds.
    #[error("Invalid value for property '{name}': {reason}")]
    InvalidPropertyValue {
        /// Property that was written.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl AdapterError {
    /// Host status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdapterError::Configuration(_) | AdapterError::InvalidPropertyValue { .. } => {
                StatusCode::InvalidPropertyValue
            }
            _ => StatusCode::Error,
        }
    }

    pub(crate) fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::InvalidPropertyValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by the vendor driver boundary.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The port or socket could not be opened, or I/O on it failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The device answered with something that could not be interpreted.
    #[error("Protocol failure: {0}")]
    Protocol(String),

    /// No device or axis answers at the requested address.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The device understood the command but refused it.
    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Transport(err.to_string())
    }
}

impl From<DriverError> for AdapterError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Transport(_) | DriverError::NotFound(_) => {
                AdapterError::Connection(err.to_string())
            }
            DriverError::Protocol(_) | DriverError::Rejected(_) => {
                AdapterError::Protocol(err.to_string())
            }
        }
    }
}

/// Fixed status-code vocabulary understood by the host.
///
/// The numeric values match the host framework's `DEVICE_OK`,
/// `DEVICE_ERR` and `DEVICE_INVALID_PROPERTY_VALUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Success.
    Ok = 0,
    /// Generic failure.
    Error = 1,
    /// Rejected property or configuration value.
    InvalidPropertyValue = 3,
}

impl StatusCode {
    /// Raw integer value passed across the host boundary.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Fold a host result back into a single code.
    pub fn of<T>(result: &HostResult<T>) -> StatusCode {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(code) => *code,
        }
    }

    /// Text registered with the host for this code.
    pub fn message(self) -> &'static str {
        match self {
            StatusCode::Ok => "No error",
            StatusCode::Error => "Device error; see the log for details",
            StatusCode::InvalidPropertyValue => "Invalid property value",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Translate an adapter outcome into the host vocabulary.
///
/// Failures are logged with the operation name before the detail is
/// dropped, so the log is the only place the full diagnostic survives.
pub fn translate<T>(operation: &str, result: AdapterResult<T>) -> HostResult<T> {
    result.map_err(|err| {
        let code = err.status_code();
        warn!(operation, code = code.code(), "{err}");
        code
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdapterError::Connection("port closed".to_string());
        assert_eq!(err.to_string(), "Connection error: port closed");
    }

    #[test]
    fn driver_errors_map_onto_taxonomy() {
        let err: AdapterError = DriverError::NotFound("device 7".into()).into();
        assert!(matches!(err, AdapterError::Connection(_)));

        let err: AdapterError = DriverError::Transport("EOF".into()).into();
        assert!(matches!(err, AdapterError::Connection(_)));

        let err: AdapterError = DriverError::Rejected("BADDATA".into()).into();
        assert!(matches!(err, AdapterError::Protocol(_)));
    }

    #[test]
    fn status_codes_use_host_values() {
        assert_eq!(StatusCode::Ok.code(), 0);
        assert_eq!(StatusCode::Error.code(), 1);
        assert_eq!(StatusCode::InvalidPropertyValue.code(), 3);

        assert_eq!(
            AdapterError::Configuration("binning 2".into()).status_code(),
            StatusCode::InvalidPropertyValue
        );
        assert_eq!(
            AdapterError::Validation("ndim".into()).status_code(),
            StatusCode::Error
        );
    }

    #[test]
    fn translate_keeps_values_and_collapses_errors() {
        assert_eq!(translate("op", Ok::<_, AdapterError>(5)), Ok(5));
        let res: HostResult<()> = translate("op", Err(AdapterError::Acquisition("no frame".into())));
        assert_eq!(res, Err(StatusCode::Error));
        assert_eq!(StatusCode::of(&res), StatusCode::Error);
    }
}
