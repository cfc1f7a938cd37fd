//! Vendor driver boundary for Zaber-family adapters.
//!
//! These traits describe what the adapters need from a motion-controller
//! library and a WDI autofocus provider. Implementations are black boxes:
//! [`crate::ascii`] provides the motion side over the ASCII protocol,
//! [`crate::mock`] provides a simulated controller for tests, and integrators
//! can plug in a full vendor library through [`DriverFactory`].
//!
//! All calls report failures as [`DriverError`]; adapters convert them into
//! the adapter taxonomy with `?`.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::DriverError;

/// Result alias for driver-boundary calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Device number and axis number of a controllable unit on a shared bus.
///
/// Axis 0 addresses the device as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// Device address on the chain.
    pub device: u8,
    /// Axis number on the device, 1-based.
    pub axis: u8,
}

impl Target {
    /// Address `axis` on `device`.
    pub const fn new(device: u8, axis: u8) -> Self {
        Self { device, axis }
    }

    /// Target the whole device.
    pub const fn device(device: u8) -> Self {
        Self { device, axis: 0 }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.device, self.axis)
    }
}

/// Autofocus status as reported by the focus driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusStatus {
    /// The sensor reports the sample within focus tolerance right now.
    pub in_focus: bool,
    /// The sensor sees a usable signal.
    pub in_range: bool,
}

/// An open link to a motion controller chain.
#[async_trait]
pub trait MotionLink: Send + Sync {
    /// Resolve an axis; fails with `NotFound` if it does not exist.
    async fn axis(&self, target: Target) -> DriverResult<Arc<dyn Axis>>;

    /// Resolve a whole device; fails with `NotFound` if nobody answers.
    async fn device(&self, address: u8) -> DriverResult<Arc<dyn DeviceUnit>>;
}

/// One axis of a motion controller.
#[async_trait]
pub trait Axis: Send + Sync {
    /// Device and axis this handle addresses.
    fn target(&self) -> Target;

    /// Whether the axis is executing a command.
    async fn is_busy(&self) -> DriverResult<bool>;

    /// Read a setting keyed by its dotted name (e.g. `motion.tracking.limit.min`).
    async fn get_setting(&self, name: &str) -> DriverResult<f64>;

    /// Write a setting keyed by its dotted name.
    async fn set_setting(&self, name: &str, value: f64) -> DriverResult<()>;
}

/// A whole device on the chain (e.g. an objective turret).
pub trait DeviceUnit: Send + Sync {
    /// Device address on the chain.
    fn address(&self) -> u8;
}

/// Connection to the WDI autofocus sensor.
#[async_trait]
pub trait AutofocusProvider: Send + Sync {
    /// Identifier the focus driver uses to talk to this provider.
    fn provider_id(&self) -> u32;

    /// Generic register read.
    ///
    /// Reads `count` values of `data_size` bytes starting at `register` plus
    /// `offset`, interpreted according to the sensor's type code `data_type`.
    async fn generic_read(
        &self,
        register: u32,
        data_size: u32,
        count: u32,
        offset: u32,
        data_type: &str,
    ) -> DriverResult<Vec<i32>>;
}

/// Closed-loop focus operations on a focus axis.
#[async_trait]
pub trait FocusDriver: Send + Sync {
    /// The axis the loop drives.
    fn focus_axis(&self) -> Arc<dyn Axis>;

    /// Current sensor status.
    async fn status(&self) -> DriverResult<FocusStatus>;

    /// One focusing pass; `scan` requests a full deterministic search.
    async fn focus_once(&self, scan: bool) -> DriverResult<()>;

    /// Start closed-loop tracking.
    async fn start_focus_loop(&self) -> DriverResult<()>;

    /// Stop closed-loop tracking.
    async fn stop_focus_loop(&self) -> DriverResult<()>;

    /// Lower tracking limit in native units.
    async fn set_limit_min(&self, native: f64) -> DriverResult<()>;

    /// Upper tracking limit in native units.
    async fn set_limit_max(&self, native: f64) -> DriverResult<()>;
}

/// Opens the links an autofocus session is built from.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open the controller chain on `serial_port`.
    async fn open_motion(&self, serial_port: &str) -> DriverResult<Arc<dyn MotionLink>>;

    /// Connect to the WDI sensor at `host`:`port`.
    async fn open_provider(&self, host: &str, port: u16)
        -> DriverResult<Arc<dyn AutofocusProvider>>;

    /// Build the focus driver for an axis and optional turret.
    fn focus_driver(
        &self,
        provider_id: u32,
        focus_axis: Arc<dyn Axis>,
        turret: Option<Arc<dyn DeviceUnit>>,
    ) -> Arc<dyn FocusDriver>;
}
