//! Microscopy device adapters.
//!
//! This library contains the host-facing capability traits and two adapter
//! families built on them:
//!
//! - [`autofocus::WdiAutofocus`]: a Zaber focus stage driven by a WDI laser
//!   autofocus sensor, with lazy, resettable connection management and
//!   cached property synchronization.
//! - [`camera::ArrayCamera`]: a camera backed by any array-producing
//!   acquisition source, with atomic ROI handling and zero-copy frame
//!   validation.
//!
//! Hardware is reached through the [`driver`] boundary. [`ascii`] speaks the
//! Zaber ASCII protocol over the [`transport`] layer, and [`mock`] simulates
//! everything for tests.

pub mod ascii;
pub mod autofocus;
pub mod camera;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod frame;
pub mod logging;
pub mod mock;
pub mod property;
pub mod transport;

pub use capabilities::{AutoFocus, Camera, Device, Roi};
pub use error::{AdapterError, AdapterResult, HostResult, StatusCode};
