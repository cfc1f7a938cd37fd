//! Host-facing capability traits.
//!
//! Every adapter implements [`Device`]; the concrete hardware family adds
//! [`AutoFocus`] or [`Camera`]. All methods are called concurrently from host
//! threads, so implementors serialize internally and the traits only require
//! `&self`.
//!
//! Fallible methods return [`HostResult`]: the value on success, otherwise a
//! bare [`crate::error::StatusCode`] whose diagnostic has already been logged.
//! A few queries (`busy`, `is_continuous_focus_locked`) answer with a plain
//! `bool` and report `false` when the device cannot be reached.

use async_trait::async_trait;

use crate::error::HostResult;
use crate::frame::ImageBuffer;
use crate::property::{PropertySpec, PropertyValue};

/// Base contract shared by every adapter.
#[async_trait]
pub trait Device: Send + Sync {
    /// Short device name shown to the host.
    fn name(&self) -> &str;

    /// One-line description shown to the host.
    fn description(&self) -> &str;

    /// Connect and read initial device state. Calling it again once
    /// initialized is a no-op.
    async fn initialize(&self) -> HostResult<()>;

    /// Release device resources. Always succeeds and may be repeated.
    async fn shutdown(&self) -> HostResult<()>;

    /// Whether the device is executing a command. `false` if unreachable.
    async fn busy(&self) -> bool;

    /// Properties currently registered with the host.
    async fn property_specs(&self) -> Vec<PropertySpec>;

    /// Host read of a property (`BeforeGet`).
    async fn get_property(&self, name: &str) -> HostResult<PropertyValue>;

    /// Host write of a property (`AfterSet`).
    async fn set_property(&self, name: &str, value: PropertyValue) -> HostResult<()>;
}

/// Autofocus capability.
///
/// Continuous focusing moves the device between *Idle* and *Tracking*; the
/// one-shot operations are only meaningful while idle.
#[async_trait]
pub trait AutoFocus: Device {
    /// Single deterministic best-focus search; returns when it completes.
    async fn full_focus(&self) -> HostResult<()>;

    /// One relative correction step.
    async fn incremental_focus(&self) -> HostResult<()>;

    /// Start (`true`) or stop (`false`) the closed-loop tracking mode.
    async fn set_continuous_focusing(&self, enabled: bool) -> HostResult<()>;

    /// Whether the tracking loop is running.
    async fn continuous_focusing(&self) -> HostResult<bool>;

    /// Whether the sensor reports focus within tolerance right now.
    async fn is_continuous_focus_locked(&self) -> bool;

    /// Fresh focus score; smaller is better.
    async fn current_focus_score(&self) -> HostResult<f64>;

    /// Score of the most recent reading.
    async fn last_focus_score(&self) -> HostResult<f64>;

    /// Focus offset; zero where the device has none.
    async fn offset(&self) -> HostResult<f64>;

    /// Set the focus offset.
    async fn set_offset(&self, offset: f64) -> HostResult<()>;

    /// Tune focusing parameters automatically.
    async fn auto_set_parameters(&self) -> HostResult<()>;
}

/// Rectangular readout window in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Roi {
    /// Window at (`x`, `y`) of the given size.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// `width == 0 && height == 0` requests the full frame.
    pub fn is_full_frame_request(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Camera capability.
#[async_trait]
pub trait Camera: Device {
    /// Begin an exposure. Returns once exposure has started; the frame may
    /// not be read out yet.
    async fn snap_image(&self) -> HostResult<()>;

    /// Fetch and validate the most recent frame.
    ///
    /// Returns `None` if the frame fails validation; the reason is logged.
    /// The returned buffer borrows the camera and stays valid until dropped.
    /// The next fetch waits for it to be released.
    async fn image_buffer<'a>(&'a self) -> Option<ImageBuffer<'a>>;

    /// Width of the frames currently produced.
    async fn image_width(&self) -> HostResult<u32>;

    /// Height of the frames currently produced.
    async fn image_height(&self) -> HostResult<u32>;

    /// Bytes per pixel of the image buffer.
    fn bytes_per_pixel(&self) -> u32;

    /// Significant bits per pixel.
    fn bit_depth(&self) -> u32;

    /// `width × height × bytes_per_pixel` of the current geometry.
    async fn image_buffer_size(&self) -> HostResult<usize>;

    /// Apply a readout window. A zero width and height restores full frame.
    async fn set_roi(&self, roi: Roi) -> HostResult<()>;

    /// Current readout window.
    async fn roi(&self) -> HostResult<Roi>;

    /// Restore the full-frame readout window.
    async fn clear_roi(&self) -> HostResult<()>;

    /// Exposure time in milliseconds.
    async fn exposure(&self) -> HostResult<f64>;

    /// Set the exposure time in milliseconds.
    async fn set_exposure(&self, exposure_ms: f64) -> HostResult<()>;

    /// Current binning factor.
    fn binning(&self) -> i32;

    /// Only a binning factor of 1 is supported.
    async fn set_binning(&self, binning: i32) -> HostResult<()>;

    /// Whether exposure can be sequenced by hardware.
    fn is_exposure_sequenceable(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_roi_requests_full_frame() {
        assert!(Roi::new(10, 20, 0, 0).is_full_frame_request());
        assert!(!Roi::new(0, 0, 0, 16).is_full_frame_request());
        assert!(Roi::default().is_full_frame_request());
    }
}
