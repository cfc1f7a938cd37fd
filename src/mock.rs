//! Mock Hardware Implementations
//!
//! Simulated devices for exercising the adapters without hardware.
//!
//! # Available Mocks
//!
//! - `MockController` - Zaber controller chain, WDI provider and focus driver
//!   behind one [`DriverFactory`], with call recording and fault injection
//! - `MockSource` - array acquisition source producing 16-bit frames
//!
//! Mocks never sleep; they record every call so tests can count connects,
//! device writes and resolved targets.

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::autofocus::{LIMIT_MAX_SETTING, LIMIT_MIN_SETTING};
use crate::camera::{AcquisitionSource, HEIGHT, LEFT, MEASUREMENT_TIME, TOP, WIDTH};
use crate::driver::{
    AutofocusProvider, Axis, DeviceUnit, DriverFactory, DriverResult, FocusDriver, FocusStatus,
    MotionLink, Target,
};
use crate::error::DriverError;
use crate::frame::{ArrayView, SourceObject};
use crate::property::{PropertySpec, PropertyValue};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockController - Simulated Zaber chain with WDI autofocus
// =============================================================================

#[derive(Default)]
struct Recorded {
    motion_ports: Vec<String>,
    provider_endpoints: Vec<(String, u16)>,
    axis_lookups: Vec<Target>,
    turret_lookups: Vec<u8>,
    focus_passes: Vec<(Target, bool)>,
    limit_writes: Vec<(&'static str, f64)>,
    status_queries: usize,
    missing_devices: Vec<u8>,
    native_limits: (f64, f64),
}

struct Shared {
    recorded: Mutex<Recorded>,
    position_raw: AtomicI32,
    in_focus: AtomicBool,
    axis_busy: AtomicBool,
    tracking: AtomicBool,
    fail_motion_open: AtomicBool,
    fail_provider_open: AtomicBool,
    fail_limit_writes: AtomicBool,
    fail_status: AtomicBool,
}

/// Simulated controller chain and WDI sensor.
///
/// Cloning the `Arc` handed to an adapter keeps a handle for inspection.
pub struct MockController {
    shared: Arc<Shared>,
}

impl MockController {
    /// Every device and axis exists; tracking limits are 0 and 25 mm.
    pub fn new() -> Self {
        let recorded = Recorded {
            native_limits: (0.0, 25_000_000.0),
            ..Recorded::default()
        };
        Self {
            shared: Arc::new(Shared {
                recorded: Mutex::new(recorded),
                position_raw: AtomicI32::new(0),
                in_focus: AtomicBool::new(false),
                axis_busy: AtomicBool::new(false),
                tracking: AtomicBool::new(false),
                fail_motion_open: AtomicBool::new(false),
                fail_provider_open: AtomicBool::new(false),
                fail_limit_writes: AtomicBool::new(false),
                fail_status: AtomicBool::new(false),
            }),
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        lock(&self.shared.recorded)
    }

    /// Number of motion links opened.
    pub fn motion_opens(&self) -> usize {
        self.recorded().motion_ports.len()
    }

    /// Serial ports motion links were opened on, in order.
    pub fn motion_ports(&self) -> Vec<String> {
        self.recorded().motion_ports.clone()
    }

    /// Host and port of every WDI provider opened, in order.
    pub fn provider_endpoints(&self) -> Vec<(String, u16)> {
        self.recorded().provider_endpoints.clone()
    }

    /// Every axis resolution, in order.
    pub fn axis_lookups(&self) -> Vec<Target> {
        self.recorded().axis_lookups.clone()
    }

    /// Number of turret device resolutions.
    pub fn turret_lookups(&self) -> usize {
        self.recorded().turret_lookups.len()
    }

    /// Focus passes as (axis target, full scan) pairs.
    pub fn focus_passes(&self) -> Vec<(Target, bool)> {
        self.recorded().focus_passes.clone()
    }

    /// Tracking-limit writes that reached the device, in native units.
    pub fn limit_writes(&self) -> Vec<(&'static str, f64)> {
        self.recorded().limit_writes.clone()
    }

    /// Number of autofocus status queries.
    pub fn status_queries(&self) -> usize {
        self.recorded().status_queries
    }

    /// Current tracking limits on the device, in native units.
    pub fn native_limits(&self) -> (f64, f64) {
        self.recorded().native_limits
    }

    /// Set the tracking limits held by the device, in native units.
    pub fn set_native_limits(&self, min: f64, max: f64) {
        self.recorded().native_limits = (min, max);
    }

    /// Raw value returned by the focus position register.
    pub fn set_position_raw(&self, raw: i32) {
        self.shared.position_raw.store(raw, Ordering::SeqCst);
    }

    /// Set what the sensor reports as in focus.
    pub fn set_in_focus(&self, in_focus: bool) {
        self.shared.in_focus.store(in_focus, Ordering::SeqCst);
    }

    /// Set the focus axis busy flag.
    pub fn set_axis_busy(&self, busy: bool) {
        self.shared.axis_busy.store(busy, Ordering::SeqCst);
    }

    /// Whether the focus loop is running.
    pub fn is_tracking(&self) -> bool {
        self.shared.tracking.load(Ordering::SeqCst)
    }

    /// Make a device address answer with `NotFound`.
    pub fn remove_device(&self, device: u8) {
        self.recorded().missing_devices.push(device);
    }

    /// Make opening the motion link fail.
    pub fn fail_motion_open(&self, fail: bool) {
        self.shared.fail_motion_open.store(fail, Ordering::SeqCst);
    }

    /// Make opening the WDI provider fail.
    pub fn fail_provider_open(&self, fail: bool) {
        self.shared.fail_provider_open.store(fail, Ordering::SeqCst);
    }

    /// Make limit writes fail.
    pub fn fail_limit_writes(&self, fail: bool) {
        self.shared.fail_limit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make status queries fail with a protocol error.
    pub fn fail_status(&self, fail: bool) {
        self.shared.fail_status.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverFactory for MockController {
    async fn open_motion(&self, serial_port: &str) -> DriverResult<Arc<dyn MotionLink>> {
        if self.shared.fail_motion_open.load(Ordering::SeqCst) {
            return Err(DriverError::Transport(format!(
                "cannot open serial port '{serial_port}'"
            )));
        }
        self.recorded().motion_ports.push(serial_port.to_string());
        Ok(Arc::new(MockLink {
            shared: self.shared.clone(),
        }))
    }

    async fn open_provider(
        &self,
        host: &str,
        port: u16,
    ) -> DriverResult<Arc<dyn AutofocusProvider>> {
        if self.shared.fail_provider_open.load(Ordering::SeqCst) {
            return Err(DriverError::Transport(format!(
                "connection to {host}:{port} refused"
            )));
        }
        self.recorded()
            .provider_endpoints
            .push((host.to_string(), port));
        Ok(Arc::new(MockProvider {
            shared: self.shared.clone(),
        }))
    }

    fn focus_driver(
        &self,
        _provider_id: u32,
        focus_axis: Arc<dyn Axis>,
        _turret: Option<Arc<dyn DeviceUnit>>,
    ) -> Arc<dyn FocusDriver> {
        Arc::new(MockFocus {
            shared: self.shared.clone(),
            axis: focus_axis,
        })
    }
}

struct MockLink {
    shared: Arc<Shared>,
}

impl MockLink {
    fn check_present(&self, device: u8) -> DriverResult<()> {
        if lock(&self.shared.recorded).missing_devices.contains(&device) {
            return Err(DriverError::NotFound(format!("device {device}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MotionLink for MockLink {
    async fn axis(&self, target: Target) -> DriverResult<Arc<dyn Axis>> {
        lock(&self.shared.recorded).axis_lookups.push(target);
        self.check_present(target.device)?;
        Ok(Arc::new(MockAxis {
            shared: self.shared.clone(),
            target,
        }))
    }

    async fn device(&self, address: u8) -> DriverResult<Arc<dyn DeviceUnit>> {
        lock(&self.shared.recorded).turret_lookups.push(address);
        self.check_present(address)?;
        Ok(Arc::new(MockDevice { address }))
    }
}

struct MockAxis {
    shared: Arc<Shared>,
    target: Target,
}

#[async_trait]
impl Axis for MockAxis {
    fn target(&self) -> Target {
        self.target
    }

    async fn is_busy(&self) -> DriverResult<bool> {
        let busy = self.shared.axis_busy.load(Ordering::SeqCst);
        Ok(busy || self.shared.tracking.load(Ordering::SeqCst))
    }

    async fn get_setting(&self, name: &str) -> DriverResult<f64> {
        let (min, max) = lock(&self.shared.recorded).native_limits;
        match name {
            LIMIT_MIN_SETTING => Ok(min),
            LIMIT_MAX_SETTING => Ok(max),
            _ => Err(DriverError::Rejected(format!("BADCOMMAND get {name}"))),
        }
    }

    async fn set_setting(&self, name: &str, value: f64) -> DriverResult<()> {
        let mut recorded = lock(&self.shared.recorded);
        match name {
            LIMIT_MIN_SETTING => recorded.native_limits.0 = value,
            LIMIT_MAX_SETTING => recorded.native_limits.1 = value,
            _ => return Err(DriverError::Rejected(format!("BADCOMMAND set {name}"))),
        }
        Ok(())
    }
}

struct MockDevice {
    address: u8,
}

impl DeviceUnit for MockDevice {
    fn address(&self) -> u8 {
        self.address
    }
}

struct MockProvider {
    shared: Arc<Shared>,
}

#[async_trait]
impl AutofocusProvider for MockProvider {
    fn provider_id(&self) -> u32 {
        1
    }

    async fn generic_read(
        &self,
        register: u32,
        _data_size: u32,
        count: u32,
        _offset: u32,
        _data_type: &str,
    ) -> DriverResult<Vec<i32>> {
        if register != 41 {
            return Err(DriverError::Protocol(format!("register {register} not simulated")));
        }
        let raw = self.shared.position_raw.load(Ordering::SeqCst);
        Ok(vec![raw; count as usize])
    }
}

struct MockFocus {
    shared: Arc<Shared>,
    axis: Arc<dyn Axis>,
}

impl MockFocus {
    fn write_limit(&self, which: &'static str, native: f64) -> DriverResult<()> {
        if self.shared.fail_limit_writes.load(Ordering::SeqCst) {
            return Err(DriverError::Transport("limit write timed out".to_string()));
        }
        let mut recorded = lock(&self.shared.recorded);
        recorded.limit_writes.push((which, native));
        match which {
            "min" => recorded.native_limits.0 = native,
            _ => recorded.native_limits.1 = native,
        }
        Ok(())
    }
}

#[async_trait]
impl FocusDriver for MockFocus {
    fn focus_axis(&self) -> Arc<dyn Axis> {
        self.axis.clone()
    }

    async fn status(&self) -> DriverResult<FocusStatus> {
        lock(&self.shared.recorded).status_queries += 1;
        if self.shared.fail_status.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("status reply truncated".to_string()));
        }
        Ok(FocusStatus {
            in_focus: self.shared.in_focus.load(Ordering::SeqCst),
            in_range: true,
        })
    }

    async fn focus_once(&self, scan: bool) -> DriverResult<()> {
        lock(&self.shared.recorded)
            .focus_passes
            .push((self.axis.target(), scan));
        Ok(())
    }

    async fn start_focus_loop(&self) -> DriverResult<()> {
        self.shared.tracking.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_focus_loop(&self) -> DriverResult<()> {
        self.shared.tracking.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_limit_min(&self, native: f64) -> DriverResult<()> {
        self.write_limit("min", native)
    }

    async fn set_limit_max(&self, native: f64) -> DriverResult<()> {
        self.write_limit("max", native)
    }
}

// =============================================================================
// MockSource - Simulated array acquisition source
// =============================================================================

/// Acquisition source producing `u16` ramps of the current ROI size.
///
/// A frame is produced by `trigger` and returned by every following `read`
/// until the next trigger. Reading before any trigger yields a non-array.
pub struct MockSource {
    sensor_width: u32,
    sensor_height: u32,
    width: i64,
    height: i64,
    top: i64,
    left: i64,
    measurement_time: f64,
    gain: f64,
    frame: Option<ArrayView>,
    queued: Option<SourceObject>,
    triggers: usize,
    fail_trigger: bool,
}

impl MockSource {
    /// Full-frame source with a sensor of `width` × `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            sensor_width: width,
            sensor_height: height,
            width: i64::from(width),
            height: i64::from(height),
            top: 0,
            left: 0,
            measurement_time: 10.0,
            gain: 1.0,
            frame: None,
            queued: None,
            triggers: 0,
            fail_trigger: false,
        }
    }

    /// Change the readout size directly, bypassing the camera.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = i64::from(width);
        self.height = i64::from(height);
    }

    /// Return `object` from the next read instead of the triggered frame.
    pub fn queue_object(&mut self, object: SourceObject) {
        self.queued = Some(object);
    }

    /// Start address of the most recently triggered frame.
    pub fn frame_ptr(&self) -> Option<*const u8> {
        self.frame.as_ref().map(|frame| frame.data.as_ptr())
    }

    /// Number of exposures triggered so far.
    pub fn trigger_count(&self) -> usize {
        self.triggers
    }

    /// Make the next triggers fail.
    pub fn set_fail_trigger(&mut self, fail: bool) {
        self.fail_trigger = fail;
    }

    fn render(&self) -> ArrayView {
        let (width, height) = (self.width.max(0) as usize, self.height.max(0) as usize);
        let seed = self.triggers as u16;
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|i| (i as u16).wrapping_add(seed).to_ne_bytes())
            .collect();
        ArrayView::mono16(width, height, Bytes::from(pixels))
    }
}

#[async_trait]
impl AcquisitionSource for MockSource {
    async fn trigger(&mut self) -> anyhow::Result<()> {
        if self.fail_trigger {
            bail!("trigger rejected: acquisition not armed");
        }
        self.triggers += 1;
        self.frame = Some(self.render());
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<SourceObject> {
        if let Some(object) = self.queued.take() {
            return Ok(object);
        }
        Ok(match &self.frame {
            Some(frame) => SourceObject::Array(frame.clone()),
            None => SourceObject::Other("NoneType".to_string()),
        })
    }

    async fn get_attribute(&self, name: &str) -> anyhow::Result<PropertyValue> {
        Ok(match name {
            WIDTH => self.width.into(),
            HEIGHT => self.height.into(),
            TOP => self.top.into(),
            LEFT => self.left.into(),
            MEASUREMENT_TIME => self.measurement_time.into(),
            "gain" => self.gain.into(),
            _ => bail!("source has no attribute '{name}'"),
        })
    }

    async fn set_attribute(&mut self, name: &str, value: PropertyValue) -> anyhow::Result<()> {
        // Give concurrent callers a chance to interleave between fields.
        tokio::task::yield_now().await;

        let Some(number) = value.as_f64() else {
            bail!("attribute '{name}' expects a number, got {value}");
        };
        match name {
            WIDTH => self.width = number as i64,
            HEIGHT => self.height = number as i64,
            TOP => self.top = number as i64,
            LEFT => self.left = number as i64,
            MEASUREMENT_TIME => self.measurement_time = number,
            "gain" => self.gain = number,
            _ => bail!("source has no attribute '{name}'"),
        }
        Ok(())
    }

    fn attributes(&self) -> Vec<PropertySpec> {
        let (w, h) = (f64::from(self.sensor_width), f64::from(self.sensor_height));
        vec![
            PropertySpec::new(WIDTH, self.width).with_limits(1.0, w),
            PropertySpec::new(HEIGHT, self.height).with_limits(1.0, h),
            PropertySpec::new(TOP, self.top).with_limits(0.0, h - 1.0),
            PropertySpec::new(LEFT, self.left).with_limits(0.0, w - 1.0),
            PropertySpec::new(MEASUREMENT_TIME, self.measurement_time).with_limits(0.0, 10_000.0),
            PropertySpec::new("gain", self.gain).with_limits(1.0, 16.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_frames_follow_roi() {
        let mut source = MockSource::new(8, 6);
        source.set_attribute(WIDTH, 4i64.into()).await.unwrap();
        source.trigger().await.unwrap();

        match source.read().await.unwrap() {
            SourceObject::Array(view) => {
                assert_eq!(view.shape, vec![6, 4]);
                assert_eq!(view.data.len(), 6 * 4 * 2);
            }
            SourceObject::Other(name) => panic!("expected array, got {name}"),
        }
    }

    #[tokio::test]
    async fn read_before_trigger_is_not_an_array() {
        let mut source = MockSource::new(8, 6);
        assert!(matches!(
            source.read().await.unwrap(),
            SourceObject::Other(_)
        ));
    }

    #[tokio::test]
    async fn missing_device_is_not_found() {
        let controller = MockController::new();
        controller.remove_device(4);
        let link = controller.open_motion("COM1").await.unwrap();

        assert!(matches!(
            link.axis(Target::new(4, 1)).await,
            Err(DriverError::NotFound(_))
        ));
        assert!(link.axis(Target::new(1, 1)).await.is_ok());
        assert_eq!(controller.axis_lookups().len(), 2);
    }
}
