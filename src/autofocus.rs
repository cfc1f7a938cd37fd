//! Zaber WDI autofocus adapter.
//!
//! The adapter drives a laser autofocus sensor (reached over TCP) together
//! with the Zaber focus stage it corrects (reached over the controller's
//! serial chain). Both links are opened lazily by the adapter's
//! [`ConnectionManager`] from the current pre-init properties.
//!
//! # Properties
//!
//! | Name                             | Kind    | Class      | Default     |
//! |----------------------------------|---------|------------|-------------|
//! | `Zaber Serial Port`              | string  | pre-init   | (empty)     |
//! | `WDI Hostname/IP`                | string  | pre-init   | `Undefined` |
//! | `WDI Port`                       | integer | pre-init   | 27          |
//! | `Focus Stage Device Number`      | integer | pre-init   | 1 (1..=99)  |
//! | `Focus Stage Axis Number`        | integer | pre-init   | 1 (1..=99)  |
//! | `Objective Turret Device Number` | integer | pre-init   | -1 (-1..=99)|
//! | `Limit Min [mm]`                 | float   | always     | from device |
//! | `Limit Max [mm]`                 | float   | always     | from device |
//!
//! The limit properties appear once [`Device::initialize`] has succeeded.
//! Writing a pre-init property drops any live session, whether or not the
//! adapter is initialized; the next device call reconnects with the new
//! values.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::capabilities::{AutoFocus, Device};
use crate::config::AutofocusSettings;
use crate::connection::ConnectionManager;
use crate::driver::{AutofocusProvider, DriverFactory, FocusDriver, Target};
use crate::error::{translate, AdapterError, AdapterResult, HostResult};
use crate::property::{find_spec, Cached, Change, Mutability, PropertySpec, PropertyValue};

/// Native focus-axis units per millimetre.
pub const NATIVE_PER_MM: f64 = 1_000_000.0;

/// Axis setting holding the lower tracking limit.
pub const LIMIT_MIN_SETTING: &str = "motion.tracking.limit.min";
/// Axis setting holding the upper tracking limit.
pub const LIMIT_MAX_SETTING: &str = "motion.tracking.limit.max";

/// Sensor register holding the signed focus position.
const POSITION_REGISTER: u32 = 41;
/// Raw position counts per unit of focus score.
const POSITION_SCALE: f64 = 1024.0;

/// Read-only adapter name property.
pub const NAME: &str = "Name";
/// Read-only adapter description property.
pub const DESCRIPTION: &str = "Description";
/// Serial port of the Zaber controller chain.
pub const SERIAL_PORT: &str = "Zaber Serial Port";
/// Hostname or IP address of the WDI sensor.
pub const WDI_HOST: &str = "WDI Hostname/IP";
/// TCP port of the WDI sensor.
pub const WDI_PORT: &str = "WDI Port";
/// Device address of the focus stage.
pub const FOCUS_DEVICE: &str = "Focus Stage Device Number";
/// Axis number of the focus stage.
pub const FOCUS_AXIS: &str = "Focus Stage Axis Number";
/// Device address of the objective turret; non-positive means none.
pub const TURRET_DEVICE: &str = "Objective Turret Device Number";
/// Lower tracking limit in millimetres.
pub const LIMIT_MIN: &str = "Limit Min [mm]";
/// Upper tracking limit in millimetres.
pub const LIMIT_MAX: &str = "Limit Max [mm]";

const DEVICE_NAME: &str = "WdiAutofocus";
const DEVICE_DESCRIPTION: &str = "Zaber WDI Autofocus device adapter";

/// Handles derived from one successful connection.
///
/// Rebuilt from scratch on every reconnect, so the focus target always
/// matches the pre-init properties the session was opened with.
#[derive(Clone)]
struct WdiSession {
    provider: Arc<dyn AutofocusProvider>,
    focus: Arc<dyn FocusDriver>,
    target: Target,
}

async fn open_session(
    factory: &dyn DriverFactory,
    settings: &AutofocusSettings,
) -> AdapterResult<WdiSession> {
    let target = Target::new(
        address(FOCUS_DEVICE, settings.focus_device)?,
        address(FOCUS_AXIS, settings.focus_axis)?,
    );
    let wdi_port = u16::try_from(settings.wdi_port).map_err(|_| {
        AdapterError::invalid_value(WDI_PORT, format!("{} is not a TCP port", settings.wdi_port))
    })?;

    let link = factory.open_motion(&settings.serial_port).await?;
    let provider = factory.open_provider(&settings.wdi_host, wdi_port).await?;

    let focus_axis = link.axis(target).await?;
    let turret = if settings.turret_device > 0 {
        Some(link.device(address(TURRET_DEVICE, settings.turret_device)?).await?)
    } else {
        None
    };

    let focus = factory.focus_driver(provider.provider_id(), focus_axis, turret);
    debug!(
        %target,
        port = %settings.serial_port,
        host = %settings.wdi_host,
        "autofocus session opened"
    );
    Ok(WdiSession {
        provider,
        focus,
        target,
    })
}

fn address(property: &str, value: i64) -> AdapterResult<u8> {
    u8::try_from(value).map_err(|_| {
        AdapterError::invalid_value(property, format!("{value} is not a device address"))
    })
}

/// Which tracking limit a write targets.
#[derive(Debug, Clone, Copy)]
enum Limit {
    Min,
    Max,
}

/// Everything guarded by the adapter lock.
struct WdiState {
    initialized: bool,
    /// Limit properties are registered on the first successful initialize.
    limits_published: bool,
    settings: AutofocusSettings,
    limit_min: Cached<f64>,
    limit_max: Cached<f64>,
    connection: ConnectionManager<WdiSession>,
}

impl WdiState {
    async fn session(&mut self, factory: &dyn DriverFactory) -> AdapterResult<WdiSession> {
        let settings = &self.settings;
        let session = self
            .connection
            .ensure_connected(|| open_session(factory, settings))
            .await?;
        Ok(session.clone())
    }

    /// Drop any live session so the next call resolves the target again.
    ///
    /// A session can be live before init succeeds (a lazy domain call, or
    /// an initialize that failed after connecting), so this never checks
    /// the initialized flag.
    fn invalidate(&mut self) {
        self.connection.reset();
    }

    fn limit(&mut self, which: Limit) -> &mut Cached<f64> {
        match which {
            Limit::Min => &mut self.limit_min,
            Limit::Max => &mut self.limit_max,
        }
    }

    fn specs(&self) -> Vec<PropertySpec> {
        let defaults = AutofocusSettings::default();
        let mut specs = vec![
            PropertySpec::new(NAME, DEVICE_NAME).read_only(),
            PropertySpec::new(DESCRIPTION, DEVICE_DESCRIPTION).read_only(),
            PropertySpec::new(SERIAL_PORT, defaults.serial_port).pre_init(),
            PropertySpec::new(WDI_HOST, defaults.wdi_host).pre_init(),
            PropertySpec::new(WDI_PORT, defaults.wdi_port).pre_init(),
            PropertySpec::new(FOCUS_DEVICE, defaults.focus_device)
                .pre_init()
                .with_limits(1.0, 99.0),
            PropertySpec::new(FOCUS_AXIS, defaults.focus_axis)
                .pre_init()
                .with_limits(1.0, 99.0),
            PropertySpec::new(TURRET_DEVICE, defaults.turret_device)
                .pre_init()
                .with_limits(-1.0, 99.0),
        ];
        if self.limits_published {
            specs.push(PropertySpec::new(LIMIT_MIN, *self.limit_min.get()));
            specs.push(PropertySpec::new(LIMIT_MAX, *self.limit_max.get()));
        }
        specs
    }

    fn read_property(&self, name: &str) -> AdapterResult<PropertyValue> {
        let value = match name {
            NAME => DEVICE_NAME.into(),
            DESCRIPTION => DEVICE_DESCRIPTION.into(),
            SERIAL_PORT => self.settings.serial_port.clone().into(),
            WDI_HOST => self.settings.wdi_host.clone().into(),
            WDI_PORT => self.settings.wdi_port.into(),
            FOCUS_DEVICE => self.settings.focus_device.into(),
            FOCUS_AXIS => self.settings.focus_axis.into(),
            TURRET_DEVICE => self.settings.turret_device.into(),
            LIMIT_MIN if self.limits_published => (*self.limit_min.get()).into(),
            LIMIT_MAX if self.limits_published => (*self.limit_max.get()).into(),
            _ => return Err(AdapterError::UnknownProperty(name.to_string())),
        };
        Ok(value)
    }

    /// Store a pre-init value. Callers have validated kind and bounds.
    fn write_pre_init(&mut self, name: &str, value: &PropertyValue) -> AdapterResult<()> {
        self.invalidate();
        let text = || value.as_str().map(str::to_string);
        let int = || value.as_i64();
        let stored = match name {
            SERIAL_PORT => text().map(|v| self.settings.serial_port = v),
            WDI_HOST => text().map(|v| self.settings.wdi_host = v),
            WDI_PORT => int().map(|v| self.settings.wdi_port = v),
            FOCUS_DEVICE => int().map(|v| self.settings.focus_device = v),
            FOCUS_AXIS => int().map(|v| self.settings.focus_axis = v),
            TURRET_DEVICE => int().map(|v| self.settings.turret_device = v),
            _ => return Err(AdapterError::UnknownProperty(name.to_string())),
        };
        stored.ok_or_else(|| AdapterError::invalid_value(name, format!("unexpected value {value}")))
    }
}

/// Autofocus adapter for a Zaber focus stage driven by a WDI sensor.
pub struct WdiAutofocus {
    factory: Arc<dyn DriverFactory>,
    state: Mutex<WdiState>,
}

impl WdiAutofocus {
    /// Create an adapter with default pre-init properties.
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self::with_settings(factory, AutofocusSettings::default())
    }

    /// Create an adapter whose pre-init properties start from `settings`.
    pub fn with_settings(factory: Arc<dyn DriverFactory>, settings: AutofocusSettings) -> Self {
        Self {
            factory,
            state: Mutex::new(WdiState {
                initialized: false,
                limits_published: false,
                settings,
                limit_min: Cached::new(0.0),
                limit_max: Cached::new(25.0),
                connection: ConnectionManager::new(DEVICE_NAME),
            }),
        }
    }

    /// Whether the last initialize succeeded and no shutdown followed.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Whether a session is currently live. Never connects.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_connected()
    }

    /// Focus target of the live session, if any.
    pub async fn connected_target(&self) -> Option<Target> {
        let state = self.state.lock().await;
        state.connection.session().map(|session| session.target)
    }

    /// Lock the adapter and make sure a session is live.
    ///
    /// The guard must be held for as long as the session is used.
    async fn connected(&self) -> AdapterResult<(MutexGuard<'_, WdiState>, WdiSession)> {
        let mut state = self.state.lock().await;
        let session = state.session(self.factory.as_ref()).await?;
        Ok((state, session))
    }

    async fn bring_up(&self, state: &mut WdiState) -> AdapterResult<()> {
        let session = state.session(self.factory.as_ref()).await?;
        session.focus.status().await?;

        let axis = session.focus.focus_axis();
        let min = axis.get_setting(LIMIT_MIN_SETTING).await? / NATIVE_PER_MM;
        let max = axis.get_setting(LIMIT_MAX_SETTING).await? / NATIVE_PER_MM;
        state.limit_min.set(min);
        state.limit_max.set(max);
        Ok(())
    }

    async fn focus_pass(&self, scan: bool) -> AdapterResult<()> {
        let (_state, session) = self.connected().await?;
        session.focus.focus_once(scan).await?;
        Ok(())
    }

    async fn tracking(&self, enabled: bool) -> AdapterResult<()> {
        let (_state, session) = self.connected().await?;
        if enabled {
            session.focus.start_focus_loop().await?;
        } else {
            session.focus.stop_focus_loop().await?;
        }
        Ok(())
    }

    async fn axis_busy(&self) -> AdapterResult<bool> {
        let (_state, session) = self.connected().await?;
        Ok(session.focus.focus_axis().is_busy().await?)
    }

    async fn in_focus(&self) -> AdapterResult<bool> {
        let (_state, session) = self.connected().await?;
        let status = session.focus.status().await?;
        debug!(
            in_focus = status.in_focus,
            in_range = status.in_range,
            "autofocus status"
        );
        Ok(status.in_focus)
    }

    /// Signed focus position in sensor units.
    async fn read_position(&self) -> AdapterResult<f64> {
        let (_state, session) = self.connected().await?;
        let raw = session
            .provider
            .generic_read(POSITION_REGISTER, 4, 1, 0, "t")
            .await?;
        let first = raw
            .first()
            .copied()
            .ok_or_else(|| AdapterError::Protocol("empty focus position read".to_string()))?;
        Ok(f64::from(first) / POSITION_SCALE)
    }

    /// Cache first, then write through only when the value changed.
    ///
    /// A failed device write leaves the new value cached.
    async fn write_limit(&self, state: &mut WdiState, which: Limit, mm: f64) -> AdapterResult<()> {
        if state.limit(which).update(mm) == Change::Unchanged {
            debug!(?which, mm, "limit unchanged, skipping device write");
            return Ok(());
        }

        let session = state.session(self.factory.as_ref()).await?;
        let native = mm * NATIVE_PER_MM;
        match which {
            Limit::Min => session.focus.set_limit_min(native).await?,
            Limit::Max => session.focus.set_limit_max(native).await?,
        }
        Ok(())
    }

    async fn apply_property(&self, name: &str, value: &PropertyValue) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        let specs = state.specs();
        let spec = find_spec(&specs, name)?;
        if spec.mutability == Mutability::ReadOnly {
            return Err(AdapterError::invalid_value(name, "property is read-only"));
        }
        spec.validate(value)?;

        match name {
            LIMIT_MIN | LIMIT_MAX => {
                let which = if name == LIMIT_MIN { Limit::Min } else { Limit::Max };
                let mm = value
                    .as_f64()
                    .ok_or_else(|| AdapterError::invalid_value(name, "expected a number"))?;
                self.write_limit(&mut state, which, mm).await
            }
            _ => state.write_pre_init(name, value),
        }
    }
}

#[async_trait]
impl Device for WdiAutofocus {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DEVICE_DESCRIPTION
    }

    async fn initialize(&self) -> HostResult<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        debug!("WdiAutofocus::initialize");

        let result = self.bring_up(&mut state).await;
        if result.is_err() {
            warn!("Attempt to connect to autofocus failed");
        }
        translate("initialize", result)?;

        state.limits_published = true;
        state.initialized = true;
        Ok(())
    }

    async fn shutdown(&self) -> HostResult<()> {
        debug!("WdiAutofocus::shutdown");
        let mut state = self.state.lock().await;
        state.initialized = false;
        state.connection.reset();
        Ok(())
    }

    async fn busy(&self) -> bool {
        debug!("WdiAutofocus::busy");
        translate("busy", self.axis_busy().await).unwrap_or(false)
    }

    async fn property_specs(&self) -> Vec<PropertySpec> {
        self.state.lock().await.specs()
    }

    async fn get_property(&self, name: &str) -> HostResult<PropertyValue> {
        let state = self.state.lock().await;
        translate("get_property", state.read_property(name))
    }

    async fn set_property(&self, name: &str, value: PropertyValue) -> HostResult<()> {
        debug!(property = name, %value, "WdiAutofocus::set_property");
        translate("set_property", self.apply_property(name, &value).await)
    }
}

#[async_trait]
impl AutoFocus for WdiAutofocus {
    async fn full_focus(&self) -> HostResult<()> {
        debug!("WdiAutofocus::full_focus");
        translate("full_focus", self.focus_pass(true).await)
    }

    async fn incremental_focus(&self) -> HostResult<()> {
        debug!("WdiAutofocus::incremental_focus");
        translate("incremental_focus", self.focus_pass(false).await)
    }

    async fn set_continuous_focusing(&self, enabled: bool) -> HostResult<()> {
        debug!(enabled, "WdiAutofocus::set_continuous_focusing");
        translate("set_continuous_focusing", self.tracking(enabled).await)
    }

    /// The tracking loop keeps the focus axis busy, so busy means tracking.
    async fn continuous_focusing(&self) -> HostResult<bool> {
        debug!("WdiAutofocus::continuous_focusing");
        translate("continuous_focusing", self.axis_busy().await)
    }

    async fn is_continuous_focus_locked(&self) -> bool {
        debug!("WdiAutofocus::is_continuous_focus_locked");
        translate("is_continuous_focus_locked", self.in_focus().await).unwrap_or(false)
    }

    async fn current_focus_score(&self) -> HostResult<f64> {
        debug!("WdiAutofocus::current_focus_score");
        translate("current_focus_score", self.read_position().await).map(f64::abs)
    }

    async fn last_focus_score(&self) -> HostResult<f64> {
        self.current_focus_score().await
    }

    async fn offset(&self) -> HostResult<f64> {
        Ok(0.0)
    }

    async fn set_offset(&self, _offset: f64) -> HostResult<()> {
        Ok(())
    }

    async fn auto_set_parameters(&self) -> HostResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::mock::MockController;

    fn adapter() -> (Arc<MockController>, WdiAutofocus) {
        let controller = Arc::new(MockController::new());
        let adapter = WdiAutofocus::new(controller.clone());
        (controller, adapter)
    }

    #[tokio::test]
    async fn limits_are_published_after_initialize() {
        let (controller, adapter) = adapter();
        controller.set_native_limits(2_000_000.0, 18_500_000.0);

        assert_eq!(
            adapter.get_property(LIMIT_MIN).await,
            Err(StatusCode::Error)
        );
        adapter.initialize().await.unwrap();

        assert_eq!(
            adapter.get_property(LIMIT_MIN).await,
            Ok(PropertyValue::Float(2.0))
        );
        assert_eq!(
            adapter.get_property(LIMIT_MAX).await,
            Ok(PropertyValue::Float(18.5))
        );
        let names: Vec<_> = adapter
            .property_specs()
            .await
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert!(names.iter().any(|name| name == LIMIT_MAX));
    }

    #[tokio::test]
    async fn limit_write_converts_to_native_units() {
        let (controller, adapter) = adapter();
        adapter.initialize().await.unwrap();

        adapter.set_property(LIMIT_MAX, 12.25.into()).await.unwrap();
        assert_eq!(controller.limit_writes(), vec![("max", 12_250_000.0)]);
    }

    #[tokio::test]
    async fn pre_init_bounds_are_enforced() {
        let (_controller, adapter) = adapter();
        assert_eq!(
            adapter.set_property(FOCUS_AXIS, 0i64.into()).await,
            Err(StatusCode::InvalidPropertyValue)
        );
        assert_eq!(
            adapter.set_property(TURRET_DEVICE, (-1i64).into()).await,
            Ok(())
        );
        assert_eq!(
            adapter.set_property(NAME, "other".into()).await,
            Err(StatusCode::InvalidPropertyValue)
        );
    }

    #[tokio::test]
    async fn turret_is_resolved_only_when_positive() {
        let (controller, adapter) = adapter();
        adapter.initialize().await.unwrap();
        assert_eq!(controller.turret_lookups(), 0);

        adapter.set_property(TURRET_DEVICE, 3i64.into()).await.unwrap();
        assert!(!adapter.is_connected().await);
        assert!(!adapter.busy().await);
        assert_eq!(controller.turret_lookups(), 1);
    }

    #[tokio::test]
    async fn failed_initialize_stays_uninitialized() {
        let (controller, adapter) = adapter();
        controller.fail_motion_open(true);

        assert_eq!(adapter.initialize().await, Err(StatusCode::Error));
        assert!(!adapter.is_initialized().await);
        assert!(adapter
            .property_specs()
            .await
            .iter()
            .all(|spec| spec.name != LIMIT_MIN));

        controller.fail_motion_open(false);
        adapter.initialize().await.unwrap();
        assert!(adapter.is_initialized().await);
    }

    #[tokio::test]
    async fn shutdown_drops_session() {
        let (controller, adapter) = adapter();
        adapter.initialize().await.unwrap();
        adapter.shutdown().await.unwrap();
        assert!(!adapter.is_connected().await);

        adapter.shutdown().await.unwrap();
        adapter.full_focus().await.unwrap();
        assert_eq!(controller.motion_opens(), 2);
    }
}
