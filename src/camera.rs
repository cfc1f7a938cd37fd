//! Camera adapter over an array-producing acquisition source.
//!
//! The source is an opaque object with named attributes (`width`, `height`,
//! `top`, `left`, `measurement_time`, and whatever else it chooses to
//! publish), a `trigger` that starts an exposure, and a `read` that returns
//! the latest frame. [`ArrayCamera`] republishes the attributes as host
//! properties and turns frames into validated, zero-copy image buffers.
//!
//! One lock guards the source. ROI groups, frame fetch-and-validate and
//! property access all run under it, so the host never sees a torn ROI or a
//! frame validated against half-updated geometry. The accepted frame lives
//! in a separate slot so a caller holding an [`ImageBuffer`] does not stall
//! ROI or trigger calls.

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::capabilities::{Camera, Device, Roi};
use crate::config::CameraSettings;
use crate::error::{translate, AdapterError, AdapterResult, HostResult};
use crate::frame::{validate_frame, ArrayView, FrameGeometry, ImageBuffer, SourceObject, BIT_DEPTH};
use crate::property::{find_spec, Mutability, PropertySpec, PropertyValue};

/// Attribute holding the ROI width in pixels.
pub const WIDTH: &str = "width";
/// Attribute holding the ROI height in pixels.
pub const HEIGHT: &str = "height";
/// Attribute holding the ROI vertical offset.
pub const TOP: &str = "top";
/// Attribute holding the ROI horizontal offset.
pub const LEFT: &str = "left";
/// Attribute holding the exposure time in milliseconds.
pub const MEASUREMENT_TIME: &str = "measurement_time";

const NAME: &str = "Name";
const DESCRIPTION: &str = "Description";

/// An object that produces 2-D frames on demand.
///
/// Failures carry free-form context; the camera wraps them into
/// [`AdapterError::Acquisition`].
#[async_trait]
pub trait AcquisitionSource: Send + Sync {
    /// Start an exposure. Must return before readout completes.
    async fn trigger(&mut self) -> anyhow::Result<()>;

    /// Most recent frame; may wait for a pending exposure to finish.
    async fn read(&mut self) -> anyhow::Result<SourceObject>;

    /// Current value of a named attribute.
    async fn get_attribute(&self, name: &str) -> anyhow::Result<PropertyValue>;

    /// Write a named attribute.
    async fn set_attribute(&mut self, name: &str, value: PropertyValue) -> anyhow::Result<()>;

    /// Descriptions of every attribute the source publishes.
    fn attributes(&self) -> Vec<PropertySpec>;
}

fn acquisition(err: anyhow::Error) -> AdapterError {
    AdapterError::Acquisition(format!("{err:#}"))
}

struct CameraState<S> {
    source: S,
    initialized: bool,
}

impl<S: AcquisitionSource> CameraState<S> {
    async fn integer(&self, name: &str) -> AdapterResult<u32> {
        let value = self
            .source
            .get_attribute(name)
            .await
            .with_context(|| format!("reading '{name}'"))
            .map_err(acquisition)?;
        value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| AdapterError::Protocol(format!("'{name}' is not a pixel count: {value}")))
    }

    async fn write(&mut self, name: &str, value: impl Into<PropertyValue>) -> AdapterResult<()> {
        self.source
            .set_attribute(name, value.into())
            .await
            .with_context(|| format!("writing '{name}'"))
            .map_err(acquisition)
    }

    async fn geometry(&self) -> AdapterResult<FrameGeometry> {
        Ok(FrameGeometry {
            width: self.integer(WIDTH).await? as usize,
            height: self.integer(HEIGHT).await? as usize,
        })
    }

    /// Width, height, top, left, in that order, under the caller's guard.
    async fn apply_roi(&mut self, roi: Roi) -> AdapterResult<()> {
        self.write(WIDTH, i64::from(roi.width)).await?;
        self.write(HEIGHT, i64::from(roi.height)).await?;
        self.write(TOP, i64::from(roi.y)).await?;
        self.write(LEFT, i64::from(roi.x)).await
    }

    async fn full_frame(&self) -> AdapterResult<Roi> {
        let specs = self.source.attributes();
        let lower = |name: &str| {
            specs
                .iter()
                .find(|spec| spec.name == name)
                .and_then(PropertySpec::lower_limit)
        };
        let upper = |name: &str| {
            specs
                .iter()
                .find(|spec| spec.name == name)
                .and_then(PropertySpec::upper_limit)
        };

        let width = match upper(WIDTH) {
            Some(max) => max as u32,
            None => self.integer(WIDTH).await?,
        };
        let height = match upper(HEIGHT) {
            Some(max) => max as u32,
            None => self.integer(HEIGHT).await?,
        };
        Ok(Roi {
            x: lower(LEFT).unwrap_or(0.0) as u32,
            y: lower(TOP).unwrap_or(0.0) as u32,
            width,
            height,
        })
    }

    async fn fetch_and_validate(&mut self) -> AdapterResult<ArrayView> {
        let object = self
            .source
            .read()
            .await
            .context("reading 'image'")
            .map_err(acquisition)?;
        let geometry = self.geometry().await?;
        validate_frame(object, geometry)
    }
}

/// Camera backed by an [`AcquisitionSource`].
pub struct ArrayCamera<S> {
    name: String,
    description: String,
    state: Mutex<CameraState<S>>,
    last_image: Mutex<Option<ArrayView>>,
    exposure_tx: watch::Sender<f64>,
}

impl<S: AcquisitionSource> ArrayCamera<S> {
    /// Create a camera named `name` over `source`.
    pub fn new(name: impl Into<String>, source: S) -> Self {
        let (exposure_tx, _) = watch::channel(0.0);
        Self {
            name: name.into(),
            description: "Camera backed by an array acquisition source".to_string(),
            state: Mutex::new(CameraState {
                source,
                initialized: false,
            }),
            last_image: Mutex::new(None),
            exposure_tx,
        }
    }

    /// Create a camera registered under the configured label.
    pub fn from_settings(settings: &CameraSettings, source: S) -> Self {
        Self::new(settings.label.as_str(), source)
    }

    /// Receive every exposure the host sets, as it is applied.
    pub fn subscribe_exposure(&self) -> watch::Receiver<f64> {
        self.exposure_tx.subscribe()
    }

    /// Run `f` against the source while holding the camera lock.
    pub async fn with_source<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state.source)
    }

    async fn locked(&self) -> MutexGuard<'_, CameraState<S>> {
        self.state.lock().await
    }
}

#[async_trait]
impl<S: AcquisitionSource> Device for ArrayCamera<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn initialize(&self) -> HostResult<()> {
        debug!(device = %self.name, "initialize");
        let mut state = self.locked().await;
        if state.initialized {
            return Ok(());
        }
        let geometry = translate("initialize", state.geometry().await)?;
        state.initialized = true;
        info!(
            device = %self.name,
            width = geometry.width,
            height = geometry.height,
            "camera initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> HostResult<()> {
        debug!(device = %self.name, "shutdown");
        self.locked().await.initialized = false;
        self.last_image.lock().await.take();
        Ok(())
    }

    async fn busy(&self) -> bool {
        false
    }

    async fn property_specs(&self) -> Vec<PropertySpec> {
        let state = self.locked().await;
        let mut specs = vec![
            PropertySpec::new(NAME, self.name.as_str()).read_only(),
            PropertySpec::new(DESCRIPTION, self.description.as_str()).read_only(),
        ];
        specs.extend(state.source.attributes());
        specs
    }

    async fn get_property(&self, name: &str) -> HostResult<PropertyValue> {
        match name {
            NAME => return Ok(self.name.as_str().into()),
            DESCRIPTION => return Ok(self.description.as_str().into()),
            _ => {}
        }
        let state = self.locked().await;
        let result = async {
            find_spec(&state.source.attributes(), name)?;
            state
                .source
                .get_attribute(name)
                .await
                .map_err(acquisition)
        }
        .await;
        translate("get_property", result)
    }

    async fn set_property(&self, name: &str, value: PropertyValue) -> HostResult<()> {
        debug!(device = %self.name, property = name, %value, "set property");
        let mut state = self.locked().await;
        let result = async {
            if name == NAME || name == DESCRIPTION {
                return Err(AdapterError::invalid_value(name, "property is read-only"));
            }
            let specs = state.source.attributes();
            let spec = find_spec(&specs, name)?;
            if spec.mutability == Mutability::ReadOnly {
                return Err(AdapterError::invalid_value(name, "property is read-only"));
            }
            spec.validate(&value)?;
            state.write(name, value.clone()).await
        }
        .await;
        drop(state);
        translate("set_property", result)?;

        if name == MEASUREMENT_TIME {
            if let Some(exposure) = value.as_f64() {
                self.exposure_tx.send_replace(exposure);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: AcquisitionSource> Camera for ArrayCamera<S> {
    async fn snap_image(&self) -> HostResult<()> {
        debug!(device = %self.name, "snap image");
        let mut state = self.locked().await;
        let result = state
            .source
            .trigger()
            .await
            .context("trigger")
            .map_err(acquisition);
        translate("snap_image", result)
    }

    async fn image_buffer<'a>(&'a self) -> Option<ImageBuffer<'a>> {
        let frame = {
            let mut state = self.locked().await;
            translate("image_buffer", state.fetch_and_validate().await).ok()?
        };
        let slot = self.last_image.lock().await;
        Some(ImageBuffer::new(MutexGuard::map(slot, |slot| {
            slot.insert(frame)
        })))
    }

    async fn image_width(&self) -> HostResult<u32> {
        let state = self.locked().await;
        translate("image_width", state.integer(WIDTH).await)
    }

    async fn image_height(&self) -> HostResult<u32> {
        let state = self.locked().await;
        translate("image_height", state.integer(HEIGHT).await)
    }

    fn bytes_per_pixel(&self) -> u32 {
        (BIT_DEPTH + 7) / 8
    }

    fn bit_depth(&self) -> u32 {
        BIT_DEPTH
    }

    async fn image_buffer_size(&self) -> HostResult<usize> {
        let state = self.locked().await;
        let geometry = translate("image_buffer_size", state.geometry().await)?;
        Ok(geometry.width * geometry.height * self.bytes_per_pixel() as usize)
    }

    async fn set_roi(&self, roi: Roi) -> HostResult<()> {
        debug!(device = %self.name, ?roi, "set roi");
        if roi.is_full_frame_request() {
            return self.clear_roi().await;
        }
        let mut state = self.locked().await;
        translate("set_roi", state.apply_roi(roi).await)
    }

    async fn roi(&self) -> HostResult<Roi> {
        let state = self.locked().await;
        let result = async {
            Ok(Roi {
                width: state.integer(WIDTH).await?,
                height: state.integer(HEIGHT).await?,
                x: state.integer(LEFT).await?,
                y: state.integer(TOP).await?,
            })
        }
        .await;
        translate("roi", result)
    }

    async fn clear_roi(&self) -> HostResult<()> {
        debug!(device = %self.name, "clear roi");
        let mut state = self.locked().await;
        let result = async {
            let full = state.full_frame().await?;
            state.apply_roi(full).await
        }
        .await;
        translate("clear_roi", result)
    }

    async fn exposure(&self) -> HostResult<f64> {
        let state = self.locked().await;
        let result = async {
            let value = state
                .source
                .get_attribute(MEASUREMENT_TIME)
                .await
                .map_err(acquisition)?;
            value.as_f64().ok_or_else(|| {
                AdapterError::Protocol(format!("'{MEASUREMENT_TIME}' is not numeric: {value}"))
            })
        }
        .await;
        translate("exposure", result)
    }

    async fn set_exposure(&self, exposure_ms: f64) -> HostResult<()> {
        debug!(device = %self.name, exposure_ms, "set exposure");
        {
            let mut state = self.locked().await;
            translate("set_exposure", state.write(MEASUREMENT_TIME, exposure_ms).await)?;
        }
        self.exposure_tx.send_replace(exposure_ms);
        Ok(())
    }

    fn binning(&self) -> i32 {
        1
    }

    async fn set_binning(&self, binning: i32) -> HostResult<()> {
        let result = if binning == 1 {
            Ok(())
        } else {
            Err(AdapterError::Configuration(format!(
                "binning {binning} is not supported, only 1"
            )))
        };
        translate("set_binning", result)
    }

    fn is_exposure_sequenceable(&self) -> bool {
        true
    }
}
