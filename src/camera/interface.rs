use super::backend::{Area, CameraBackend, CameraNotifier, CameraParams, CameraStatus};
use crate::error::{BasecamError, Result};
use crate::events::CameraEvent;
use crate::exposure::{CameraIdentity, Exposure, ImageNamer, ImageType, WriteOptions};
use crate::fits::{Context, FitsModel};
use crate::notifier::EventNotifier;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Temperature tolerance for a set point to count as reached, in degC.
pub const SET_POINT_TOLERANCE: f64 = 0.1;

/// Interval between temperature checks while waiting for a set point.
pub const SET_POINT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type SharedBackend = Arc<tokio::sync::Mutex<Box<dyn CameraBackend>>>;

/// Options for [`Camera::expose`].
#[derive(Debug, Clone, Default)]
pub struct ExposeOptions {
    /// Overrides the camera data model for this exposure.
    pub fits_model: Option<FitsModel>,
    pub filename: Option<PathBuf>,
    /// Write the image to disk once read.
    pub write: bool,
    /// Values for the FITS model placeholders.
    pub context: Context,
}

struct SetPointWaiter {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A camera handled by a camera system.
pub struct Camera {
    name: String,
    params: CameraParams,
    version: Option<String>,
    backend: SharedBackend,
    events: CameraNotifier,
    connected: AtomicBool,
    uid: Arc<RwLock<Option<String>>>,
    status: tokio::sync::Mutex<Option<CameraStatus>>,
    fits_model: RwLock<Option<FitsModel>>,
    image_namer: tokio::sync::Mutex<Option<ImageNamer>>,
    write_options: RwLock<WriteOptions>,
    set_point: Mutex<Option<SetPointWaiter>>,
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.name)
            .field("uid", &*self.uid.read())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Camera {
    pub fn new(
        params: CameraParams,
        mut backend: Box<dyn CameraBackend>,
        notifier: EventNotifier,
        version: Option<String>,
    ) -> Self {
        let uid = Arc::new(RwLock::new(params.uid.clone()));
        let events = CameraNotifier::new(notifier, &params.name, Arc::clone(&uid));
        backend.attach_notifier(events.clone());

        Self {
            name: params.name.clone(),
            params,
            version,
            backend: Arc::new(tokio::sync::Mutex::new(backend)),
            events,
            connected: AtomicBool::new(false),
            uid,
            status: tokio::sync::Mutex::new(None),
            fits_model: RwLock::new(None),
            image_namer: tokio::sync::Mutex::new(None),
            write_options: RwLock::new(WriteOptions::default()),
            set_point: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &CameraParams {
        &self.params
    }

    /// Whether the camera stays handled when the vendor stops listing it.
    pub fn force(&self) -> bool {
        self.params.force
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn has_shutter(&self) -> bool {
        self.params.shutter
    }

    /// Unique identifier: the firmware uid once connected, else the
    /// configured one.
    pub fn uid(&self) -> Option<String> {
        self.uid.read().clone()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn identity(&self) -> CameraIdentity {
        CameraIdentity {
            name: self.name.clone(),
            uid: self.uid(),
            version: self.version.clone(),
        }
    }

    /// Replace the default data model of this camera.
    pub fn set_fits_model(&self, model: Option<FitsModel>) {
        *self.fits_model.write() = model;
    }

    /// Namer used for exposures written without an explicit file name.
    pub async fn set_image_namer(&self, namer: Option<ImageNamer>) {
        *self.image_namer.lock().await = namer;
    }

    pub fn set_write_options(&self, options: WriteOptions) {
        *self.write_options.write() = options;
    }

    fn error_payload(error: &BasecamError) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("error".to_string(), Value::from(error.to_string()));
        extra
    }

    /// Connect the camera.
    ///
    /// `overrides` are merged on top of the configured connection parameters.
    pub async fn connect(&self, force: bool, overrides: HashMap<String, String>) -> Result<()> {
        if self.is_connected() && !force {
            return Err(BasecamError::connection(
                &self.name,
                "the camera is already connected",
            ));
        }

        let mut params = self.params.connection_params.clone();
        params.extend(overrides);

        let result = {
            let mut backend = self.backend.lock().await;
            backend.connect(&params).await.map(|_| backend.uid())
        };

        let firmware_uid = match result {
            Ok(uid) => uid,
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                let e = match e {
                    BasecamError::Connection { .. } => e,
                    other => BasecamError::connection(&self.name, other.to_string()),
                };
                warn!(camera = %self.name, "Connection failed: {}", e);
                self.events
                    .notify_with(CameraEvent::CameraConnectFailed, Self::error_payload(&e));
                return Err(e);
            }
        };

        match (&firmware_uid, &self.params.uid) {
            (Some(firmware), Some(configured)) if firmware != configured => {
                self.connected.store(false, Ordering::Relaxed);
                if let Err(e) = self.backend.lock().await.disconnect().await {
                    warn!(camera = %self.name, "Failed closing mismatched camera: {}", e);
                }
                let e = BasecamError::connection(
                    &self.name,
                    format!(
                        "mismatch between config UID {} and camera UID {}",
                        configured, firmware
                    ),
                );
                self.events
                    .notify_with(CameraEvent::CameraConnectFailed, Self::error_payload(&e));
                return Err(e);
            }
            (Some(firmware), _) => *self.uid.write() = Some(firmware.clone()),
            (None, None) => {
                warn!(camera = %self.name, "Camera connected but a UID is not available");
            }
            (None, Some(_)) => {}
        }

        self.connected.store(true, Ordering::Relaxed);
        info!(camera = %self.name, "Camera connected");
        self.events.notify(CameraEvent::CameraConnected);
        Ok(())
    }

    /// Camera status. The cached value is returned unless `update` is set.
    pub async fn status(&self, update: bool) -> Result<CameraStatus> {
        let mut cached = self.status.lock().await;
        if update || cached.is_none() {
            let status = self.backend.lock().await.status().await?;
            *cached = Some(status);
        }
        Ok(cached.clone().unwrap_or_default())
    }

    /// Take an exposure.
    ///
    /// Negative exposure times are rejected and bias frames are always taken
    /// with zero exposure time.
    pub async fn expose(
        &self,
        exptime: f64,
        image_type: ImageType,
        options: ExposeOptions,
    ) -> Result<Exposure> {
        if exptime < 0.0 {
            return Err(BasecamError::exposure(&self.name, "exposure time cannot be < 0"));
        }

        let exptime = if image_type == ImageType::Bias && exptime > 0.0 {
            warn!(camera = %self.name, "Setting exposure time for bias to 0");
            0.0
        } else {
            exptime
        };

        let fits_model = match options.fits_model {
            Some(model) => model,
            None => self.default_fits_model().await,
        };

        let mut exposure = Exposure::new(Some(self.identity()), Some(fits_model));
        exposure.exptime = Some(exptime);
        exposure.exptime_n = Some(exptime);
        exposure.image_type = Some(image_type);
        exposure.filename = options.filename;

        debug!(camera = %self.name, "Exposing {} for {} s", image_type, exptime);

        if let Err(e) = self.run_exposure(&mut exposure).await {
            let e = match e {
                BasecamError::Exposure { .. } => e,
                other => BasecamError::exposure(&self.name, other.to_string()),
            };
            self.events
                .notify_with(CameraEvent::ExposureFailed, Self::error_payload(&e));
            return Err(e);
        }

        if exposure.data.is_none() {
            let e = BasecamError::exposure(&self.name, "data was not taken");
            self.events
                .notify_with(CameraEvent::ExposureFailed, Self::error_payload(&e));
            return Err(e);
        }

        self.events.notify(CameraEvent::ExposureRead);

        if options.write {
            self.write_exposure(&mut exposure, &options.context).await?;
        }

        Ok(exposure)
    }

    async fn default_fits_model(&self) -> FitsModel {
        let configured = self.fits_model.read().clone();
        match configured {
            Some(model) => model,
            None => self.backend.lock().await.fits_model(),
        }
    }

    /// Drive the shutter around the backend exposure when the firmware does
    /// not do it.
    async fn run_exposure(&self, exposure: &mut Exposure) -> Result<()> {
        let manual_shutter = self.params.shutter && !self.params.auto_shutter;
        let open = !exposure.image_type.map(|t| t.is_dark()).unwrap_or(false);

        let mut backend = self.backend.lock().await;
        if manual_shutter {
            if let Some(shutter) = backend.shutter() {
                shutter.set_shutter(open).await?;
            }
        }

        let result = backend.expose(exposure).await;

        if manual_shutter && open {
            if let Some(shutter) = backend.shutter() {
                shutter.set_shutter(false).await?;
            }
        }
        result
    }

    async fn write_exposure(&self, exposure: &mut Exposure, context: &Context) -> Result<()> {
        if exposure.filename.is_none() {
            let identity = self.identity();
            let mut namer = self.image_namer.lock().await;
            if let Some(namer) = namer.as_mut() {
                exposure.filename = Some(namer.next_path(Some(&identity)).await?);
            }
        }

        self.events.notify(CameraEvent::ExposureWriting);
        let options = *self.write_options.read();
        match exposure.write(None, context, options).await {
            Ok(_) => {
                let filename = exposure
                    .filename
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                info!(camera = %self.name, "Exposure written to {}", filename);
                let mut extra = Map::new();
                extra.insert("filename".to_string(), Value::from(filename));
                self.events.notify_with(CameraEvent::ExposureWritten, extra);
                Ok(())
            }
            Err(e) => {
                self.events
                    .notify_with(CameraEvent::ExposureFailed, Self::error_payload(&e));
                Err(e)
            }
        }
    }

    pub async fn bias(&self, options: ExposeOptions) -> Result<Exposure> {
        self.expose(0.0, ImageType::Bias, options).await
    }

    pub async fn dark(&self, exptime: f64, options: ExposeOptions) -> Result<Exposure> {
        self.expose(exptime, ImageType::Dark, options).await
    }

    pub async fn flat(&self, exptime: f64, options: ExposeOptions) -> Result<Exposure> {
        self.expose(exptime, ImageType::Flat, options).await
    }

    pub async fn object(&self, exptime: f64, options: ExposeOptions) -> Result<Exposure> {
        self.expose(exptime, ImageType::Object, options).await
    }

    /// Disconnect the camera.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_set_point_waiter();

        let result = self.backend.lock().await.disconnect().await;
        match result {
            Ok(()) => {
                self.connected.store(false, Ordering::Relaxed);
                info!(camera = %self.name, "Camera has been disconnected");
                self.events.notify(CameraEvent::CameraDisconnected);
                Ok(())
            }
            Err(e) => {
                warn!(camera = %self.name, "Failed disconnecting camera: {}", e);
                self.events
                    .notify_with(CameraEvent::CameraDisconnectFailed, Self::error_payload(&e));
                Err(e)
            }
        }
    }

    // Shutter

    /// Move the shutter. Unless `force`, nothing is sent if the shutter is
    /// already in position.
    pub async fn set_shutter(&self, open: bool, force: bool) -> Result<()> {
        let mut backend = self.backend.lock().await;
        let shutter = backend
            .shutter()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "shutter"))?;

        if !force && shutter.get_shutter().await? == open {
            debug!(camera = %self.name, "Shutter already in position");
            return Ok(());
        }
        shutter.set_shutter(open).await
    }

    pub async fn open_shutter(&self) -> Result<()> {
        self.set_shutter(true, false).await
    }

    pub async fn close_shutter(&self) -> Result<()> {
        self.set_shutter(false, false).await
    }

    /// Whether the shutter is open.
    pub async fn get_shutter(&self) -> Result<bool> {
        let mut backend = self.backend.lock().await;
        let shutter = backend
            .shutter()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "shutter"))?;
        shutter.get_shutter().await
    }

    // Cooler

    /// Set the temperature set point, in degC.
    ///
    /// Returns once the set point is commanded; `SetPointReached` is emitted
    /// when the temperature gets within tolerance. A new set point cancels
    /// the previous wait.
    pub async fn set_temperature(&self, temperature: f64) -> Result<()> {
        self.cancel_set_point_waiter();

        {
            let mut backend = self.backend.lock().await;
            let cooler = backend
                .cooler()
                .ok_or_else(|| BasecamError::unsupported(&self.name, "cooler"))?;
            cooler.set_temperature(temperature).await?;
        }

        // NewSetPoint is queued before the waiter exists so it is always seen first.
        let mut extra = Map::new();
        extra.insert("temperature".to_string(), json!(temperature));
        self.events.notify_with(CameraEvent::NewSetPoint, extra);

        let token = CancellationToken::new();
        let handle = tokio::spawn(wait_for_set_point(
            self.name.clone(),
            Arc::clone(&self.backend),
            self.events.clone(),
            temperature,
            token.clone(),
        ));
        *self.set_point.lock() = Some(SetPointWaiter { token, handle });
        Ok(())
    }

    pub async fn get_temperature(&self) -> Result<f64> {
        let mut backend = self.backend.lock().await;
        let cooler = backend
            .cooler()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "cooler"))?;
        cooler.get_temperature().await
    }

    fn cancel_set_point_waiter(&self) {
        if let Some(waiter) = self.set_point.lock().take() {
            waiter.token.cancel();
            waiter.handle.abort();
        }
    }

    // Image area

    pub async fn get_image_area(&self) -> Result<Area> {
        let mut backend = self.backend.lock().await;
        let area = backend
            .image_area()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "image area"))?;
        area.get_image_area().await
    }

    /// Set the image area, 1-indexed and inclusive. `None` restores the full
    /// frame.
    pub async fn set_image_area(&self, region: Option<Area>) -> Result<()> {
        if let Some((x0, x1, y0, y1)) = region {
            if x0 < 1 || y0 < 1 || x1 < x0 || y1 < y0 {
                return Err(BasecamError::camera(
                    &self.name,
                    format!("invalid image area ({}, {}, {}, {})", x0, x1, y0, y1),
                ));
            }
        }

        let mut backend = self.backend.lock().await;
        let area = backend
            .image_area()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "image area"))?;
        area.set_image_area(region).await
    }

    pub async fn get_binning(&self) -> Result<(u32, u32)> {
        let mut backend = self.backend.lock().await;
        let area = backend
            .image_area()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "image area"))?;
        area.get_binning().await
    }

    /// Set the binning. The vertical binning defaults to the horizontal one.
    pub async fn set_binning(&self, hbin: u32, vbin: Option<u32>) -> Result<()> {
        let vbin = vbin.unwrap_or(hbin);
        if hbin < 1 || vbin < 1 {
            return Err(BasecamError::camera(
                &self.name,
                format!("invalid binning ({}, {})", hbin, vbin),
            ));
        }

        let mut backend = self.backend.lock().await;
        let area = backend
            .image_area()
            .ok_or_else(|| BasecamError::unsupported(&self.name, "image area"))?;
        area.set_binning(hbin, vbin).await
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.cancel_set_point_waiter();
    }
}

async fn wait_for_set_point(
    name: String,
    backend: SharedBackend,
    events: CameraNotifier,
    target: f64,
    token: CancellationToken,
) {
    loop {
        let current = {
            let mut backend = backend.lock().await;
            match backend.cooler() {
                Some(cooler) => cooler.get_temperature().await,
                None => return,
            }
        };

        match current {
            Ok(current) if (current - target).abs() <= SET_POINT_TOLERANCE => break,
            Ok(_) => {}
            Err(e) => {
                warn!(camera = %name, "Failed reading temperature: {}", e);
                return;
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(SET_POINT_POLL_INTERVAL) => {}
        }
    }

    info!(camera = %name, "Set point {} degC reached", target);
    let mut extra = Map::new();
    extra.insert("temperature".to_string(), json!(target));
    events.notify_with(CameraEvent::SetPointReached, extra);
}
