#[cfg(test)]
mod tests;

use crate::camera::{Camera, CameraFactory, CameraParams};
use crate::config::BasecamConfig;
use crate::error::{BasecamError, Result};
use crate::events::{CameraSystemEvent, EventPayload};
use crate::exposure::{ImageNamer, WriteOptions};
use crate::notifier::EventNotifier;
use crate::poller::Poller;
use crate::sdk::VendorSystem;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Values that take precedence over the configuration when adding a camera.
#[derive(Debug, Clone, Default)]
pub struct CameraOverrides {
    pub autoconnect: Option<bool>,
    pub shutter: Option<bool>,
    pub auto_shutter: Option<bool>,
    pub connection_params: HashMap<String, String>,
}

impl CameraOverrides {
    fn apply(self, params: &mut CameraParams) {
        if let Some(autoconnect) = self.autoconnect {
            params.autoconnect = autoconnect;
        }
        if let Some(shutter) = self.shutter {
            params.shutter = shutter;
        }
        if let Some(auto_shutter) = self.auto_shutter {
            params.auto_shutter = auto_shutter;
        }
        params.connection_params.extend(self.connection_params);
    }
}

/// Keeps track of the cameras attached to a vendor system.
pub struct CameraSystem {
    vendor: Arc<dyn VendorSystem>,
    factory: Arc<dyn CameraFactory>,
    config: BasecamConfig,
    cameras: RwLock<Vec<Arc<Camera>>>,
    // Serializes add/remove so the poller and callers never race.
    membership: tokio::sync::Mutex<()>,
    notifier: EventNotifier,
    poller: tokio::sync::Mutex<Option<Poller>>,
}

impl CameraSystem {
    /// Create a camera system. The configuration is validated first.
    pub fn new(
        vendor: Arc<dyn VendorSystem>,
        factory: Arc<dyn CameraFactory>,
        config: BasecamConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        if let Ok(version) = vendor.version() {
            info!("Camera system using vendor library {}", version);
        }

        Ok(Arc::new(Self {
            vendor,
            factory,
            config,
            cameras: RwLock::new(Vec::new()),
            membership: tokio::sync::Mutex::new(()),
            notifier: EventNotifier::new(),
            poller: tokio::sync::Mutex::new(None),
        }))
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn config(&self) -> &BasecamConfig {
        &self.config
    }

    /// Version of the vendor library.
    pub fn version(&self) -> Option<String> {
        self.vendor.version().ok().map(|version| version.to_string())
    }

    /// Cameras currently handled.
    pub fn cameras(&self) -> Vec<Arc<Camera>> {
        self.cameras.read().clone()
    }

    /// Start background services enabled in the configuration.
    pub async fn start(self: &Arc<Self>) {
        if self.config.system.poll_on_start {
            self.start_camera_poller(None).await;
        }
    }

    /// Configuration for a camera, looked up by name and then by uid.
    pub fn get_camera_config(&self, name: Option<&str>, uid: Option<&str>) -> Option<CameraParams> {
        if let Some(name) = name {
            if let Some(entry) = self.config.cameras.get(name) {
                return Some(CameraParams::from_entry(name, entry));
            }
        }

        let uid = uid?;
        self.config
            .cameras
            .iter()
            .find(|(_, entry)| entry.uid == uid)
            .map(|(name, entry)| CameraParams::from_entry(name, entry))
    }

    /// Start handling a camera.
    ///
    /// Cameras missing from the configuration get placeholder parameters.
    /// If the camera is already handled it is returned unchanged.
    pub async fn add_camera(
        &self,
        name: Option<&str>,
        uid: Option<&str>,
        force: bool,
        overrides: CameraOverrides,
    ) -> Result<Arc<Camera>> {
        if name.is_none() && uid.is_none() {
            return Err(BasecamError::system("either a name or uid is required"));
        }

        let _membership = self.membership.lock().await;

        let mut params = self
            .get_camera_config(name, uid)
            .unwrap_or_else(|| CameraParams::placeholder(name, uid));
        overrides.apply(&mut params);
        params.force = force;

        if let Some(existing) = self.get_camera(Some(&params.name), uid)? {
            warn!("Camera {} is already connected", params.name);
            return Ok(existing);
        }

        debug!("Adding camera {} with parameters {:?}", params.name, params);

        let backend = self.factory.create(&params)?;
        let camera = Arc::new(Camera::new(
            params.clone(),
            backend,
            self.notifier.clone(),
            self.version(),
        ));
        self.configure_writing(&camera).await;

        if params.autoconnect {
            camera.connect(false, HashMap::new()).await?;
        }

        self.cameras.write().push(Arc::clone(&camera));
        info!("Added camera {}", params.name);

        self.notifier.notify(
            CameraSystemEvent::CameraAdded,
            EventPayload::for_camera(&params.name, camera.uid().as_deref())
                .with("force", force)
                .with("autoconnect", params.autoconnect),
        );

        Ok(camera)
    }

    async fn configure_writing(&self, camera: &Camera) {
        let exposure = &self.config.exposure;
        match ImageNamer::new(
            &exposure.basename,
            &exposure.directory,
            exposure.overwrite,
            exposure.reset_sequence,
        ) {
            Ok(namer) => camera.set_image_namer(Some(namer)).await,
            Err(e) => warn!("Image names cannot be generated for {}: {}", camera.name(), e),
        }
        camera.set_write_options(WriteOptions {
            overwrite: exposure.overwrite,
            checksum: exposure.checksum,
            retry: exposure.write_retry,
        });
    }

    /// Shut down and stop handling a camera.
    pub async fn remove_camera(&self, name: Option<&str>, uid: Option<&str>) -> Result<()> {
        let _membership = self.membership.lock().await;

        let camera = self
            .cameras
            .read()
            .iter()
            .find(|camera| {
                name.map(|name| camera.name() == name).unwrap_or(false)
                    || (uid.is_some() && camera.uid().as_deref() == uid)
            })
            .cloned();

        let camera = camera.ok_or_else(|| {
            BasecamError::not_found(format!(
                "camera {} is not connected",
                name.or(uid).unwrap_or("<unnamed>")
            ))
        })?;

        if let Err(e) = camera.shutdown().await {
            warn!("Camera {} did not shut down cleanly: {}", camera.name(), e);
        }

        self.cameras
            .write()
            .retain(|handled| !Arc::ptr_eq(handled, &camera));
        info!("Removed camera {}", camera.name());

        self.notifier.notify(
            CameraSystemEvent::CameraRemoved,
            EventPayload::for_camera(camera.name(), camera.uid().as_deref()),
        );
        Ok(())
    }

    /// Find a handled camera by name or uid.
    ///
    /// Without arguments, returns the only camera if exactly one is handled.
    /// A camera found by name whose uid differs from `uid` is an error.
    pub fn get_camera(&self, name: Option<&str>, uid: Option<&str>) -> Result<Option<Arc<Camera>>> {
        let cameras = self.cameras.read();

        if name.is_none() && uid.is_none() {
            return Ok(match cameras.as_slice() {
                [camera] => Some(Arc::clone(camera)),
                _ => None,
            });
        }

        for camera in cameras.iter() {
            if let Some(name) = name {
                if camera.name() == name {
                    if let Some(uid) = uid {
                        if camera.uid().as_deref() != Some(uid) {
                            return Err(BasecamError::camera(
                                name,
                                format!("camera name does not match uid {}", uid),
                            ));
                        }
                    }
                    return Ok(Some(Arc::clone(camera)));
                }
            }
            if uid.is_some() && camera.uid().as_deref() == uid {
                return Ok(Some(Arc::clone(camera)));
            }
        }
        Ok(None)
    }

    /// Uids of the cameras the vendor library can see.
    pub fn list_available_cameras(&self) -> Result<Vec<String>> {
        let cameras = self.vendor.cameras()?;
        Ok(cameras.iter().map(|info| info.uid().to_string()).collect())
    }

    /// Reconcile the handled cameras with the vendor list.
    pub async fn check_cameras(&self) -> Result<()> {
        let uids = self.list_available_cameras()?;

        let missing: Vec<(String, Option<String>)> = self
            .cameras
            .read()
            .iter()
            .filter(|camera| !camera.force())
            .filter(|camera| match camera.uid() {
                Some(uid) => !uids.contains(&uid),
                None => true,
            })
            .map(|camera| (camera.name().to_string(), camera.uid()))
            .collect();

        for (name, uid) in missing {
            info!(
                "Camera with UID {} ({}) is not connected",
                uid.as_deref().unwrap_or("unknown"),
                name
            );
            if let Err(e) = self.remove_camera(Some(&name), None).await {
                warn!("Failed removing camera {}: {}", name, e);
            }
        }

        let handled: HashSet<String> = self
            .cameras
            .read()
            .iter()
            .filter_map(|camera| camera.uid())
            .collect();

        for uid in uids.iter().filter(|uid| !handled.contains(*uid)) {
            info!("Detected new camera with UID {}", uid);
            if let Err(e) = self
                .add_camera(None, Some(uid), false, CameraOverrides::default())
                .await
            {
                warn!("Failed adding camera {}: {}", uid, e);
            }
        }
        Ok(())
    }

    /// Poll the vendor list and add or remove cameras as they appear or
    /// disappear. `None` uses the configured interval.
    ///
    /// Do not use this if the vendor library reports connection events;
    /// wire those to `on_camera_connected` / `on_camera_disconnected`.
    pub async fn start_camera_poller(self: &Arc<Self>, interval: Option<Duration>) {
        let interval = interval
            .unwrap_or_else(|| Duration::from_secs_f64(self.config.system.poll_interval_seconds));

        let mut poller = self.poller.lock().await;
        let poller = poller.get_or_insert_with(|| {
            let system = Arc::downgrade(self);
            Poller::new(
                "camera_poller",
                move || {
                    let system = system.clone();
                    async move {
                        match system.upgrade() {
                            Some(system) => system.check_cameras().await,
                            None => Ok(()),
                        }
                    }
                },
                interval,
            )
        });

        poller.start(Some(interval)).await;
        info!("Started camera poller every {:?}", interval);
    }

    pub async fn stop_camera_poller(&self) {
        if let Some(poller) = self.poller.lock().await.as_ref() {
            poller.stop().await;
        }
    }

    pub async fn is_polling(&self) -> bool {
        match self.poller.lock().await.as_ref() {
            Some(poller) => poller.is_running().await,
            None => false,
        }
    }

    /// Handler for vendor "camera connected" events.
    pub fn on_camera_connected(self: &Arc<Self>, uid: &str) -> JoinHandle<Result<Arc<Camera>>> {
        let system = Arc::clone(self);
        let uid = uid.to_string();
        tokio::spawn(async move {
            system
                .add_camera(None, Some(&uid), false, CameraOverrides::default())
                .await
        })
    }

    /// Handler for vendor "camera disconnected" events.
    pub fn on_camera_disconnected(self: &Arc<Self>, uid: &str) -> JoinHandle<Result<()>> {
        let system = Arc::clone(self);
        let uid = uid.to_string();
        tokio::spawn(async move { system.remove_camera(None, Some(&uid)).await })
    }

    /// Stop the poller and shut down every camera.
    pub async fn shutdown(&self) {
        self.stop_camera_poller().await;

        for camera in self.cameras() {
            if let Err(e) = camera.shutdown().await {
                warn!("Failed shutting down camera {}: {}", camera.name(), e);
            }
        }
        info!("Camera system shut down");
    }
}
