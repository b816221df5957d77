use crate::config::CameraEntry;
use crate::error::Result;
use crate::events::{Event, EventPayload};
use crate::exposure::Exposure;
use crate::fits::{basic_fits_model, FitsModel};
use crate::notifier::EventNotifier;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Status values reported by a camera (temperature, cooler state, ...).
pub type CameraStatus = Map<String, Value>;

/// Image area as `(x0, x1, y0, y1)`, 1-indexed and inclusive.
pub type Area = (u32, u32, u32, u32);

/// Resolved configuration of a single camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub name: String,
    pub uid: Option<String>,
    pub autoconnect: bool,
    pub shutter: bool,
    pub auto_shutter: bool,
    /// Keep the camera even if the vendor stops listing it.
    pub force: bool,
    pub connection_params: HashMap<String, String>,
}

impl CameraParams {
    pub fn from_entry(name: &str, entry: &CameraEntry) -> Self {
        Self {
            name: name.to_string(),
            uid: Some(entry.uid.clone()),
            autoconnect: entry.autoconnect,
            shutter: entry.shutter,
            auto_shutter: entry.auto_shutter,
            force: false,
            connection_params: entry.connection_params.clone(),
        }
    }

    /// Parameters for a camera missing from the configuration.
    pub fn placeholder(name: Option<&str>, uid: Option<&str>) -> Self {
        Self {
            name: name.or(uid).unwrap_or("unknown").to_string(),
            uid: uid.map(str::to_string),
            autoconnect: false,
            shutter: false,
            auto_shutter: true,
            force: false,
            connection_params: HashMap::new(),
        }
    }
}

/// Emits events on behalf of one camera, filling in its name and uid.
#[derive(Clone)]
pub struct CameraNotifier {
    notifier: EventNotifier,
    name: String,
    uid: Arc<RwLock<Option<String>>>,
}

impl CameraNotifier {
    pub(crate) fn new(notifier: EventNotifier, name: &str, uid: Arc<RwLock<Option<String>>>) -> Self {
        Self {
            notifier,
            name: name.to_string(),
            uid,
        }
    }

    pub fn payload(&self) -> EventPayload {
        EventPayload::for_camera(&self.name, self.uid.read().as_deref())
    }

    pub fn notify<E: Into<Event>>(&self, event: E) {
        self.notifier.notify(event, self.payload());
    }

    pub fn notify_with<E: Into<Event>>(&self, event: E, extra: Map<String, Value>) {
        let mut payload = self.payload();
        payload.extra.extend(extra);
        self.notifier.notify(event, payload);
    }
}

/// Driver for a specific camera model.
///
/// Optional capabilities are exposed through `shutter`, `cooler` and
/// `image_area`; the default implementations report them as missing.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Open the device with the merged connection parameters.
    async fn connect(&mut self, params: &HashMap<String, String>) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Take an image and store it in `exposure.data`. Implementations must
    /// update `obstime` if the integration starts later than the call.
    async fn expose(&mut self, exposure: &mut Exposure) -> Result<()>;

    async fn status(&mut self) -> Result<CameraStatus> {
        Ok(CameraStatus::new())
    }

    /// Unique identifier read from the firmware.
    fn uid(&self) -> Option<String> {
        None
    }

    /// Default data model for images from this camera.
    fn fits_model(&self) -> FitsModel {
        basic_fits_model()
    }

    /// Called once with the notifier for this camera.
    fn attach_notifier(&mut self, _notifier: CameraNotifier) {}

    fn shutter(&mut self) -> Option<&mut dyn Shutter> {
        None
    }

    fn cooler(&mut self) -> Option<&mut dyn Cooler> {
        None
    }

    fn image_area(&mut self) -> Option<&mut dyn ImageArea> {
        None
    }
}

#[async_trait]
pub trait Shutter: Send {
    async fn set_shutter(&mut self, open: bool) -> Result<()>;
    async fn get_shutter(&mut self) -> Result<bool>;
}

#[async_trait]
pub trait Cooler: Send {
    async fn set_temperature(&mut self, temperature: f64) -> Result<()>;
    async fn get_temperature(&mut self) -> Result<f64>;
}

#[async_trait]
pub trait ImageArea: Send {
    async fn get_image_area(&mut self) -> Result<Area>;
    /// `None` restores the full frame.
    async fn set_image_area(&mut self, area: Option<Area>) -> Result<()>;
    async fn get_binning(&mut self) -> Result<(u32, u32)>;
    async fn set_binning(&mut self, hbin: u32, vbin: u32) -> Result<()>;
}

/// Creates backends for the cameras handled by a camera system.
pub trait CameraFactory: Send + Sync {
    fn create(&self, params: &CameraParams) -> Result<Box<dyn CameraBackend>>;
}
