pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod exposure;
pub mod fits;
pub mod notifier;
pub mod poller;
pub mod sdk;
pub mod system;

pub use camera::{Camera, CameraBackend, CameraFactory, CameraParams, ExposeOptions};
pub use config::BasecamConfig;
pub use error::{BasecamError, Result, SdkError};
pub use events::{CameraEvent, CameraSystemEvent, Event, EventFilter, EventPayload, Notification};
pub use exposure::{Exposure, ImageData, ImageNamer, ImageType, WriteOptions};
pub use fits::{Card, CardGroup, Extension, FitsModel, HeaderModel, MacroCard};
pub use notifier::{EventListener, EventNotifier};
pub use poller::Poller;
pub use sdk::{CameraInfo, SdkVersion, SimulatedSystem, VendorSystem};
pub use system::{CameraOverrides, CameraSystem};
