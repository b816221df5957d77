mod backend;
mod interface;
mod simulated;

pub use backend::{
    Area, CameraBackend, CameraFactory, CameraNotifier, CameraParams, CameraStatus, Cooler,
    ImageArea, Shutter,
};
pub use interface::{Camera, ExposeOptions, SET_POINT_POLL_INTERVAL, SET_POINT_TOLERANCE};
pub use simulated::{SimulatedCamera, SimulatedFactory, AMBIENT_TEMPERATURE};
