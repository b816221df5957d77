use super::{AccessMode, CameraInfo, SdkVersion, VendorSystem};
use crate::error::SdkError;
use parking_lot::RwLock;
use tracing::debug;

/// In-process stand-in for the vendor SDK.
///
/// Devices can be plugged and unplugged while a camera system is polling,
/// which is how discovery is exercised without hardware.
pub struct SimulatedSystem {
    version: SdkVersion,
    devices: RwLock<Vec<CameraInfo>>,
    failure: RwLock<Option<SdkError>>,
}

impl SimulatedSystem {
    pub fn new() -> Self {
        Self {
            version: SdkVersion {
                major: 0,
                minor: 1,
                patch: 0,
            },
            devices: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    /// Create a system with `count` devices named `DEV_0001`, `DEV_0002`, ...
    pub fn with_devices(count: usize) -> Self {
        let system = Self::new();
        for index in 1..=count {
            system.plug(Self::device(&format!("DEV_{:04}", index)));
        }
        system
    }

    /// Build a device description whose uid is `id`.
    pub fn device(id: &str) -> CameraInfo {
        CameraInfo {
            id: id.to_string(),
            name: format!("Simulated {}", id),
            model: "SIM-1".to_string(),
            serial: String::new(),
            interface_id: "sim0".to_string(),
            access: AccessMode::Full,
        }
    }

    /// Attach a device. Replaces any device with the same id.
    pub fn plug(&self, info: CameraInfo) {
        debug!("Simulated device plugged: {}", info.id);
        let mut devices = self.devices.write();
        devices.retain(|device| device.id != info.id);
        devices.push(info);
    }

    /// Detach a device by id. Returns whether it was attached.
    pub fn unplug(&self, id: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|device| device.id != id);
        let removed = devices.len() != before;
        if removed {
            debug!("Simulated device unplugged: {}", id);
        }
        removed
    }

    /// Whether a device with this uid is attached.
    pub fn is_attached(&self, uid: &str) -> bool {
        self.devices.read().iter().any(|device| device.uid() == uid)
    }

    /// Make every subsequent enumeration fail with `error` (or succeed again
    /// with `None`).
    pub fn set_failure(&self, error: Option<SdkError>) {
        *self.failure.write() = error;
    }
}

impl Default for SimulatedSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorSystem for SimulatedSystem {
    fn version(&self) -> Result<SdkVersion, SdkError> {
        Ok(self.version)
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, SdkError> {
        if let Some(error) = self.failure.read().clone() {
            return Err(error);
        }
        Ok(self.devices.read().clone())
    }
}
