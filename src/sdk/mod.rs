//! Boundary adapter for the vendor camera SDK.
//!
//! The SDK owns device discovery, transport handling, and frame acquisition.
//! This module only forwards the two calls the rest of the crate needs:
//! obtaining the SDK system handle and enumerating the cameras it sees.

mod simulated;
#[cfg(feature = "vimba")]
pub mod vimba;

pub use simulated::SimulatedSystem;
#[cfg(feature = "vimba")]
pub use vimba::VimbaSystem;

use crate::error::SdkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access modes a device reports as permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    None,
    Full,
    Read,
    Config,
    Lite,
}

impl AccessMode {
    /// Decode the vendor's access bit mask, preferring the widest mode.
    pub fn from_bits(bits: u32) -> Self {
        if bits & 0x1 != 0 {
            AccessMode::Full
        } else if bits & 0x4 != 0 {
            AccessMode::Config
        } else if bits & 0x8 != 0 {
            AccessMode::Lite
        } else if bits & 0x2 != 0 {
            AccessMode::Read
        } else {
            AccessMode::None
        }
    }
}

/// A device as reported by the vendor SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub model: String,
    pub serial: String,
    pub interface_id: String,
    pub access: AccessMode,
}

impl CameraInfo {
    /// The identifier used to match the device against the configuration:
    /// the serial number when the SDK reports one, else the device id.
    pub fn uid(&self) -> &str {
        if self.serial.is_empty() {
            &self.id
        } else {
            &self.serial
        }
    }
}

/// Version of the vendor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The vendor system singleton as seen from this crate.
///
/// Implementations forward straight into the SDK. Errors from the SDK are
/// returned as-is; no retries or caching happen here.
pub trait VendorSystem: Send + Sync {
    /// Version of the underlying library.
    fn version(&self) -> Result<SdkVersion, SdkError>;

    /// Cameras currently visible to the SDK.
    fn cameras(&self) -> Result<Vec<CameraInfo>, SdkError>;
}
