//! Native binding to the Allied Vision Vimba system singleton.

mod sys;

use super::{AccessMode, CameraInfo, SdkVersion, VendorSystem};
use crate::error::SdkError;
use std::ffi::CStr;
use std::mem::size_of;
use std::sync::OnceLock;
use sys::*;
use tracing::{debug, info};

/// Call into VimbaC and turn the return code into a `Result`.
macro_rules! vmbcall {
    ($func:ident $(, $arg:expr)*) => {{
        let code = unsafe { $func($($arg),*) };
        if code == VMB_ERROR_SUCCESS {
            Ok(())
        } else {
            Err(SdkError::from_code(code))
        }
    }};
}

static INSTANCE: OnceLock<Result<VimbaSystem, SdkError>> = OnceLock::new();

/// Handle to the started Vimba API.
///
/// The API is started once per process and never shut down through this
/// handle; the library releases its resources at process exit.
#[derive(Debug, Clone, Copy)]
pub struct VimbaSystem {
    _private: (),
}

impl VimbaSystem {
    /// Start the API on first use and return the shared handle.
    pub fn instance() -> Result<&'static VimbaSystem, SdkError> {
        INSTANCE
            .get_or_init(|| {
                vmbcall!(VmbStartup)?;
                info!("Vimba API started");
                Ok(VimbaSystem { _private: () })
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

/// Copy a C string owned by the SDK. Null maps to an empty string.
fn owned_string(ptr: *const libc::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl VendorSystem for VimbaSystem {
    fn version(&self) -> Result<SdkVersion, SdkError> {
        let mut version = VmbVersionInfo_t::default();
        vmbcall!(
            VmbVersionQuery,
            &mut version,
            size_of::<VmbVersionInfo_t>() as VmbUint32_t
        )?;
        Ok(SdkVersion {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
        })
    }

    fn cameras(&self) -> Result<Vec<CameraInfo>, SdkError> {
        let struct_size = size_of::<VmbCameraInfo_t>() as VmbUint32_t;

        let mut count: VmbUint32_t = 0;
        vmbcall!(
            VmbCamerasList,
            std::ptr::null_mut(),
            0,
            &mut count,
            struct_size
        )?;

        if count == 0 {
            return Ok(Vec::new());
        }

        let mut raw = vec![VmbCameraInfo_t::default(); count as usize];
        let mut found: VmbUint32_t = 0;
        match vmbcall!(
            VmbCamerasList,
            raw.as_mut_ptr(),
            count,
            &mut found,
            struct_size
        ) {
            // A camera appeared between the two calls; the list is still valid.
            Ok(()) | Err(SdkError::MoreData) => {}
            Err(e) => return Err(e),
        }

        let filled = (found.min(count)) as usize;
        debug!("Vimba reported {} camera(s)", filled);

        Ok(raw[..filled]
            .iter()
            .map(|info| CameraInfo {
                id: owned_string(info.cameraIdString),
                name: owned_string(info.cameraName),
                model: owned_string(info.modelName),
                serial: owned_string(info.serialString),
                interface_id: owned_string(info.interfaceIdString),
                access: AccessMode::from_bits(info.permittedAccess),
            })
            .collect())
    }
}
