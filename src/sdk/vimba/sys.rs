//! Raw declarations for the VimbaC library.

#![allow(non_camel_case_types, non_snake_case)]

use libc::c_char;

pub type VmbError_t = i32;
pub type VmbUint32_t = u32;
pub type VmbAccessMode_t = u32;

pub const VMB_ERROR_SUCCESS: VmbError_t = 0;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct VmbVersionInfo_t {
    pub major: VmbUint32_t,
    pub minor: VmbUint32_t,
    pub patch: VmbUint32_t,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VmbCameraInfo_t {
    pub cameraIdString: *const c_char,
    pub cameraName: *const c_char,
    pub modelName: *const c_char,
    pub serialString: *const c_char,
    pub permittedAccess: VmbAccessMode_t,
    pub interfaceIdString: *const c_char,
}

impl Default for VmbCameraInfo_t {
    fn default() -> Self {
        Self {
            cameraIdString: std::ptr::null(),
            cameraName: std::ptr::null(),
            modelName: std::ptr::null(),
            serialString: std::ptr::null(),
            permittedAccess: 0,
            interfaceIdString: std::ptr::null(),
        }
    }
}

#[link(name = "VimbaC")]
extern "C" {
    pub fn VmbVersionQuery(
        pVersionInfo: *mut VmbVersionInfo_t,
        sizeofVersionInfo: VmbUint32_t,
    ) -> VmbError_t;

    pub fn VmbStartup() -> VmbError_t;

    pub fn VmbCamerasList(
        pCameraInfo: *mut VmbCameraInfo_t,
        listLength: VmbUint32_t,
        pNumFound: *mut VmbUint32_t,
        sizeofCameraInfo: VmbUint32_t,
    ) -> VmbError_t;
}
