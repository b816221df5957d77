use thiserror::Error;

/// Errors raised by the vendor SDK boundary.
///
/// Codes mirror the vendor's own error numbering so failures can be matched
/// against the SDK documentation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    #[error("SDK internal fault")]
    InternalFault,

    #[error("SDK API has not been started")]
    ApiNotStarted,

    #[error("Device not found")]
    NotFound,

    #[error("Invalid handle")]
    BadHandle,

    #[error("Device is not open")]
    DeviceNotOpen,

    #[error("Invalid access to device")]
    InvalidAccess,

    #[error("Bad parameter passed to the SDK")]
    BadParameter,

    #[error("Struct size mismatch with the SDK version")]
    StructSize,

    #[error("More data available than requested")]
    MoreData,

    #[error("SDK call timed out")]
    Timeout,

    #[error("Transport layer not found")]
    NoTransportLayer,

    #[error("SDK call is not implemented")]
    NotImplemented,

    #[error("SDK call is not supported")]
    NotSupported,

    #[error("SDK I/O error")]
    Io,

    #[error("SDK returned error code {code}")]
    Other { code: i32 },

    #[error("SDK library unavailable: {details}")]
    Unavailable { details: String },
}

impl SdkError {
    /// Map a raw vendor return code to an error. Zero is not an error and
    /// must be handled by the caller.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::InternalFault,
            -2 => Self::ApiNotStarted,
            -3 => Self::NotFound,
            -4 => Self::BadHandle,
            -5 => Self::DeviceNotOpen,
            -6 => Self::InvalidAccess,
            -7 => Self::BadParameter,
            -8 => Self::StructSize,
            -9 => Self::MoreData,
            -12 => Self::Timeout,
            -16 => Self::NoTransportLayer,
            -17 => Self::NotImplemented,
            -18 => Self::NotSupported,
            -20 => Self::Io,
            other => Self::Other { code: other },
        }
    }
}

#[derive(Error, Debug)]
pub enum BasecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Vendor SDK error: {0}")]
    Sdk(#[from] SdkError),

    #[error("Camera {camera} - {message}")]
    Camera { camera: String, message: String },

    #[error("Camera {camera} - connection failed: {message}")]
    Connection { camera: String, message: String },

    #[error("Camera {camera} - exposure failed: {message}")]
    Exposure { camera: String, message: String },

    #[error("Camera {camera} does not support {capability}")]
    Unsupported { camera: String, capability: String },

    #[error("Card error: {message}")]
    Card { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Not implemented: {what}")]
    NotImplemented { what: String },

    #[error("Notifier error: {message}")]
    Notifier { message: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl BasecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn camera<S: Into<String>, M: Into<String>>(camera: S, message: M) -> Self {
        Self::Camera {
            camera: camera.into(),
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>, M: Into<String>>(camera: S, message: M) -> Self {
        Self::Connection {
            camera: camera.into(),
            message: message.into(),
        }
    }

    pub fn exposure<S: Into<String>, M: Into<String>>(camera: S, message: M) -> Self {
        Self::Exposure {
            camera: camera.into(),
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>, C: Into<String>>(camera: S, capability: C) -> Self {
        Self::Unsupported {
            camera: camera.into(),
            capability: capability.into(),
        }
    }

    pub fn card<S: Into<String>>(message: S) -> Self {
        Self::Card {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn not_implemented<S: Into<String>>(what: S) -> Self {
        Self::NotImplemented { what: what.into() }
    }

    pub fn notifier<S: Into<String>>(message: S) -> Self {
        Self::Notifier {
            message: message.into(),
        }
    }

    /// Whether the error means the operation can never succeed, as opposed
    /// to a transient failure.
    pub fn is_not_implemented(&self) -> bool {
        matches!(
            self,
            BasecamError::NotImplemented { .. } | BasecamError::Sdk(SdkError::NotImplemented)
        )
    }
}

pub type Result<T> = std::result::Result<T, BasecamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_prefix() {
        let err = BasecamError::camera("sim1", "shutter jammed");
        assert_eq!(err.to_string(), "Camera sim1 - shutter jammed");
    }

    #[test]
    fn test_sdk_codes() {
        assert_eq!(SdkError::from_code(-2), SdkError::ApiNotStarted);
        assert_eq!(SdkError::from_code(-12), SdkError::Timeout);
        assert_eq!(SdkError::from_code(-99), SdkError::Other { code: -99 });
    }

    #[test]
    fn test_not_implemented_detection() {
        assert!(BasecamError::not_implemented("list cameras").is_not_implemented());
        assert!(BasecamError::Sdk(SdkError::NotImplemented).is_not_implemented());
        assert!(!BasecamError::system("boom").is_not_implemented());
    }
}
