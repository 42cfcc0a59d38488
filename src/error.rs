use thiserror::Error;

/// Status codes reported by libuvc, passed through unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvcError {
    #[error("Input/output error")]
    Io,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied")]
    Access,

    #[error("No such device")]
    NoDevice,

    #[error("Entity not found")]
    NotFound,

    #[error("Resource busy")]
    Busy,

    #[error("Operation timed out")]
    Timeout,

    #[error("Overflow")]
    Overflow,

    #[error("Pipe error")]
    Pipe,

    #[error("System call interrupted")]
    Interrupted,

    #[error("Insufficient memory")]
    NoMem,

    #[error("Operation not supported")]
    NotSupported,

    #[error("Device is not UVC-compliant")]
    InvalidDevice,

    #[error("Mode not supported")]
    InvalidMode,

    #[error("Resource has a callback (can't use polling and async)")]
    CallbackExists,

    #[error("Unknown error")]
    Other,
}

impl UvcError {
    /// Numeric `uvc_error_t` value for this status.
    pub fn code(&self) -> i32 {
        match self {
            UvcError::Io => -1,
            UvcError::InvalidParam => -2,
            UvcError::Access => -3,
            UvcError::NoDevice => -4,
            UvcError::NotFound => -5,
            UvcError::Busy => -6,
            UvcError::Timeout => -7,
            UvcError::Overflow => -8,
            UvcError::Pipe => -9,
            UvcError::Interrupted => -10,
            UvcError::NoMem => -11,
            UvcError::NotSupported => -12,
            UvcError::InvalidDevice => -50,
            UvcError::InvalidMode => -51,
            UvcError::CallbackExists => -52,
            UvcError::Other => -99,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let error = match code {
            -1 => UvcError::Io,
            -2 => UvcError::InvalidParam,
            -3 => UvcError::Access,
            -4 => UvcError::NoDevice,
            -5 => UvcError::NotFound,
            -6 => UvcError::Busy,
            -7 => UvcError::Timeout,
            -8 => UvcError::Overflow,
            -9 => UvcError::Pipe,
            -10 => UvcError::Interrupted,
            -11 => UvcError::NoMem,
            -12 => UvcError::NotSupported,
            -50 => UvcError::InvalidDevice,
            -51 => UvcError::InvalidMode,
            -52 => UvcError::CallbackExists,
            -99 => UvcError::Other,
            _ => return None,
        };
        Some(error)
    }
}

#[cfg(feature = "libuvc")]
impl From<uvc::Error> for UvcError {
    fn from(err: uvc::Error) -> Self {
        match err {
            uvc::Error::IO => UvcError::Io,
            uvc::Error::InvalidParam => UvcError::InvalidParam,
            uvc::Error::Access => UvcError::Access,
            uvc::Error::NoDevice => UvcError::NoDevice,
            uvc::Error::NotFound => UvcError::NotFound,
            uvc::Error::Busy => UvcError::Busy,
            uvc::Error::Timeout => UvcError::Timeout,
            uvc::Error::Overflow => UvcError::Overflow,
            uvc::Error::Pipe => UvcError::Pipe,
            uvc::Error::Interrupted => UvcError::Interrupted,
            uvc::Error::NoMem => UvcError::NoMem,
            uvc::Error::NotSupported => UvcError::NotSupported,
            uvc::Error::InvalidDevice => UvcError::InvalidDevice,
            uvc::Error::InvalidMode => UvcError::InvalidMode,
            uvc::Error::CallbackExists => UvcError::CallbackExists,
            uvc::Error::Unknown(code) => UvcError::from_code(code).unwrap_or(UvcError::Other),
            // Success never reaches an Err
            uvc::Error::Success | uvc::Error::Other => UvcError::Other,
        }
    }
}

/// Errors raised while building a GStreamer pipeline description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid device key '{key}' - should contain only alpha-numerical characters")]
    InvalidKey { key: String },

    #[error("Crop of {crop}px leaves no image for a {height}px high frame")]
    InvalidCrop { crop: u32, height: u32 },

    #[error("Invalid pipe directory {path} - must be an existing folder")]
    PipeDirectory { path: String },

    #[error("GStreamer error: {details}")]
    Gstreamer { details: String },
}

#[derive(Error, Debug)]
pub enum ThetaError {
    #[error("USB video error: {0}")]
    Uvc(#[from] UvcError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ThetaError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// libuvc status behind this error, if it came from the device layer
    pub fn uvc_status(&self) -> Option<UvcError> {
        match self {
            ThetaError::Uvc(status) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(feature = "libuvc")]
impl From<uvc::Error> for ThetaError {
    fn from(err: uvc::Error) -> Self {
        ThetaError::Uvc(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ThetaError>;
