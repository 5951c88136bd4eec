use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapboothError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Coin error: {0}")]
    Coin(#[from] CoinError),

    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl SnapboothError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Camera acquisition failures, categorised the way the user needs to hear about them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera device found")]
    NoDevice,

    #[error("camera device is busy")]
    DeviceBusy,

    #[error("camera does not support the requested constraints: {details}")]
    UnsupportedConstraints { details: String },

    #[error("camera failure: {details}")]
    Other { details: String },
}

impl CameraError {
    /// Message shown to the person in front of the booth
    pub fn user_message(&self) -> String {
        let reason = match self {
            CameraError::PermissionDenied => {
                "Please ensure you have granted camera permissions.".to_string()
            }
            CameraError::NoDevice => "No camera found on your device.".to_string(),
            CameraError::DeviceBusy => {
                "Camera is already in use by another application.".to_string()
            }
            CameraError::UnsupportedConstraints { .. } => {
                "Camera does not support the requested settings.".to_string()
            }
            CameraError::Other { details } if !details.is_empty() => details.clone(),
            CameraError::Other { .. } => "Unknown error occurred.".to_string(),
        };
        format!("Unable to access camera. {}", reason)
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No image data provided")]
    MissingImage,

    #[error("Invalid image payload: {details}")]
    InvalidPayload { details: String },

    #[error("Unsupported image type: {mime}")]
    UnsupportedMime { mime: String },

    #[error("Image too large: {size} bytes (limit {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid filename: {filename}")]
    InvalidFilename { filename: String },

    #[error("Upload timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Storage backend failure: {0}")]
    Backend(#[from] StorageError),
}

impl UploadError {
    /// Short status line for the capture screen
    pub fn status_message(&self) -> String {
        match self {
            UploadError::MissingImage | UploadError::InvalidPayload { .. } => {
                "Upload failed! (invalid image)".to_string()
            }
            UploadError::UnsupportedMime { mime } => {
                format!("Upload failed! (unsupported type {})", mime)
            }
            UploadError::TooLarge { .. } => "Upload failed! (image too large)".to_string(),
            UploadError::InvalidFilename { .. } => "Upload failed! (bad filename)".to_string(),
            UploadError::Timeout { .. } => "Upload timed out!".to_string(),
            UploadError::Backend(_) => "Upload failed!".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Object not found: {name}")]
    NotFound { name: String },

    #[error("Invalid object name: {name}")]
    InvalidName { name: String },

    #[error("Bucket {bucket} is not accessible: {details}")]
    BucketUnavailable { bucket: String, details: String },

    #[error("Storage IO failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Privileged storage access is not configured")]
    Unprivileged,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server startup failed: {details}")]
    StartupFailed { details: String },
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event receiver lagged by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("No wallet provider available")]
    ProviderUnavailable,

    #[error("Wallet connection rejected: {details}")]
    Rejected { details: String },

    #[error("Wallet is not connected")]
    NotConnected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinError {
    #[error("Coin minting is not configured")]
    NotConfigured,

    #[error("Wallet is not connected")]
    WalletNotConnected,

    #[error("Coin minting failed: {details}")]
    MintFailed { details: String },
}

/// Face estimator failures; a failed estimate is skipped, never escalated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimatorError {
    #[error("Face models are not loaded yet")]
    NotReady,

    #[error("Malformed frame: {details}")]
    MalformedFrame { details: String },

    #[error("Estimator backend failure: {details}")]
    Backend { details: String },

    #[error("Estimate took longer than {millis} ms")]
    Timeout { millis: u64 },
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame {id} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Image encoding failed: {details}")]
    Encoding { details: String },
}

pub type Result<T> = std::result::Result<T, SnapboothError>;
