pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod estimator;
pub mod events;
pub mod frame;
pub mod gallery;
pub mod keyboard_input;
pub mod media;
pub mod server;
pub mod storage;
pub mod wallet;

pub use app::{
    AppContext, BoothDevices, ComponentState, SessionCommand, SessionDriver, SessionHandle,
    SessionStatus, ShutdownReason, SnapboothApp,
};
pub use capture::{CaptureController, CaptureEvent, CaptureOptions, Sample, SessionState};
pub use config::SnapboothConfig;
pub use error::{Result, SnapboothError};
pub use estimator::{FaceEstimator, ScriptedEstimator};
pub use events::{EventBus, EventFilter, EventReceiver, SnapEvent};
pub use frame::{FrameData, StillFormat};
pub use gallery::GalleryPoller;
pub use media::{MediaSource, MediaStream, SyntheticMediaSource};
pub use server::{ApiServer, ApiServerBuilder};
pub use storage::{BucketStore, GalleryEntry, UploadReceipt, UploadRequest, UploadSink};
pub use wallet::{CoinMinter, PlayButtonState, StaticWalletProvider, WalletProvider, WalletSession};
