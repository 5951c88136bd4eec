mod context;
mod orchestrator;
mod postcapture;
mod runtime;
mod session;
mod shutdown;
mod startup;
mod state;
mod types;


pub use context::{AppContext, AppContextBuilder};
pub use orchestrator::{BoothDevices, SnapboothApp};
pub use postcapture::PostCapture;
pub use session::{SessionCommand, SessionDriver, SessionHandle, SessionStatus};
pub use types::{ComponentState, ShutdownReason};
