use super::context::AppContext;
use super::session::SessionHandle;
use super::types::{ComponentState, ShutdownReason};
use crate::config::SnapboothConfig;
use crate::error::Result;
use crate::estimator::FaceEstimator;
use crate::events::EventBus;
use crate::gallery::GalleryPoller;
use crate::keyboard_input::KeyboardInputHandler;
use crate::media::MediaSource;
use crate::server::ApiServer;
use crate::storage::BucketStore;
use crate::wallet::{CoinMinter, WalletProvider, WalletSession};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Hardware-facing collaborators the booth runs against
pub struct BoothDevices {
    pub estimator: Arc<dyn FaceEstimator>,
    pub media: Arc<dyn MediaSource>,
    pub wallet_provider: Option<Arc<dyn WalletProvider>>,
    pub minter: Option<Arc<dyn CoinMinter>>,
}

/// Main application coordinator that manages all booth components
pub struct SnapboothApp {
    pub(super) config: Arc<SnapboothConfig>,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) bucket: Arc<BucketStore>,
    pub(super) context: AppContext,

    // Components
    pub(super) gallery: GalleryPoller,
    pub(super) session: Option<SessionHandle>,
    pub(super) api_server: Option<Arc<ApiServer>>,
    pub(super) server_enabled: bool,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) tasks: HashMap<&'static str, JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl SnapboothApp {
    /// Create the booth with the given configuration and devices
    pub fn new(config: SnapboothConfig, devices: BoothDevices) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let bucket = Arc::new(BucketStore::new(&config.storage));
        let wallet = Arc::new(WalletSession::new(
            devices.wallet_provider,
            Arc::clone(&event_bus),
        ));

        let mut builder = AppContext::builder()
            .config(config)
            .event_bus(Arc::clone(&event_bus))
            .estimator(devices.estimator)
            .media(devices.media)
            .uploader(Arc::clone(&bucket) as _)
            .wallet(wallet);
        if let Some(minter) = devices.minter {
            builder = builder.minter(minter);
        }
        let context = builder.build()?;
        let config = Arc::clone(&context.config);

        let gallery = GalleryPoller::new(
            Arc::clone(&bucket) as _,
            Arc::clone(&event_bus),
            Duration::from_secs(config.gallery.refresh_interval_seconds),
        );
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            event_bus,
            bucket,
            context,
            gallery,
            session: None,
            api_server: None,
            server_enabled: true,
            keyboard_handler: None,
            keyboard_enabled: false, // Enabled by the interactive session command
            tasks: HashMap::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    /// Enable or disable the HTTP API server
    pub fn set_server_enabled(&mut self, enabled: bool) {
        self.server_enabled = enabled;
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn gallery(&self) -> &GalleryPoller {
        &self.gallery
    }

    /// Handle to the running session driver, available after `start`
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.clone()
    }
}
