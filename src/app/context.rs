use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SnapboothConfig;
use crate::error::{Result, SnapboothError};
use crate::estimator::FaceEstimator;
use crate::events::EventBus;
use crate::media::MediaSource;
use crate::storage::UploadSink;
use crate::wallet::{play_button_state, CoinMinter, NullCoinMinter, PlayButtonState, WalletSession};

/// Collaborators shared by the session driver and the post-capture pipeline
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<SnapboothConfig>,
    pub event_bus: Arc<EventBus>,
    pub estimator: Arc<dyn FaceEstimator>,
    pub media: Arc<dyn MediaSource>,
    pub uploader: Arc<dyn UploadSink>,
    pub wallet: Arc<WalletSession>,
    pub minter: Arc<dyn CoinMinter>,
    camera_failed: Arc<AtomicBool>,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Current play control, from camera health, wallet connection and model readiness
    pub fn play_button(&self) -> PlayButtonState {
        if self.camera_failed() {
            return PlayButtonState::CameraUnavailable;
        }
        play_button_state(
            self.wallet.is_connected(),
            self.estimator.is_ready(),
            self.config.wallet.require_connection,
        )
    }

    /// Disable play after the camera could not be acquired
    pub fn mark_camera_failed(&self) {
        self.camera_failed.store(true, Ordering::SeqCst);
    }

    pub fn camera_failed(&self) -> bool {
        self.camera_failed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct AppContextBuilder {
    config: Option<SnapboothConfig>,
    event_bus: Option<Arc<EventBus>>,
    estimator: Option<Arc<dyn FaceEstimator>>,
    media: Option<Arc<dyn MediaSource>>,
    uploader: Option<Arc<dyn UploadSink>>,
    wallet: Option<Arc<WalletSession>>,
    minter: Option<Arc<dyn CoinMinter>>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SnapboothConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn FaceEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn UploadSink>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn wallet(mut self, wallet: Arc<WalletSession>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn minter(mut self, minter: Arc<dyn CoinMinter>) -> Self {
        self.minter = Some(minter);
        self
    }

    /// Wallet and minter are optional: without them the booth runs with no
    /// wallet provider and a minter that reports it is not configured.
    pub fn build(self) -> Result<AppContext> {
        let config = self
            .config
            .ok_or_else(|| SnapboothError::system("App context config not set"))?;
        let event_bus = self
            .event_bus
            .ok_or_else(|| SnapboothError::system("App context event bus not set"))?;
        let estimator = self
            .estimator
            .ok_or_else(|| SnapboothError::system("App context face estimator not set"))?;
        let media = self
            .media
            .ok_or_else(|| SnapboothError::system("App context media source not set"))?;
        let uploader = self
            .uploader
            .ok_or_else(|| SnapboothError::system("App context upload sink not set"))?;

        let wallet = self
            .wallet
            .unwrap_or_else(|| Arc::new(WalletSession::new(None, Arc::clone(&event_bus))));
        let minter = self.minter.unwrap_or_else(|| Arc::new(NullCoinMinter));

        Ok(AppContext {
            config: Arc::new(config),
            event_bus,
            estimator,
            media,
            uploader,
            wallet,
            minter,
            camera_failed: Arc::new(AtomicBool::new(false)),
        })
    }
}
