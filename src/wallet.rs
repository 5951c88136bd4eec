//! Wallet connection state, wallet-gated play, and the coin minting capability.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CoinError, WalletError};
use crate::events::{EventBus, SnapEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletState {
    pub connected: bool,
    pub address: Option<String>,
    pub chain_id: Option<String>,
}

/// Account access through an external wallet
#[async_trait::async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for account access; the first account is used
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError>;

    async fn chain_id(&self) -> Result<String, WalletError>;
}

/// Provider with a fixed account list, for demos and tests
pub struct StaticWalletProvider {
    accounts: Vec<String>,
    chain_id: String,
}

impl StaticWalletProvider {
    pub fn new<S: Into<String>>(address: S) -> Self {
        Self {
            accounts: vec![address.into()],
            chain_id: "0x2105".to_string(),
        }
    }

    pub fn empty() -> Self {
        Self {
            accounts: Vec::new(),
            chain_id: "0x2105".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl WalletProvider for StaticWalletProvider {
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        Ok(self.accounts.clone())
    }

    async fn chain_id(&self) -> Result<String, WalletError> {
        Ok(self.chain_id.clone())
    }
}

/// Connection state shared by the session driver and the HTTP layer
pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    state: RwLock<WalletState>,
    event_bus: Arc<EventBus>,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, event_bus: Arc<EventBus>) -> Self {
        Self {
            provider,
            state: RwLock::new(WalletState::default()),
            event_bus,
        }
    }

    pub fn state(&self) -> WalletState {
        self.state.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn address(&self) -> Option<String> {
        self.state.read().address.clone()
    }

    pub async fn connect(&self) -> Result<WalletState, WalletError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or(WalletError::ProviderUnavailable)?;

        let accounts = provider.request_accounts().await?;
        let address = accounts.into_iter().next().ok_or_else(|| WalletError::Rejected {
            details: "no accounts returned".to_string(),
        })?;
        let chain_id = match provider.chain_id().await {
            Ok(chain_id) => Some(chain_id),
            Err(e) => {
                warn!("Could not read wallet chain id: {}", e);
                None
            }
        };

        let state = WalletState {
            connected: true,
            address: Some(address),
            chain_id,
        };
        *self.state.write() = state.clone();

        info!(
            "Wallet connected: {}",
            state.address.as_deref().map(short_address).unwrap_or_default()
        );
        self.publish_change();
        Ok(state)
    }

    pub fn disconnect(&self) {
        let was_connected = {
            let mut state = self.state.write();
            let was = state.connected;
            *state = WalletState::default();
            was
        };
        if was_connected {
            info!("Wallet disconnected");
            self.publish_change();
        }
    }

    /// Connect when disconnected, disconnect when connected
    pub async fn toggle(&self) -> Result<WalletState, WalletError> {
        if self.is_connected() {
            self.disconnect();
            Ok(self.state())
        } else {
            self.connect().await
        }
    }

    /// Wallet reported a new account list
    pub fn accounts_changed(&self, accounts: &[String]) {
        match accounts.first() {
            None => self.disconnect(),
            Some(first) => {
                let changed = {
                    let mut state = self.state.write();
                    if state.connected && state.address.as_ref() != Some(first) {
                        state.address = Some(first.clone());
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    info!("Wallet account changed: {}", short_address(first));
                    self.publish_change();
                }
            }
        }
    }

    fn publish_change(&self) {
        let state = self.state();
        let _ = self.event_bus.publish(SnapEvent::WalletChanged {
            connected: state.connected,
            address: state.address,
        });
    }
}

/// `0x1234...abcd`; short inputs are returned unchanged
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// What the play control shows and whether it accepts input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayButtonState {
    ConnectWallet,
    LoadingModels,
    /// Camera acquisition failed; play stays off until the booth restarts
    CameraUnavailable,
    Ready,
}

impl PlayButtonState {
    pub fn label(&self) -> &'static str {
        match self {
            PlayButtonState::ConnectWallet => "Connect Wallet to Play",
            PlayButtonState::LoadingModels => "Loading Face Models…",
            PlayButtonState::CameraUnavailable => "Camera Unavailable",
            PlayButtonState::Ready => "Press Play",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self == PlayButtonState::Ready
    }
}

pub fn play_button_state(
    wallet_connected: bool,
    models_ready: bool,
    require_wallet: bool,
) -> PlayButtonState {
    if require_wallet && !wallet_connected {
        PlayButtonState::ConnectWallet
    } else if !models_ready {
        PlayButtonState::LoadingModels
    } else {
        PlayButtonState::Ready
    }
}

#[derive(Debug, Clone)]
pub struct CoinRequest {
    /// Lossless capture to mint
    pub image_png: Vec<u8>,
    pub title: String,
    pub creator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinReceipt {
    /// Transaction hash of the submitted mint
    pub hash: String,
}

#[async_trait::async_trait]
pub trait CoinMinter: Send + Sync {
    async fn mint(&self, request: CoinRequest) -> Result<CoinReceipt, CoinError>;
}

/// Minter used when no coin API key is configured
pub struct NullCoinMinter;

#[async_trait::async_trait]
impl CoinMinter for NullCoinMinter {
    async fn mint(&self, _request: CoinRequest) -> Result<CoinReceipt, CoinError> {
        Err(CoinError::NotConfigured)
    }
}

/// `3/9/2024, 2:05:07 PM - Make It Snap`
pub fn coin_title(now: DateTime<Local>) -> String {
    format!("{} - Make It Snap", now.format("%-m/%-d/%Y, %-I:%M:%S %p"))
}
