use chrono::Local;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::context::AppContext;
use crate::error::{CoinError, FrameError, UploadError};
use crate::events::SnapEvent;
use crate::frame::{FrameData, StillFormat};
use crate::storage::{UploadReceipt, UploadRequest};
use crate::wallet::{coin_title, CoinReceipt, CoinRequest};

/// Upload and coin steps that follow a capture.
///
/// Runs off the session task and reports through status messages only; the
/// capture controller never sees these outcomes.
#[derive(Clone)]
pub struct PostCapture {
    ctx: AppContext,
}

impl PostCapture {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Encode, upload, then coin the still when a wallet is connected
    pub async fn process(&self, frame: FrameData) -> Option<UploadReceipt> {
        self.status("Uploading...");

        let quality = self.ctx.config.session.jpeg_quality;
        let encoded =
            encode_blocking(&frame, move |f| f.to_data_uri(StillFormat::Jpeg, quality)).await;
        let image = match encoded {
            Ok(uri) => uri,
            Err(e) => {
                error!("Failed to encode capture {}: {}", frame.id, e);
                self.status("Upload failed! (invalid image)");
                self.publish(SnapEvent::UploadFailed {
                    error: e.to_string(),
                });
                return None;
            }
        };

        let seconds = self.ctx.config.session.upload_timeout_seconds;
        let upload = self.ctx.uploader.upload(UploadRequest::new(image));
        let result = match timeout(Duration::from_secs(seconds), upload).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout { seconds }),
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Upload of capture {} failed: {}", frame.id, e);
                self.status(e.status_message());
                self.publish(SnapEvent::UploadFailed {
                    error: e.to_string(),
                });
                return None;
            }
        };

        info!(
            "Capture {} saved as {} via {}",
            frame.id,
            receipt.filename,
            self.ctx.uploader.backend_name()
        );
        self.status("CAPTURED & SAVED!");
        self.publish(SnapEvent::UploadCompleted {
            url: receipt.url.clone(),
            filename: receipt.filename.clone(),
        });

        if self.ctx.wallet.is_connected() {
            if let Err(e) = self.mint_coin(&frame).await {
                debug!("Automatic coin for capture {} not created: {}", frame.id, e);
            }
        }

        Some(receipt)
    }

    /// Mint the still as a coin for the connected wallet
    pub async fn mint_coin(&self, frame: &FrameData) -> Result<CoinReceipt, CoinError> {
        let Some(creator) = self.ctx.wallet.address() else {
            self.status("Connect your wallet first.");
            return Err(CoinError::WalletNotConnected);
        };

        self.status("Preparing onchain coin...");

        let image_png = match encode_blocking(frame, |f| f.encode(StillFormat::Png, 100)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode coin image for capture {}: {}", frame.id, e);
                self.status("Coin error. Use Coin button.");
                let error = CoinError::MintFailed {
                    details: e.to_string(),
                };
                self.publish(SnapEvent::CoinFailed {
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        let request = CoinRequest {
            image_png,
            title: coin_title(Local::now()),
            creator,
        };

        match self.ctx.minter.mint(request).await {
            Ok(receipt) => {
                info!("Coin creation submitted: {}", receipt.hash);
                self.status("Coin submitted. Check your wallet.");
                self.publish(SnapEvent::CoinSubmitted {
                    hash: receipt.hash.clone(),
                });
                Ok(receipt)
            }
            Err(e) => {
                warn!("Coin creation failed: {}", e);
                self.status("Coin failed. Use Coin button.");
                self.publish(SnapEvent::CoinFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn status<S: Into<String>>(&self, text: S) {
        self.publish(SnapEvent::status(text));
    }

    fn publish(&self, event: SnapEvent) {
        if let Err(e) = self.ctx.event_bus.publish(event) {
            warn!("Failed to publish post-capture event: {}", e);
        }
    }
}

/// Run an encoder over a copy of `frame` on the blocking pool
pub(crate) async fn encode_blocking<T, F>(frame: &FrameData, encoder: F) -> Result<T, FrameError>
where
    T: Send + 'static,
    F: FnOnce(&FrameData) -> Result<T, FrameError> + Send + 'static,
{
    let frame = frame.clone();
    tokio::task::spawn_blocking(move || encoder(&frame))
        .await
        .map_err(|e| FrameError::Encoding {
            details: format!("encoder task failed: {}", e),
        })?
}
