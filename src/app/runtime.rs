use super::{ShutdownReason, SnapboothApp};
use crate::error::{EventBusError, Result, SnapboothError};
use crate::events::{EventFilter, SnapEvent};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

type SharedShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl SnapboothApp {
    /// Run until a signal, a quit request or a fatal component error
    pub async fn run(&mut self) -> Result<i32> {
        info!("Snapbooth is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| SnapboothError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| SnapboothError::system("Shutdown receiver already taken"))?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(Arc::clone(&shutdown_sender));
        self.watch_shutdown_events(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| SnapboothError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = 1;
        }

        info!("Snapbooth shutdown complete");
        Ok(exit_code)
    }

    /// Ask the running app to shut down, as the quit key does
    pub fn request_shutdown<S: Into<String>>(&self, reason: S) {
        let _ = self.event_bus.publish(SnapEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: reason.into(),
        });
    }

    fn setup_signal_handlers(&self, shutdown_sender: SharedShutdownSender) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }

    /// Map shutdown requests and server failures on the bus to a shutdown reason
    fn watch_shutdown_events(&self, shutdown_sender: SharedShutdownSender) {
        let mut receiver = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["shutdown_requested", "system_error"]),
            "shutdown_watch",
        );
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let reason = loop {
                let received = tokio::select! {
                    _ = token.cancelled() => return,
                    received = receiver.recv() => received,
                };
                match received {
                    Ok(SnapEvent::ShutdownRequested { reason, .. }) => {
                        break ShutdownReason::UserRequest(reason);
                    }
                    Ok(SnapEvent::SystemError { component, error }) if component == "server" => {
                        break ShutdownReason::Error(format!("{}: {}", component, error));
                    }
                    Ok(_) => continue,
                    Err(EventBusError::Lagged { skipped }) => {
                        warn!("Shutdown watcher skipped {} events", skipped);
                    }
                    Err(_) => return,
                }
            };

            if let Some(sender) = shutdown_sender.lock().await.take() {
                let _ = sender.send(reason);
            }
        });
    }
}
