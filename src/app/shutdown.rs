use super::state::COMPONENTS;
use super::{ComponentState, SnapboothApp};
use crate::error::{Result, SnapboothError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const COMPONENT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl SnapboothApp {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Stops the session driver, which releases the camera
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Stop components in reverse start order
        for component in COMPONENTS.into_iter().rev() {
            if self.component_state(component).await.is_none() {
                continue;
            }
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component and wait for its task to finish
    async fn stop_component(&mut self, component: &'static str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match component {
            "keyboard" => {
                if let Some(handler) = &self.keyboard_handler {
                    handler.stop().await?;
                }
            }
            "server" => {
                if let Some(server) = &self.api_server {
                    server.stop();
                }
            }
            "gallery" => self.gallery.stop(),
            _ => {}
        }

        let result = match self.tasks.remove(component) {
            Some(task) => match timeout(COMPONENT_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SnapboothError::component(
                    component,
                    format!("task failed: {}", e),
                )),
                Err(_) => Err(SnapboothError::component(component, "stop timeout")),
            },
            None => Ok(()),
        };

        match &result {
            Ok(()) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
            }
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
            }
        }

        result
    }
}
