use super::session::SessionDriver;
use super::state::COMPONENTS;
use super::{ComponentState, SnapboothApp};
use crate::error::Result;
use crate::events::SnapEvent;
use crate::keyboard_input::KeyboardInputHandler;
use crate::server::ApiServer;
use std::sync::Arc;
use tracing::{error, info};

impl SnapboothApp {
    /// Register every enabled component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Snapbooth components");

        let mut states = self.component_states.lock().await;
        for component in COMPONENTS {
            let enabled = match component {
                "server" => self.server_enabled,
                "keyboard" => self.keyboard_enabled,
                _ => true,
            };
            if enabled {
                states.insert(component.to_string(), ComponentState::Stopped);
            }
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start all registered components in dependency order
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Snapbooth");

        // Storage first: uploads and the gallery both need the bucket
        self.set_component_state("storage", ComponentState::Starting)
            .await;
        if let Err(e) = self.bucket.ensure_bucket().await {
            error!("Failed to prepare bucket {}: {}", self.bucket.bucket(), e);
            self.set_component_state("storage", ComponentState::Failed)
                .await;
            return Err(e.into());
        }
        self.set_component_state("storage", ComponentState::Running)
            .await;
        info!("Bucket ready at {}", self.bucket.root().display());

        self.set_component_state("gallery", ComponentState::Starting)
            .await;
        self.tasks.insert("gallery", self.gallery.start());
        self.set_component_state("gallery", ComponentState::Running)
            .await;

        self.set_component_state("session", ComponentState::Starting)
            .await;
        let (session, task) =
            SessionDriver::spawn(self.context.clone(), self.cancellation_token.child_token());
        self.session = Some(session.clone());
        self.tasks.insert("session", task);
        self.set_component_state("session", ComponentState::Running)
            .await;
        info!("Session driver ready: {}", self.context.play_button().label());

        if self.server_enabled {
            self.set_component_state("server", ComponentState::Starting)
                .await;

            let server = Arc::new(
                ApiServer::builder()
                    .config(Arc::clone(&self.config))
                    .bucket(Arc::clone(&self.bucket))
                    .event_bus(Arc::clone(&self.event_bus))
                    .session(session.clone())
                    .build()?,
            );

            // Bind failures surface as a system error, which ends the run
            let running = Arc::clone(&server);
            let event_bus = Arc::clone(&self.event_bus);
            let task = tokio::spawn(async move {
                if let Err(e) = running.start().await {
                    error!("API server error: {}", e);
                    let _ = event_bus.publish(SnapEvent::SystemError {
                        component: "server".to_string(),
                        error: e.to_string(),
                    });
                }
            });
            self.api_server = Some(server);
            self.tasks.insert("server", task);

            self.set_component_state("server", ComponentState::Running)
                .await;
            info!(
                "API server started on {}:{}",
                self.config.server.ip, self.config.server.port
            );
        }

        if self.keyboard_enabled {
            self.set_component_state("keyboard", ComponentState::Starting)
                .await;

            let handler = KeyboardInputHandler::new(Arc::clone(&self.event_bus), session);
            handler.start().await.map_err(|e| {
                error!("Failed to start keyboard handler: {}", e);
                e
            })?;
            self.keyboard_handler = Some(handler);

            self.set_component_state("keyboard", ComponentState::Running)
                .await;
            info!("Keyboard controls active - P play, E exit, D download, C coin, W wallet, Q quit");
        }

        info!("Snapbooth started successfully");
        Ok(())
    }
}
