use crate::app::{SessionCommand, SessionHandle};
use crate::error::Result;
use crate::events::{EventBus, SnapEvent};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks the booth to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Command(SessionCommand),
    Quit,
}

/// Map a key press to a booth action
pub fn key_action(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyAction> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(KeyAction::Quit),
        KeyCode::Char('p') | KeyCode::Char('P') | KeyCode::Enter => {
            Some(KeyAction::Command(SessionCommand::Start))
        }
        KeyCode::Char('e') | KeyCode::Char('E') => Some(KeyAction::Command(SessionCommand::Cancel)),
        KeyCode::Char('d') | KeyCode::Char('D') => {
            Some(KeyAction::Command(SessionCommand::Download))
        }
        KeyCode::Char('c') | KeyCode::Char('C') => {
            Some(KeyAction::Command(SessionCommand::MintCoin))
        }
        KeyCode::Char('w') | KeyCode::Char('W') => {
            Some(KeyAction::Command(SessionCommand::ToggleWallet))
        }
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Terminal controls for running the booth without a browser
pub struct KeyboardInputHandler {
    event_bus: Arc<EventBus>,
    session: SessionHandle,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(event_bus: Arc<EventBus>, session: SessionHandle) -> Self {
        Self {
            event_bus,
            session,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler");

        let event_bus = Arc::clone(&self.event_bus);
        let session = self.session.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let key_event = match event::read() {
                            Ok(Event::Key(key_event)) if key_event.kind == KeyEventKind::Press => {
                                key_event
                            }
                            _ => continue,
                        };

                        match key_action(key_event.code, key_event.modifiers) {
                            Some(KeyAction::Command(command)) => {
                                debug!("Key {:?} -> {:?}", key_event.code, command);
                                if let Err(e) = session.try_send(command) {
                                    warn!("Dropped {:?}: {}", command, e);
                                }
                            }
                            Some(KeyAction::Quit) => {
                                info!("Quit key pressed - requesting shutdown");
                                if let Err(e) = event_bus.publish(SnapEvent::ShutdownRequested {
                                    timestamp: SystemTime::now(),
                                    reason: "User requested via keyboard".to_string(),
                                }) {
                                    warn!("Failed to publish shutdown event: {}", e);
                                }
                                break;
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the polling loop a chance to restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booth_keys() {
        let none = KeyModifiers::NONE;
        assert_eq!(
            key_action(KeyCode::Char('p'), none),
            Some(KeyAction::Command(SessionCommand::Start))
        );
        assert_eq!(
            key_action(KeyCode::Enter, none),
            Some(KeyAction::Command(SessionCommand::Start))
        );
        assert_eq!(
            key_action(KeyCode::Char('E'), none),
            Some(KeyAction::Command(SessionCommand::Cancel))
        );
        assert_eq!(
            key_action(KeyCode::Char('d'), none),
            Some(KeyAction::Command(SessionCommand::Download))
        );
        assert_eq!(
            key_action(KeyCode::Char('c'), none),
            Some(KeyAction::Command(SessionCommand::MintCoin))
        );
        assert_eq!(
            key_action(KeyCode::Char('w'), none),
            Some(KeyAction::Command(SessionCommand::ToggleWallet))
        );
    }

    #[test]
    fn test_quit_keys() {
        assert_eq!(
            key_action(KeyCode::Char('q'), KeyModifiers::NONE),
            Some(KeyAction::Quit)
        );
        assert_eq!(key_action(KeyCode::Esc, KeyModifiers::NONE), Some(KeyAction::Quit));
        assert_eq!(
            key_action(KeyCode::Char('c'), KeyModifiers::CONTROL),
            Some(KeyAction::Quit)
        );
        assert_eq!(key_action(KeyCode::Char('x'), KeyModifiers::NONE), None);
    }
}
