//! Session driver: one capture controller on one tokio task.
//!
//! Commands, timer fires and estimator results all arrive at the same
//! `select!` loop and are handled one at a time, so the controller is only
//! ever touched from this task. Controller time is tokio time measured from
//! the moment the driver was created.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::AppContext;
use super::postcapture::{encode_blocking, PostCapture};
use crate::capture::{
    CaptureController, CaptureEvent, CaptureOptions, IntervalSchedule, Sample, SampleTicket,
    SessionState,
};
use crate::error::{EstimatorError, Result, SnapboothError};
use crate::estimator::sample_from_estimate;
use crate::events::{EventFilter, EventReceiver, SnapEvent};
use crate::frame::{FrameData, StillFormat};
use crate::media::{MediaConstraints, MediaStream};
use crate::storage::{default_filename, ImageMime};
use crate::wallet::PlayButtonState;

const COMMAND_CAPACITY: usize = 16;
const DOWNLOAD_RESET_DELAY: Duration = Duration::from_secs(1);
/// An estimate may take this many detection intervals before it counts as failed
const ESTIMATE_TIMEOUT_INTERVALS: u32 = 4;

/// Inputs accepted by the session driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Press play
    Start,
    /// Abort the running session or leave the review screen
    Cancel,
    /// Save the last capture to the download directory
    Download,
    /// Mint the last capture as a coin
    MintCoin,
    ToggleWallet,
    Shutdown,
}

/// Snapshot of what the booth is showing
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Generation of the latest session, 0 before the first one
    pub session: u64,
    pub countdown: Option<u32>,
    pub remaining_seconds: u32,
    pub message: Option<String>,
    pub play_button: PlayButtonState,
    pub has_capture: bool,
}

impl SessionStatus {
    fn initial(play_button: PlayButtonState) -> Self {
        Self {
            state: SessionState::Idle,
            session: 0,
            countdown: None,
            remaining_seconds: 0,
            message: None,
            play_button,
            has_capture: false,
        }
    }
}

/// Cloneable front end for a running session driver
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SnapboothError::component("session", "session driver is not running"))
    }

    /// Non-blocking send for callers outside the runtime
    pub fn try_send(&self, command: SessionCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| {
            SnapboothError::component("session", format!("failed to queue {:?}: {}", command, e))
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionStatus>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| SnapboothError::component("session", "session driver stopped"))?;
        Ok(matched.clone())
    }
}

/// Owns the capture controller and everything tied to one session's lifetime
pub struct SessionDriver {
    ctx: AppContext,
    controller: CaptureController<IntervalSchedule>,
    options: CaptureOptions,
    post_capture: PostCapture,
    origin: Instant,
    stream: Option<MediaStream>,
    /// Session generation of the estimate currently running, if any
    estimate_in_flight: Option<u64>,
    last_capture: Option<FrameData>,
    review_deadline: Option<Instant>,
    commands: mpsc::Receiver<SessionCommand>,
    samples_tx: mpsc::UnboundedSender<(SampleTicket, Sample)>,
    samples_rx: mpsc::UnboundedReceiver<(SampleTicket, Sample)>,
    status: watch::Sender<SessionStatus>,
    status_events: EventReceiver,
    cancellation_token: CancellationToken,
}

impl SessionDriver {
    pub fn new(ctx: AppContext, cancellation_token: CancellationToken) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::initial(ctx.play_button()));
        let status_events = ctx.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["status_message", "camera_unavailable"]),
            "session_status",
        );

        let driver = Self {
            options: CaptureOptions::from_config(&ctx.config),
            post_capture: PostCapture::new(ctx.clone()),
            controller: CaptureController::new(IntervalSchedule::new()),
            ctx,
            origin: Instant::now(),
            stream: None,
            estimate_in_flight: None,
            last_capture: None,
            review_deadline: None,
            commands,
            samples_tx,
            samples_rx,
            status,
            status_events,
            cancellation_token,
        };
        let handle = SessionHandle {
            commands: command_tx,
            status: status_rx,
        };
        (driver, handle)
    }

    /// Create a driver and run it on its own task
    pub fn spawn(
        ctx: AppContext,
        cancellation_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(ctx, cancellation_token);
        (handle, tokio::spawn(driver.run()))
    }

    pub async fn run(mut self) {
        info!("Session driver started");

        loop {
            let next_timer = self
                .controller
                .ticker()
                .next_deadline()
                .map(|due| self.origin + due);
            let review_deadline = self.review_deadline;

            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some((ticket, sample)) = self.samples_rx.recv() => {
                    if self.estimate_in_flight == Some(ticket.generation()) {
                        self.estimate_in_flight = None;
                    }
                    self.fire_due_timers();
                    let events = self.controller.on_sample_for(ticket, sample);
                    self.dispatch(events);
                }
                _ = sleep_until_opt(next_timer) => self.fire_due_timers(),
                _ = sleep_until_opt(review_deadline) => self.end_review(),
                received = self.status_events.recv() => match received {
                    Ok(SnapEvent::StatusMessage { text })
                    | Ok(SnapEvent::CameraUnavailable { message: text }) => {
                        self.status.send_modify(|status| status.message = Some(text));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Status listener: {}", e),
                },
            }
        }

        if let Some(event) = self.controller.cancel() {
            self.publish(SnapEvent::capture(event));
        }
        self.release_stream("driver stopped");
        info!("Session driver stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        debug!("Session command: {:?}", command);
        match command {
            SessionCommand::Start => self.start_session().await,
            SessionCommand::Cancel => {
                self.review_deadline = None;
                if let Some(event) = self.controller.cancel() {
                    self.dispatch(vec![event]);
                }
            }
            SessionCommand::Download => self.download().await,
            SessionCommand::MintCoin => match self.last_capture.clone() {
                Some(frame) => {
                    let post_capture = self.post_capture.clone();
                    tokio::spawn(async move {
                        if let Err(e) = post_capture.mint_coin(&frame).await {
                            debug!("Coin for capture {} not created: {}", frame.id, e);
                        }
                    });
                }
                None => self.status_message("Nothing to coin yet."),
            },
            SessionCommand::ToggleWallet => {
                if let Err(e) = self.ctx.wallet.toggle().await {
                    warn!("Wallet toggle failed: {}", e);
                    self.status_message(format!("Wallet error: {}", e));
                }
                self.refresh_status();
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn start_session(&mut self) {
        let play_button = self.ctx.play_button();
        if !play_button.is_enabled() {
            warn!("Play requested while {:?}", play_button);
            self.status_message(play_button.label());
            self.refresh_status();
            return;
        }
        if self.controller.state() != SessionState::Idle {
            debug!("Play requested while {:?}, ignoring", self.controller.state());
            return;
        }

        let constraints = MediaConstraints::from(self.ctx.config.session.camera_resolution);
        let stream = match self.ctx.media.acquire(constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Camera acquisition failed: {}", e);
                self.ctx.mark_camera_failed();
                self.publish(SnapEvent::CameraUnavailable {
                    message: e.user_message(),
                });
                self.refresh_status();
                return;
            }
        };
        self.stream = Some(stream);

        self.fire_due_timers();
        self.controller.set_estimator_ready(self.ctx.estimator.is_ready());
        let events = self.controller.start(self.options.clone());
        if events.is_empty() {
            self.release_stream("session did not start");
            return;
        }

        self.last_capture = None;
        self.status.send_modify(|status| status.message = None);
        self.dispatch(events);
    }

    /// Deliver every timer fire due by now, one at a time
    fn fire_due_timers(&mut self) {
        let now = self.origin.elapsed();
        while let Some(fire) = self.controller.ticker_mut().pop_due(now) {
            let outcome = self.controller.on_timer(fire.id);
            if let Some(ticket) = outcome.sample_request {
                self.request_sample(ticket);
            }
            self.dispatch(outcome.events);
        }
        self.controller.ticker_mut().advance_to(now);
    }

    fn request_sample(&mut self, ticket: SampleTicket) {
        // One estimate at a time per session; an earlier session's never blocks
        if self.estimate_in_flight == Some(ticket.generation()) {
            debug!("Previous estimate still running, skipping detection tick");
            return;
        }

        let Some(frame) = self.stream.as_ref().and_then(|s| s.current_frame()) else {
            warn!("No camera frame available for detection");
            return;
        };

        self.estimate_in_flight = Some(ticket.generation());
        let estimator = Arc::clone(&self.ctx.estimator);
        let samples = self.samples_tx.clone();
        let limit = self.options.poll_interval * ESTIMATE_TIMEOUT_INTERVALS;
        tokio::spawn(async move {
            let estimate = match tokio::time::timeout(limit, estimator.estimate(&frame)).await {
                Ok(result) => result,
                Err(_) => Err(EstimatorError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            };
            let _ = samples.send((ticket, sample_from_estimate(estimate)));
        });
    }

    fn dispatch(&mut self, events: Vec<CaptureEvent>) {
        for event in events {
            self.publish(SnapEvent::capture(event.clone()));

            match event {
                CaptureEvent::Captured { session } => self.on_captured(session),
                CaptureEvent::SessionExpired { .. } => self.release_stream("session expired"),
                CaptureEvent::SessionCancelled { .. } => self.release_stream("session cancelled"),
                _ => {}
            }
        }
        self.refresh_status();
    }

    fn on_captured(&mut self, session: u64) {
        let frame = self.stream.as_ref().and_then(|s| s.current_frame());
        self.release_stream("photo captured");
        self.review_deadline =
            Some(Instant::now() + Duration::from_secs(self.ctx.config.session.review_seconds));

        let Some(frame) = frame else {
            error!("Session {} captured but the camera had no frame", session);
            self.status_message("Capture failed! No camera frame.");
            return;
        };

        self.status_message("CAPTURED!");
        self.last_capture = Some(frame.clone());
        let post_capture = self.post_capture.clone();
        tokio::spawn(async move {
            post_capture.process(frame).await;
        });
    }

    fn end_review(&mut self) {
        self.review_deadline = None;
        if let Some(event) = self.controller.cancel() {
            debug!("Review finished, resetting booth");
            self.dispatch(vec![event]);
        }
    }

    async fn download(&mut self) {
        let Some(frame) = self.last_capture.clone() else {
            self.status_message("Nothing to download yet.");
            return;
        };

        let dir = PathBuf::from(&self.ctx.config.session.download_path);
        let path = dir.join(default_filename(Utc::now(), ImageMime::Png));

        let written = async {
            let png = encode_blocking(&frame, |f| f.encode(StillFormat::Png, 100)).await?;
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, png).await?;
            Ok::<(), SnapboothError>(())
        }
        .await;

        match written {
            Ok(()) => {
                info!("Capture saved to {}", path.display());
                self.status_message(format!("Saved {}", path.display()));
                if self.review_deadline.is_some() {
                    self.review_deadline = Some(Instant::now() + DOWNLOAD_RESET_DELAY);
                }
            }
            Err(e) => {
                error!("Failed to save capture to {}: {}", path.display(), e);
                self.status_message("Download failed!");
            }
        }
    }

    fn release_stream(&mut self, reason: &str) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Camera released: {}", reason);
        }
    }

    fn refresh_status(&self) {
        let play_button = self.ctx.play_button();
        let has_capture = self.last_capture.is_some();
        let controller = &self.controller;
        self.status.send_modify(|status| {
            status.state = controller.state();
            status.session = controller.generation();
            status.countdown = controller.countdown_remaining();
            status.remaining_seconds = if controller.state().is_active() {
                controller.session_remaining()
            } else {
                0
            };
            status.play_button = play_button;
            status.has_capture = has_capture;
        });
    }

    fn status_message<S: Into<String>>(&self, text: S) {
        self.publish(SnapEvent::status(text));
    }

    fn publish(&self, event: SnapEvent) {
        if let Err(e) = self.ctx.event_bus.publish(event) {
            warn!("Failed to publish session event: {}", e);
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
