use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::{CancelReason, CaptureEvent, CountdownState, Sample, SessionState};
use super::ticker::{Ticker, TimerId, TimerKind};
use crate::config::{SnapboothConfig, TriggerPolicy};

const SESSION_TICK: Duration = Duration::from_secs(1);

/// Per-session settings for the capture controller
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub poll_interval: Duration,
    pub happiness_threshold: f32,
    pub trigger_policy: TriggerPolicy,
    pub countdown_ticks: u32,
    pub countdown_tick: Duration,
    pub session_timeout_seconds: u32,
    /// Consecutive low or faceless samples needed to abort a countdown
    pub cancel_after_low_samples: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            happiness_threshold: 0.95,
            trigger_policy: TriggerPolicy::Countdown,
            countdown_ticks: 3,
            countdown_tick: Duration::from_millis(1000),
            session_timeout_seconds: 20,
            cancel_after_low_samples: 1,
        }
    }
}

impl CaptureOptions {
    /// Bare threshold trigger: lower bar, capture on the first qualifying sample
    pub fn instant() -> Self {
        Self {
            happiness_threshold: 0.8,
            trigger_policy: TriggerPolicy::Instant,
            countdown_ticks: 0,
            ..Self::default()
        }
    }

    pub fn from_config(config: &SnapboothConfig) -> Self {
        let detection = &config.detection;
        Self {
            poll_interval: Duration::from_millis(detection.poll_interval_ms),
            happiness_threshold: detection.happiness_threshold,
            trigger_policy: detection.trigger_policy,
            countdown_ticks: detection.countdown_ticks,
            countdown_tick: Duration::from_millis(detection.countdown_tick_ms),
            session_timeout_seconds: config.session.timeout_seconds,
            cancel_after_low_samples: detection.cancel_after_low_samples,
        }
    }

    fn captures_immediately(&self) -> bool {
        self.trigger_policy == TriggerPolicy::Instant || self.countdown_ticks == 0
    }
}

/// Identifies which session a requested sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTicket {
    generation: u64,
}

impl SampleTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of delivering a timer fire
#[derive(Debug, Default, PartialEq)]
pub struct TimerOutcome {
    pub events: Vec<CaptureEvent>,
    /// Set when a detection tick wants a fresh sample
    pub sample_request: Option<SampleTicket>,
}

/// Smile-triggered capture state machine.
///
/// All inputs arrive through `start`, `on_timer`, `on_sample_for` and `cancel`,
/// each of which runs to completion and returns the events it produced.
pub struct CaptureController<T: Ticker> {
    ticker: T,
    options: CaptureOptions,
    state: SessionState,
    generation: u64,
    estimator_ready: bool,
    detection_timer: Option<TimerId>,
    session_timer: Option<TimerId>,
    countdown_timer: Option<TimerId>,
    countdown: Option<CountdownState>,
    session_remaining: u32,
    low_streak: u32,
}

impl<T: Ticker> CaptureController<T> {
    pub fn new(ticker: T) -> Self {
        Self {
            ticker,
            options: CaptureOptions::default(),
            state: SessionState::Idle,
            generation: 0,
            estimator_ready: false,
            detection_timer: None,
            session_timer: None,
            countdown_timer: None,
            countdown: None,
            session_remaining: 0,
            low_streak: 0,
        }
    }

    pub fn set_estimator_ready(&mut self, ready: bool) {
        self.estimator_ready = ready;
    }

    pub fn is_estimator_ready(&self) -> bool {
        self.estimator_ready
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.map(|c| c.remaining())
    }

    pub fn session_remaining(&self) -> u32 {
        self.session_remaining
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    pub fn ticker_mut(&mut self) -> &mut T {
        &mut self.ticker
    }

    /// Ticket for the running session, if detection is active
    pub fn current_ticket(&self) -> Option<SampleTicket> {
        self.state.is_active().then_some(SampleTicket {
            generation: self.generation,
        })
    }

    /// Begin a session. Does nothing unless idle with a ready estimator.
    pub fn start(&mut self, options: CaptureOptions) -> Vec<CaptureEvent> {
        if !self.estimator_ready {
            warn!("Face estimator not ready, ignoring start request");
            return Vec::new();
        }
        if self.state != SessionState::Idle {
            debug!("Start requested while {:?}, ignoring", self.state);
            return Vec::new();
        }

        self.options = options;
        self.generation += 1;
        self.session_remaining = self.options.session_timeout_seconds;
        self.low_streak = 0;
        self.countdown = None;
        self.detection_timer = Some(
            self.ticker
                .start_interval(TimerKind::Detection, self.options.poll_interval),
        );
        self.session_timer = Some(self.ticker.start_interval(TimerKind::Session, SESSION_TICK));
        self.state = SessionState::Armed;

        info!(
            "Capture session {} armed (threshold {:.2}, {:?} policy, {}s timeout)",
            self.generation,
            self.options.happiness_threshold,
            self.options.trigger_policy,
            self.session_remaining
        );

        vec![CaptureEvent::SessionStarted {
            session: self.generation,
            timeout_seconds: self.session_remaining,
        }]
    }

    /// Deliver a timer fire. Fires for timers this controller no longer owns are dropped.
    pub fn on_timer(&mut self, id: TimerId) -> TimerOutcome {
        let mut outcome = TimerOutcome::default();

        if self.session_timer == Some(id) {
            self.session_remaining = self.session_remaining.saturating_sub(1);
            outcome.events.push(CaptureEvent::SessionTick {
                remaining_seconds: self.session_remaining,
            });
            if self.session_remaining == 0 {
                info!(
                    "Capture session {} expired while {:?}",
                    self.generation, self.state
                );
                self.clear_timers();
                self.state = SessionState::Idle;
                outcome.events.push(CaptureEvent::SessionExpired {
                    session: self.generation,
                });
            }
        } else if self.countdown_timer == Some(id) {
            let finished = match self.countdown.as_mut() {
                Some(countdown) => countdown.tick(),
                None => return outcome,
            };
            if finished {
                outcome.events.push(self.capture());
            } else if let Some(remaining) = self.countdown_remaining() {
                debug!("Countdown: {}", remaining);
                outcome.events.push(CaptureEvent::CountdownTick { remaining });
            }
        } else if self.detection_timer == Some(id) {
            outcome.sample_request = self.current_ticket();
        } else {
            debug!("Ignoring fire from stale timer {:?}", id);
        }

        outcome
    }

    /// Feed a sample for the running session
    pub fn on_sample(&mut self, sample: Sample) -> Vec<CaptureEvent> {
        match self.current_ticket() {
            Some(ticket) => self.on_sample_for(ticket, sample),
            None => Vec::new(),
        }
    }

    /// Feed a sample produced for `ticket`. Samples from an earlier session are dropped.
    pub fn on_sample_for(&mut self, ticket: SampleTicket, sample: Sample) -> Vec<CaptureEvent> {
        if ticket.generation != self.generation || !self.state.is_active() {
            debug!(
                "Dropping sample for session {} (current {}, {:?})",
                ticket.generation, self.generation, self.state
            );
            return Vec::new();
        }

        match sample {
            Sample::Failed(reason) => {
                warn!("Face estimation failed, skipping sample: {}", reason);
                Vec::new()
            }
            Sample::Happiness(score) if score >= self.options.happiness_threshold => {
                self.on_happy(score)
            }
            Sample::Happiness(score) => {
                debug!(
                    "Happiness {:.3} below threshold {:.2}",
                    score, self.options.happiness_threshold
                );
                self.on_low(CancelReason::HappinessDropped)
            }
            Sample::NoFace => {
                debug!("No face detected");
                self.on_low(CancelReason::FaceLost)
            }
        }
    }

    /// Return to idle from any state, clearing every timer.
    ///
    /// Yields `SessionCancelled` unless the controller was already idle.
    pub fn cancel(&mut self) -> Option<CaptureEvent> {
        if self.state == SessionState::Idle {
            return None;
        }

        let from = self.state;
        self.clear_timers();
        self.state = SessionState::Idle;
        info!("Capture session {} cancelled while {:?}", self.generation, from);

        Some(CaptureEvent::SessionCancelled {
            session: self.generation,
            from,
        })
    }

    fn on_happy(&mut self, score: f32) -> Vec<CaptureEvent> {
        self.low_streak = 0;
        if self.state != SessionState::Armed {
            return Vec::new();
        }

        info!(
            "Smile detected ({:.3} >= {:.2})",
            score, self.options.happiness_threshold
        );

        if self.options.captures_immediately() {
            return vec![self.capture()];
        }

        if self.countdown_timer.is_some() {
            return Vec::new();
        }

        let countdown = CountdownState::new(self.options.countdown_ticks);
        self.countdown = Some(countdown);
        self.countdown_timer = Some(
            self.ticker
                .start_interval(TimerKind::Countdown, self.options.countdown_tick),
        );
        self.state = SessionState::CountingDown;

        vec![CaptureEvent::CountdownStarted {
            remaining: countdown.remaining(),
        }]
    }

    fn on_low(&mut self, reason: CancelReason) -> Vec<CaptureEvent> {
        if self.state != SessionState::CountingDown {
            return Vec::new();
        }

        self.low_streak += 1;
        if self.low_streak < self.options.cancel_after_low_samples.max(1) {
            debug!(
                "Low sample {}/{} during countdown",
                self.low_streak, self.options.cancel_after_low_samples
            );
            return Vec::new();
        }

        if let Some(id) = self.countdown_timer.take() {
            self.ticker.clear(id);
        }
        self.countdown = None;
        self.low_streak = 0;
        self.state = SessionState::Armed;
        info!("Countdown cancelled: {}", reason);

        vec![CaptureEvent::CountdownCancelled { reason }]
    }

    fn capture(&mut self) -> CaptureEvent {
        self.clear_timers();
        self.state = SessionState::Captured;
        info!("Capture session {} triggered a photo", self.generation);
        CaptureEvent::Captured {
            session: self.generation,
        }
    }

    fn clear_timers(&mut self) {
        for id in [
            self.detection_timer.take(),
            self.session_timer.take(),
            self.countdown_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.ticker.clear(id);
        }
        self.countdown = None;
        self.low_streak = 0;
    }
}
