use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    /// Detection is polling, no countdown in progress
    Armed,
    CountingDown,
    Captured,
}

impl SessionState {
    /// Detection polling and the session timer only run in these states
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Armed | SessionState::CountingDown)
    }
}

/// One detection tick's worth of input
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// First detected face's happy score
    Happiness(f32),
    NoFace,
    /// The estimator failed on this frame
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    HappinessDropped,
    FaceLost,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::HappinessDropped => write!(f, "happiness dropped below threshold"),
            CancelReason::FaceLost => write!(f, "face lost"),
        }
    }
}

/// Countdown from a fixed start value to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownState {
    remaining: u32,
}

impl CountdownState {
    pub fn new(start: u32) -> Self {
        Self { remaining: start }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Decrement once; true when the countdown has reached zero
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

/// Events emitted by the capture controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureEvent {
    SessionStarted { session: u64, timeout_seconds: u32 },
    SessionTick { remaining_seconds: u32 },
    CountdownStarted { remaining: u32 },
    CountdownTick { remaining: u32 },
    CountdownCancelled { reason: CancelReason },
    Captured { session: u64 },
    SessionExpired { session: u64 },
    SessionCancelled { session: u64, from: SessionState },
}

impl CaptureEvent {
    pub fn description(&self) -> String {
        match self {
            CaptureEvent::SessionStarted {
                session,
                timeout_seconds,
            } => format!("Session {} started ({}s)", session, timeout_seconds),
            CaptureEvent::SessionTick { remaining_seconds } => {
                format!("{}s left in session", remaining_seconds)
            }
            CaptureEvent::CountdownStarted { remaining } => {
                format!("Smile detected! Countdown started at {}", remaining)
            }
            CaptureEvent::CountdownTick { remaining } => format!("Countdown: {}", remaining),
            CaptureEvent::CountdownCancelled { reason } => {
                format!("Countdown cancelled - {}", reason)
            }
            CaptureEvent::Captured { session } => format!("Session {} captured a photo", session),
            CaptureEvent::SessionExpired { session } => {
                format!("Session {} expired before capture", session)
            }
            CaptureEvent::SessionCancelled { session, from } => {
                format!("Session {} cancelled while {:?}", session, from)
            }
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CaptureEvent::SessionStarted { .. } => "session_started",
            CaptureEvent::SessionTick { .. } => "session_tick",
            CaptureEvent::CountdownStarted { .. } => "countdown_started",
            CaptureEvent::CountdownTick { .. } => "countdown_tick",
            CaptureEvent::CountdownCancelled { .. } => "countdown_cancelled",
            CaptureEvent::Captured { .. } => "captured",
            CaptureEvent::SessionExpired { .. } => "session_expired",
            CaptureEvent::SessionCancelled { .. } => "session_cancelled",
        }
    }
}
