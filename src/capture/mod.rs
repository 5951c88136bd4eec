//! Smile-triggered capture: the session state machine and its scheduler.

mod controller;
mod state;
mod ticker;
#[cfg(test)]
mod tests;

pub use controller::{CaptureController, CaptureOptions, SampleTicket, TimerOutcome};
pub use state::{CancelReason, CaptureEvent, CountdownState, Sample, SessionState};
pub use ticker::{IntervalSchedule, Ticker, TimerFire, TimerId, TimerKind};
