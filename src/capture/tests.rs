use super::*;
use std::time::Duration;

/// Drives a controller through virtual time, answering each detection request
/// synchronously with whatever the sampler returns for that instant.
struct Harness {
    controller: CaptureController<IntervalSchedule>,
    events: Vec<(Duration, CaptureEvent)>,
}

impl Harness {
    fn started(options: CaptureOptions) -> Self {
        let mut controller = CaptureController::new(IntervalSchedule::new());
        controller.set_estimator_ready(true);
        let events = controller
            .start(options)
            .into_iter()
            .map(|event| (Duration::ZERO, event))
            .collect();
        Self { controller, events }
    }

    fn run_until<F>(&mut self, until: Duration, mut sampler: F)
    where
        F: FnMut(Duration) -> Sample,
    {
        while let Some(fire) = self.controller.ticker_mut().pop_due(until) {
            let outcome = self.controller.on_timer(fire.id);
            self.record(fire.at, outcome.events);
            if let Some(ticket) = outcome.sample_request {
                let events = self.controller.on_sample_for(ticket, sampler(fire.at));
                self.record(fire.at, events);
            }
        }
        self.controller.ticker_mut().advance_to(until);
    }

    fn record(&mut self, at: Duration, events: Vec<CaptureEvent>) {
        self.events.extend(events.into_iter().map(|event| (at, event)));
    }

    fn times_of(&self, event_type: &str) -> Vec<Duration> {
        self.events
            .iter()
            .filter(|(_, event)| event.event_type() == event_type)
            .map(|(at, _)| *at)
            .collect()
    }

    fn count(&self, event_type: &str) -> usize {
        self.times_of(event_type).len()
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn happy_from(start: Duration, score: f32) -> impl FnMut(Duration) -> Sample {
    move |at| {
        if at >= start {
            Sample::Happiness(score)
        } else {
            Sample::Happiness(0.1)
        }
    }
}

#[test]
fn test_low_samples_never_leave_armed() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(19_900), |_| Sample::Happiness(0.94));
    assert_eq!(harness.controller.state(), SessionState::Armed);
    assert_eq!(harness.count("countdown_started"), 0);

    harness.run_until(ms(25_000), |_| Sample::NoFace);
    assert_eq!(harness.count("captured"), 0);
    assert_eq!(harness.times_of("session_expired"), vec![ms(20_000)]);
    assert_eq!(harness.controller.state(), SessionState::Idle);
}

#[test]
fn test_held_smile_captures_once_after_countdown() {
    let mut harness = Harness::started(CaptureOptions::default());

    // Detection polls at 300ms steps, so the first high sample lands at 2100ms
    harness.run_until(ms(30_000), happy_from(ms(2_000), 0.97));

    assert_eq!(harness.times_of("countdown_started"), vec![ms(2_100)]);
    assert_eq!(harness.times_of("countdown_tick"), vec![ms(3_100), ms(4_100)]);
    assert_eq!(harness.times_of("captured"), vec![ms(5_100)]);
    assert_eq!(harness.count("session_expired"), 0);
    assert_eq!(harness.controller.state(), SessionState::Captured);
    assert_eq!(harness.controller.ticker().active_count(), 0);
}

#[test]
fn test_drop_below_threshold_cancels_countdown() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(10_000), |at| {
        if at >= ms(2_100) && at <= ms(3_000) {
            Sample::Happiness(0.99)
        } else {
            Sample::Happiness(0.2)
        }
    });

    assert_eq!(harness.times_of("countdown_started"), vec![ms(2_100)]);
    assert_eq!(harness.times_of("countdown_cancelled"), vec![ms(3_300)]);
    assert_eq!(harness.count("captured"), 0);
    assert_eq!(harness.controller.state(), SessionState::Armed);
    assert_eq!(harness.controller.countdown_remaining(), None);
    assert_eq!(
        harness
            .controller
            .ticker()
            .active_of_kind(TimerKind::Countdown),
        0
    );
    assert!(harness.events.iter().any(|(_, event)| matches!(
        event,
        CaptureEvent::CountdownCancelled {
            reason: CancelReason::HappinessDropped
        }
    )));
}

#[test]
fn test_lost_face_cancels_with_distinct_reason() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(3_000), |at| {
        if at == ms(300) {
            Sample::Happiness(0.96)
        } else {
            Sample::NoFace
        }
    });

    assert_eq!(harness.times_of("countdown_cancelled"), vec![ms(600)]);
    assert!(harness.events.iter().any(|(_, event)| matches!(
        event,
        CaptureEvent::CountdownCancelled {
            reason: CancelReason::FaceLost
        }
    )));
}

#[test]
fn test_recrossing_after_cancel_starts_a_fresh_countdown() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(10_000), |at| {
        if at == ms(600) {
            Sample::Happiness(0.2)
        } else {
            Sample::Happiness(0.97)
        }
    });

    assert_eq!(harness.times_of("countdown_started"), vec![ms(300), ms(900)]);
    assert_eq!(harness.times_of("captured"), vec![ms(3_900)]);
}

#[test]
fn test_cancel_clears_every_timer_from_any_state() {
    // Armed
    let mut harness = Harness::started(CaptureOptions::default());
    harness.run_until(ms(1_000), |_| Sample::NoFace);
    let cancelled = harness.controller.cancel();
    assert!(matches!(
        cancelled,
        Some(CaptureEvent::SessionCancelled {
            from: SessionState::Armed,
            ..
        })
    ));

    // CountingDown
    let mut counting = Harness::started(CaptureOptions::default());
    counting.run_until(ms(1_000), |_| Sample::Happiness(0.99));
    assert_eq!(counting.controller.state(), SessionState::CountingDown);
    assert!(counting.controller.cancel().is_some());

    // Captured
    let mut captured = Harness::started(CaptureOptions::instant());
    captured.run_until(ms(1_000), |_| Sample::Happiness(0.9));
    assert_eq!(captured.controller.state(), SessionState::Captured);
    assert!(captured.controller.cancel().is_some());

    for mut harness in [harness, counting, captured] {
        assert_eq!(harness.controller.state(), SessionState::Idle);
        assert_eq!(harness.controller.ticker().active_count(), 0);
        assert_eq!(harness.controller.ticker().next_deadline(), None);

        let before = harness.events.len();
        harness.run_until(ms(60_000), |_| Sample::Happiness(1.0));
        assert_eq!(harness.events.len(), before);

        // Idempotent
        assert!(harness.controller.cancel().is_none());
        assert_eq!(harness.controller.state(), SessionState::Idle);
    }
}

#[test]
fn test_timeout_wins_tie_with_final_countdown_tick() {
    let options = CaptureOptions {
        poll_interval: ms(1_000),
        session_timeout_seconds: 4,
        ..CaptureOptions::default()
    };
    let mut harness = Harness::started(options);

    // Countdown starts at 1s, so its last tick and the timeout both land on 4s
    harness.run_until(ms(10_000), |_| Sample::Happiness(0.99));

    assert_eq!(harness.times_of("countdown_started"), vec![ms(1_000)]);
    assert_eq!(harness.times_of("session_expired"), vec![ms(4_000)]);
    assert_eq!(harness.count("captured"), 0);
    assert_eq!(harness.controller.state(), SessionState::Idle);
    assert_eq!(harness.controller.ticker().active_count(), 0);
}

#[test]
fn test_session_timer_precedes_countdown_at_same_instant() {
    // Whichever was scheduled first, the session fire comes out ahead
    for countdown_first in [true, false] {
        let mut schedule = IntervalSchedule::new();
        let (session, countdown) = if countdown_first {
            let countdown = schedule.start_interval(TimerKind::Countdown, ms(1_000));
            let session = schedule.start_interval(TimerKind::Session, ms(4_000));
            (session, countdown)
        } else {
            let session = schedule.start_interval(TimerKind::Session, ms(4_000));
            let countdown = schedule.start_interval(TimerKind::Countdown, ms(1_000));
            (session, countdown)
        };

        schedule.advance_to(ms(3_000));
        while schedule.pop_due(ms(3_000)).is_some() {}

        let first = schedule.pop_due(ms(4_000)).unwrap();
        assert_eq!((first.id, first.at), (session, ms(4_000)));

        // Expiry clears the countdown before its tick is delivered
        schedule.clear(countdown);
        assert!(schedule.pop_due(ms(4_000)).is_none());
    }
}

#[test]
fn test_countdown_finishing_before_timeout_captures() {
    let options = CaptureOptions {
        poll_interval: ms(1_000),
        session_timeout_seconds: 5,
        ..CaptureOptions::default()
    };
    let mut harness = Harness::started(options);

    harness.run_until(ms(10_000), |_| Sample::Happiness(0.99));

    assert_eq!(harness.times_of("captured"), vec![ms(4_000)]);
    assert_eq!(harness.count("session_expired"), 0);
    assert_eq!(harness.controller.session_remaining(), 1);
}

#[test]
fn test_timeout_mid_countdown_discards_it() {
    let options = CaptureOptions {
        session_timeout_seconds: 3,
        ..CaptureOptions::default()
    };
    let mut harness = Harness::started(options);

    harness.run_until(ms(10_000), happy_from(ms(1_500), 0.98));

    assert_eq!(harness.times_of("countdown_started"), vec![ms(1_500)]);
    assert_eq!(harness.times_of("session_expired"), vec![ms(3_000)]);
    assert_eq!(harness.count("captured"), 0);
    assert_eq!(harness.controller.countdown_remaining(), None);
}

#[test]
fn test_start_while_active_creates_no_second_timer() {
    let mut harness = Harness::started(CaptureOptions::default());
    assert_eq!(harness.controller.ticker().active_count(), 2);

    assert!(harness.controller.start(CaptureOptions::default()).is_empty());
    assert_eq!(harness.controller.ticker().active_count(), 2);
    assert_eq!(harness.controller.generation(), 1);

    harness.run_until(ms(400), |_| Sample::Happiness(0.99));
    assert_eq!(harness.controller.state(), SessionState::CountingDown);
    assert!(harness.controller.start(CaptureOptions::default()).is_empty());
    assert_eq!(
        harness
            .controller
            .ticker()
            .active_of_kind(TimerKind::Countdown),
        1
    );
    assert_eq!(
        harness
            .controller
            .ticker()
            .active_of_kind(TimerKind::Session),
        1
    );

    // Continued high samples do not restart or double-count the countdown
    harness.run_until(ms(10_000), |_| Sample::Happiness(0.99));
    assert_eq!(harness.times_of("countdown_tick"), vec![ms(1_300), ms(2_300)]);
    assert_eq!(harness.times_of("captured"), vec![ms(3_300)]);
}

#[test]
fn test_start_without_ready_estimator_is_noop() {
    let mut controller = CaptureController::new(IntervalSchedule::new());

    assert!(controller.start(CaptureOptions::default()).is_empty());
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.ticker().active_count(), 0);
    assert_eq!(controller.current_ticket(), None);
}

#[test]
fn test_start_from_captured_requires_reset() {
    let mut harness = Harness::started(CaptureOptions::instant());
    harness.run_until(ms(1_000), |_| Sample::Happiness(0.85));
    assert_eq!(harness.controller.state(), SessionState::Captured);

    assert!(harness.controller.start(CaptureOptions::instant()).is_empty());
    assert_eq!(harness.controller.ticker().active_count(), 0);

    harness.controller.cancel();
    let events = harness.controller.start(CaptureOptions::instant());
    assert_eq!(
        events,
        vec![CaptureEvent::SessionStarted {
            session: 2,
            timeout_seconds: 20
        }]
    );
}

#[test]
fn test_estimator_failures_are_skipped() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(10_000), |at| {
        if at == ms(300) {
            Sample::Happiness(0.99)
        } else {
            Sample::Failed("malformed frame".to_string())
        }
    });

    assert_eq!(harness.count("countdown_cancelled"), 0);
    assert_eq!(harness.times_of("captured"), vec![ms(3_300)]);
}

#[test]
fn test_failures_before_crossing_leave_session_armed() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(5_000), |_| Sample::Failed("backend".to_string()));

    assert_eq!(harness.controller.state(), SessionState::Armed);
    assert_eq!(harness.count("countdown_started"), 0);
}

#[test]
fn test_hysteresis_requires_consecutive_low_samples() {
    let options = CaptureOptions {
        cancel_after_low_samples: 2,
        ..CaptureOptions::default()
    };

    let mut tolerant = Harness::started(options.clone());
    tolerant.run_until(ms(10_000), |at| {
        if at == ms(600) || at == ms(1_500) {
            Sample::NoFace
        } else {
            Sample::Happiness(0.99)
        }
    });
    assert_eq!(tolerant.count("countdown_cancelled"), 0);
    assert_eq!(tolerant.times_of("captured"), vec![ms(3_300)]);

    let mut strict = Harness::started(options);
    strict.run_until(ms(2_000), |at| {
        if at == ms(300) {
            Sample::Happiness(0.99)
        } else {
            Sample::Happiness(0.5)
        }
    });
    assert_eq!(strict.times_of("countdown_cancelled"), vec![ms(900)]);
}

#[test]
fn test_instant_policy_captures_on_first_crossing() {
    let mut harness = Harness::started(CaptureOptions::instant());

    harness.run_until(ms(5_000), happy_from(ms(900), 0.81));

    assert_eq!(harness.count("countdown_started"), 0);
    assert_eq!(harness.times_of("captured"), vec![ms(900)]);
}

#[test]
fn test_threshold_is_inclusive() {
    let mut harness = Harness::started(CaptureOptions::default());

    harness.run_until(ms(400), |_| Sample::Happiness(0.95));

    assert_eq!(harness.controller.state(), SessionState::CountingDown);
    assert_eq!(harness.controller.countdown_remaining(), Some(3));
}

#[test]
fn test_stale_ticket_is_ignored_after_reset() {
    let mut controller = CaptureController::new(IntervalSchedule::new());
    controller.set_estimator_ready(true);
    controller.start(CaptureOptions::default());

    let fire = controller.ticker_mut().pop_due(ms(300)).unwrap();
    let stale = controller.on_timer(fire.id).sample_request.unwrap();

    controller.cancel();
    controller.start(CaptureOptions::default());

    assert!(controller
        .on_sample_for(stale, Sample::Happiness(1.0))
        .is_empty());
    assert_eq!(controller.state(), SessionState::Armed);

    // Stale timer ids are ignored too
    assert_eq!(controller.on_timer(fire.id), TimerOutcome::default());
}

#[test]
fn test_session_ticks_count_down_each_second() {
    let options = CaptureOptions {
        session_timeout_seconds: 3,
        ..CaptureOptions::default()
    };
    let mut harness = Harness::started(options);

    harness.run_until(ms(5_000), |_| Sample::NoFace);

    let remaining: Vec<u32> = harness
        .events
        .iter()
        .filter_map(|(_, event)| match event {
            CaptureEvent::SessionTick { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, vec![2, 1, 0]);
}

#[test]
fn test_options_follow_configuration() {
    let mut config = crate::config::SnapboothConfig::default();
    config.detection.poll_interval_ms = 250;
    config.detection.trigger_policy = crate::config::TriggerPolicy::Instant;
    config.session.timeout_seconds = 60;

    let options = CaptureOptions::from_config(&config);
    assert_eq!(options.poll_interval, ms(250));
    assert_eq!(options.session_timeout_seconds, 60);
    assert_eq!(options.trigger_policy, crate::config::TriggerPolicy::Instant);
}
