use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EventBusError, StorageError};
use crate::events::{EventBus, EventFilter, EventReceiver, SnapEvent};
use crate::storage::{GalleryEntry, GallerySource};

/// Shown when the bucket has no images yet
pub const EMPTY_GALLERY_MESSAGE: &str = "No winners yet! Be the first to win today!";

/// Images captured on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySection {
    pub date: NaiveDate,
    pub heading: String,
    pub count_label: String,
    pub entries: Vec<GalleryEntry>,
}

/// `1 winner`, `3 winners`
pub fn winners_label(count: usize) -> String {
    format!("{} winner{}", count, if count == 1 { "" } else { "s" })
}

/// Group entries by local calendar day in `tz`, newest day first.
/// Entry order inside a day is preserved.
pub fn group_by_day(entries: &[GalleryEntry], tz: Tz, today: NaiveDate) -> Vec<DaySection> {
    let mut sections: Vec<DaySection> = Vec::new();

    for entry in entries {
        let date = entry.uploaded_at.with_timezone(&tz).date_naive();
        match sections.iter_mut().find(|section| section.date == date) {
            Some(section) => section.entries.push(entry.clone()),
            None => sections.push(DaySection {
                date,
                heading: String::new(),
                count_label: String::new(),
                entries: vec![entry.clone()],
            }),
        }
    }

    sections.sort_by(|a, b| b.date.cmp(&a.date));
    for section in &mut sections {
        section.heading = if section.date == today {
            "Today's Winners".to_string()
        } else {
            format!("{} Winners", section.date.format("%A, %B %-d, %Y"))
        };
        section.count_label = winners_label(section.entries.len());
    }

    sections
}

/// Current date in `tz`
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

struct GalleryShared {
    source: Arc<dyn GallerySource>,
    event_bus: Arc<EventBus>,
    snapshot: RwLock<Vec<GalleryEntry>>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
}

impl GalleryShared {
    async fn refresh(&self) -> Result<usize, StorageError> {
        match self.source.list_entries().await {
            Ok(entries) => {
                let count = entries.len();
                *self.snapshot.write() = entries;
                *self.last_updated.write() = Some(Utc::now());
                debug!("Gallery refreshed with {} entries", count);
                let _ = self.event_bus.publish(SnapEvent::GalleryRefreshed { count });
                Ok(count)
            }
            Err(e) => {
                warn!("Gallery refresh failed: {}", e);
                let _ = self.event_bus.publish(SnapEvent::GalleryFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// Polls the gallery source on a fixed interval while visible.
///
/// Hiding suspends polling; becoming visible again refreshes immediately.
/// Completed uploads and explicit requests also trigger a refresh.
pub struct GalleryPoller {
    shared: Arc<GalleryShared>,
    interval: Duration,
    visible: watch::Sender<bool>,
    refresh_requested: Arc<Notify>,
    cancellation_token: CancellationToken,
}

impl GalleryPoller {
    pub fn new(source: Arc<dyn GallerySource>, event_bus: Arc<EventBus>, interval: Duration) -> Self {
        let (visible, _) = watch::channel(true);
        Self {
            shared: Arc::new(GalleryShared {
                source,
                event_bus,
                snapshot: RwLock::new(Vec::new()),
                last_updated: RwLock::new(None),
            }),
            interval,
            visible,
            refresh_requested: Arc::new(Notify::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        let changed = self.visible.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
        if changed {
            info!(
                "Gallery {}",
                if visible { "visible, resuming polling" } else { "hidden, pausing polling" }
            );
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    pub fn snapshot(&self) -> Vec<GalleryEntry> {
        self.shared.snapshot.read().clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_updated.read()
    }

    /// Fetch once, outside the polling schedule
    pub async fn refresh(&self) -> Result<usize, StorageError> {
        self.shared.refresh().await
    }

    /// Spawn the polling loop
    pub fn start(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let mut visible = self.visible.subscribe();
        let refresh_requested = Arc::clone(&self.refresh_requested);
        let token = self.cancellation_token.clone();
        let mut uploads = Some(shared.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["upload_completed"]),
            "gallery_poller",
        ));

        tokio::spawn(async move {
            info!("Gallery poller started ({}s interval)", interval.as_secs());

            loop {
                if !*visible.borrow_and_update() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        changed = visible.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                }

                let _ = shared.refresh().await;

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = refresh_requested.notified() => {
                        debug!("Gallery refresh requested");
                    }
                    changed = visible.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    received = next_upload(&mut uploads) => {
                        if let Err(EventBusError::ChannelClosed) = received {
                            uploads = None;
                        }
                    }
                }
            }

            info!("Gallery poller stopped");
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }
}

async fn next_upload(receiver: &mut Option<EventReceiver>) -> Result<SnapEvent, EventBusError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        entries: Vec<GalleryEntry>,
    }

    #[async_trait::async_trait]
    impl GallerySource for CountingSource {
        async fn list_entries(&self) -> Result<Vec<GalleryEntry>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.clone())
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl GallerySource for FailingSource {
        async fn list_entries(&self) -> Result<Vec<GalleryEntry>, StorageError> {
            Err(StorageError::BucketUnavailable {
                bucket: "photos".to_string(),
                details: "offline".to_string(),
            })
        }
    }

    fn entry(name: &str, uploaded_at: DateTime<Utc>) -> GalleryEntry {
        GalleryEntry {
            url: format!("http://localhost/{}", name),
            filename: name.to_string(),
            uploaded_at,
            size: 10,
        }
    }

    fn counting_source() -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            entries: vec![entry("a.png", Utc::now())],
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_group_by_day_headings() {
        let tz: Tz = "UTC".parse().unwrap();
        let entries = vec![
            entry("c.png", Utc.with_ymd_and_hms(2024, 3, 5, 18, 0, 0).unwrap()),
            entry("b.png", Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()),
            entry("a.png", Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let sections = group_by_day(&entries, tz, today);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "Today's Winners");
        assert_eq!(sections[0].count_label, "2 winners");
        assert_eq!(sections[0].entries[0].filename, "c.png");
        assert_eq!(sections[1].heading, "Monday, March 4, 2024 Winners");
        assert_eq!(sections[1].count_label, "1 winner");
    }

    #[test]
    fn test_group_by_day_uses_local_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 02:00 UTC on the 5th is still the evening of the 4th in New York
        let entries = vec![entry(
            "late.png",
            Utc.with_ymd_and_hms(2024, 3, 5, 2, 0, 0).unwrap(),
        )];
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let sections = group_by_day(&entries, tz, today);
        assert_eq!(sections[0].date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_ne!(sections[0].heading, "Today's Winners");
    }

    #[test]
    fn test_group_by_day_empty() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(group_by_day(&[], chrono_tz::UTC, today).is_empty());
        assert_eq!(winners_label(0), "0 winners");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval_while_visible() {
        let source = counting_source();
        let bus = Arc::new(EventBus::new(16));
        let poller = GalleryPoller::new(source.clone(), bus, Duration::from_secs(10));

        let handle = poller.start();
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(poller.snapshot().len(), 1);
        assert!(poller.last_updated().is_some());

        tokio::time::sleep(Duration::from_secs(25)).await;
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        poller.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_suspends_and_visible_refreshes_immediately() {
        let source = counting_source();
        let bus = Arc::new(EventBus::new(16));
        let poller = GalleryPoller::new(source.clone(), bus, Duration::from_secs(10));

        let handle = poller.start();
        settle().await;
        poller.set_visible(false);
        settle().await;
        assert!(!poller.is_visible());

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        poller.set_visible(true);
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        poller.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_event_triggers_refresh() {
        let source = counting_source();
        let bus = Arc::new(EventBus::new(16));
        let poller = GalleryPoller::new(source.clone(), Arc::clone(&bus), Duration::from_secs(10));

        let handle = poller.start();
        settle().await;

        bus.publish(SnapEvent::UploadCompleted {
            url: "http://localhost/a.png".to_string(),
            filename: "a.png".to_string(),
        })
        .unwrap();
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        poller.request_refresh();
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        poller.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_refresh_is_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.subscribe();
        let poller = GalleryPoller::new(Arc::new(FailingSource), Arc::clone(&bus), Duration::from_secs(10));

        assert!(poller.refresh().await.is_err());
        assert!(poller.snapshot().is_empty());

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "gallery_failed");
    }
}
