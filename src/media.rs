use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::error::CameraError;
use crate::frame::FrameData;

/// Requested capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for MediaConstraints {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// A live camera feed
pub trait FrameSource: Send + Sync {
    /// Latest frame, or None if nothing has been produced yet
    fn current_frame(&self) -> Option<FrameData>;

    /// Release the device. Called exactly once by [`MediaStream`].
    fn stop(&self);
}

/// Exclusively owned camera stream; the device is released on drop
pub struct MediaStream {
    source: Box<dyn FrameSource>,
    stopped: bool,
}

impl MediaStream {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            stopped: false,
        }
    }

    pub fn current_frame(&self) -> Option<FrameData> {
        if self.stopped {
            return None;
        }
        self.source.current_frame()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.source.stop();
        }
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, CameraError>;
}

/// Camera stand-in producing generated RGB frames.
///
/// Behaves like a single physical device: a second acquisition while a
/// stream is open fails with [`CameraError::DeviceBusy`].
pub struct SyntheticMediaSource {
    max_resolution: MediaConstraints,
    active_streams: Arc<AtomicUsize>,
    total_acquired: AtomicU64,
    failure: Mutex<Option<CameraError>>,
}

impl SyntheticMediaSource {
    pub fn new() -> Self {
        Self {
            max_resolution: MediaConstraints {
                width: 1920,
                height: 1080,
            },
            active_streams: Arc::new(AtomicUsize::new(0)),
            total_acquired: AtomicU64::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Make every acquisition fail with `error` until cleared
    pub fn set_failure(&self, error: Option<CameraError>) {
        *self.failure.lock() = error;
    }

    /// Streams currently holding the device
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    pub fn total_acquired(&self) -> u64 {
        self.total_acquired.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, CameraError> {
        if let Some(error) = self.failure.lock().clone() {
            warn!("Synthetic camera acquisition failing: {}", error);
            return Err(error);
        }

        if constraints.width == 0
            || constraints.height == 0
            || constraints.width > self.max_resolution.width
            || constraints.height > self.max_resolution.height
        {
            return Err(CameraError::UnsupportedConstraints {
                details: format!("{}x{}", constraints.width, constraints.height),
            });
        }

        if self
            .active_streams
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CameraError::DeviceBusy);
        }

        self.total_acquired.fetch_add(1, Ordering::SeqCst);
        info!(
            "Synthetic camera opened at {}x{}",
            constraints.width, constraints.height
        );

        Ok(MediaStream::new(Box::new(SyntheticFrames {
            constraints,
            next_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            active_streams: Arc::clone(&self.active_streams),
        })))
    }
}

struct SyntheticFrames {
    constraints: MediaConstraints,
    next_id: AtomicU64,
    stopped: AtomicBool,
    active_streams: Arc<AtomicUsize>,
}

impl FrameSource for SyntheticFrames {
    fn current_frame(&self) -> Option<FrameData> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let MediaConstraints { width, height } = self.constraints;

        // Horizontal gradient with a shade that shifts per frame
        let shade = (id % 256) as u8;
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _y in 0..height {
            for x in 0..width {
                let r = ((x * 255) / width.max(1)) as u8;
                data.extend_from_slice(&[r, shade, 255 - r]);
            }
        }

        Some(FrameData::new(id, SystemTime::now(), data, width, height))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.active_streams.fetch_sub(1, Ordering::SeqCst);
            debug!("Synthetic camera released");
        }
    }
}
