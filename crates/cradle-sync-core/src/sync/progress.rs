//! Sync progress reporting with a rate limit.
//!
//! Decoders report after every element, which for large downloads is far
//! more often than any observer can use. [`ProgressReporter::report`] drops
//! reports that arrive sooner than the configured interval after the last
//! published one; [`ProgressReporter::report_now`] always publishes and is
//! used for phase changes and final counts.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock-independent system clock.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced by hand, for tests and simulations.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lets one call through per interval. The first call always passes.
pub struct RateLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<Duration>>,
}

impl RateLimiter {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            last: Mutex::new(None),
        }
    }

    /// Returns true if the caller may proceed, and starts a new interval.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.saturating_sub(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Forget the last pass so the next call goes through.
    pub fn reset(&self) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Stage of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Idle,
    Starting,
    CheckingServerPatients,
    UploadingPatients,
    DownloadingPatients,
    DownloadingHealthFacilities,
    CheckingServerReadings,
    UploadingReadings,
    DownloadingReadings,
    CheckingServerReferrals,
    UploadingReferrals,
    DownloadingReferrals,
    CheckingServerAssessments,
    UploadingAssessments,
    DownloadingAssessments,
    DownloadingFormTemplates,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "IDLE",
            SyncPhase::Starting => "STARTING",
            SyncPhase::CheckingServerPatients => "CHECKING_SERVER_PATIENTS",
            SyncPhase::UploadingPatients => "UPLOADING_PATIENTS",
            SyncPhase::DownloadingPatients => "DOWNLOADING_PATIENTS",
            SyncPhase::DownloadingHealthFacilities => "DOWNLOADING_HEALTH_FACILITIES",
            SyncPhase::CheckingServerReadings => "CHECKING_SERVER_READINGS",
            SyncPhase::UploadingReadings => "UPLOADING_READINGS",
            SyncPhase::DownloadingReadings => "DOWNLOADING_READINGS",
            SyncPhase::CheckingServerReferrals => "CHECKING_SERVER_REFERRALS",
            SyncPhase::UploadingReferrals => "UPLOADING_REFERRALS",
            SyncPhase::DownloadingReferrals => "DOWNLOADING_REFERRALS",
            SyncPhase::CheckingServerAssessments => "CHECKING_SERVER_ASSESSMENTS",
            SyncPhase::UploadingAssessments => "UPLOADING_ASSESSMENTS",
            SyncPhase::DownloadingAssessments => "DOWNLOADING_ASSESSMENTS",
            SyncPhase::DownloadingFormTemplates => "DOWNLOADING_FORM_TEMPLATES",
            SyncPhase::Done => "DONE",
            SyncPhase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }
}

/// Snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    /// `(current, total)`; absent when there is nothing to count
    pub progress: Option<(u32, u32)>,
}

impl SyncProgress {
    pub fn new(phase: SyncPhase, current: u32, total: u32) -> Self {
        let progress = if current == 0 && total == 0 {
            None
        } else {
            Some((current, total))
        };
        Self { phase, progress }
    }
}

/// Publishes [`SyncProgress`] on a watch channel.
pub struct ProgressReporter {
    tx: watch::Sender<SyncProgress>,
    limiter: RateLimiter,
}

impl ProgressReporter {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(SyncProgress::new(SyncPhase::Idle, 0, 0));
        Self {
            tx,
            limiter: RateLimiter::new(interval, clock),
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::new(interval, Arc::new(MonotonicClock::new()))
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn current(&self) -> SyncProgress {
        *self.tx.borrow()
    }

    /// Publish unless the last publication was less than one interval ago.
    pub fn report(&self, phase: SyncPhase, current: u32, total: u32) -> bool {
        if !self.limiter.try_acquire() {
            return false;
        }
        self.tx.send_replace(SyncProgress::new(phase, current, total));
        true
    }

    /// Publish unconditionally.
    pub fn report_now(&self, phase: SyncPhase, current: u32, total: u32) {
        self.tx.send_replace(SyncProgress::new(phase, current, total));
    }

    /// Start a new phase. The next rate-limited report passes immediately.
    pub fn enter(&self, phase: SyncPhase, current: u32, total: u32) {
        debug!(phase = phase.as_str(), "sync phase");
        self.limiter.reset();
        self.report_now(phase, current, total);
    }
}
