//! The sync run itself.

use std::future::Future;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::pipeline::{stream_into_store, DownloadSender, ProgressFn};
use super::{
    lock_db, PhaseFailure, PhaseReport, Preferences, ProgressReporter, Session, SyncPhase,
    SyncReport, SyncStep, Watermarks, SYNC_ORDER,
};
use crate::codec::DecodedResponse;
use crate::db::{self, DbResult, SharedDatabase};
use crate::error::{SyncError, SyncResult};
use crate::models::{unix_now, Assessment, FormClassification, HealthFacility, Patient, Referral};
use crate::net::{NetworkResult, RestApi};

/// Default capacity of a download channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Finished(SyncReport),
    /// Another run was in progress; this request did nothing.
    AlreadyRunning,
}

/// Runs sync against the server for the logged-in user.
pub struct SyncWorker {
    db: SharedDatabase,
    api: RestApi,
    prefs: Arc<dyn Preferences>,
    watermarks: Watermarks,
    progress: Arc<ProgressReporter>,
    channel_capacity: usize,
    run_lock: Arc<Mutex<()>>,
}

impl SyncWorker {
    pub fn new(
        db: SharedDatabase,
        api: RestApi,
        prefs: Arc<dyn Preferences>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            db,
            api,
            watermarks: Watermarks::new(prefs.clone()),
            prefs,
            progress,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.progress
    }

    /// Lock held for the whole of a run. Give it to the [`LoginManager`] so
    /// login and logout never overlap a run.
    ///
    /// [`LoginManager`]: crate::login::LoginManager
    pub fn run_lock(&self) -> Arc<Mutex<()>> {
        self.run_lock.clone()
    }

    /// Run one sync.
    ///
    /// Returns [`SyncOutcome::AlreadyRunning`] right away if a run, a login
    /// or a logout is in progress. Server and local failures end the run and are described in
    /// the report; `Err` is only returned when nobody is logged in or the
    /// session cannot be read.
    pub async fn run(&self) -> SyncResult<SyncOutcome> {
        let Ok(_running) = self.run_lock.try_lock() else {
            info!("sync or login already in progress, ignoring request");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let session = Session::load(self.prefs.as_ref())?.ok_or(SyncError::NotLoggedIn)?;
        let api = self.api.clone().with_token(session.token);
        let sync_time = unix_now();

        self.progress.enter(SyncPhase::Starting, 0, 0);
        info!(sync_time, user_id = session.user_id, "starting sync");

        let mut report = SyncReport::new(sync_time);
        for step in SYNC_ORDER {
            match self.run_step(&api, step, sync_time).await {
                Ok(phase) => {
                    info!(
                        step = %step,
                        uploaded = phase.uploaded,
                        downloaded = phase.downloaded,
                        "sync step finished"
                    );
                    report.phases.push(phase);
                }
                Err(failure) => {
                    warn!(step = %step, status = ?failure.status_code, "sync failed: {}", failure.message);
                    report.failure = Some(failure);
                    self.progress.enter(SyncPhase::Failed, 0, 0);
                    return Ok(SyncOutcome::Finished(report));
                }
            }
        }

        self.progress.enter(SyncPhase::Done, 0, 0);
        info!("sync complete");
        Ok(SyncOutcome::Finished(report))
    }

    async fn run_step(
        &self,
        api: &RestApi,
        step: SyncStep,
        sync_time: i64,
    ) -> Result<PhaseReport, PhaseFailure> {
        let local = |e: SyncError| PhaseFailure::local(step, &e);
        let since = match step.watermark() {
            Some(kind) => self.watermarks.get(kind).map_err(local)?,
            None => 0,
        };

        match step {
            SyncStep::Patients => {
                let uploads = self.read_local(db::patients_to_upload).map_err(local)?;
                let pending = uploads.len();
                let writer = |conn: &Connection, p: Patient| db::upsert_patient(conn, &p);
                self.exchange(step, pending, sync_time, writer, move |sender, progress| async move {
                    api.sync_patients(&uploads, since, sender, progress).await
                })
                .await
            }
            SyncStep::HealthFacilities => {
                let writer =
                    |conn: &Connection, f: HealthFacility| db::upsert_health_facility(conn, &f, true);
                self.exchange(step, 0, sync_time, writer, move |sender, progress| {
                    api.get_health_facilities(sender, progress)
                })
                .await
            }
            SyncStep::Readings => {
                let uploads = self.read_local(db::readings_to_upload).map_err(local)?;
                let pending = uploads.len();
                let writer = db::store_server_reading;
                self.exchange(step, pending, sync_time, writer, move |sender, progress| async move {
                    api.sync_readings(&uploads, since, sender, progress).await
                })
                .await
            }
            SyncStep::Referrals => {
                let uploads = self.read_local(db::referrals_to_upload).map_err(local)?;
                let pending = uploads.len();
                let writer = |conn: &Connection, r: Referral| db::upsert_referral(conn, &r, true);
                self.exchange(step, pending, sync_time, writer, move |sender, progress| async move {
                    api.sync_referrals(&uploads, since, sender, progress).await
                })
                .await
            }
            SyncStep::Assessments => {
                let uploads = self.read_local(db::assessments_to_upload).map_err(local)?;
                let pending = uploads.len();
                let writer = |conn: &Connection, a: Assessment| db::upsert_assessment(conn, &a, true);
                self.exchange(step, pending, sync_time, writer, move |sender, progress| async move {
                    api.sync_assessments(&uploads, since, sender, progress).await
                })
                .await
            }
            SyncStep::FormTemplates => {
                let writer =
                    |conn: &Connection, form: FormClassification| db::upsert_form_classification(conn, &form);
                self.exchange(step, 0, sync_time, writer, move |sender, progress| {
                    api.get_form_templates(sender, progress)
                })
                .await
            }
        }
    }

    /// Send one request and stream its response into the database.
    async fn exchange<T, W, F, Fut>(
        &self,
        step: SyncStep,
        pending: usize,
        sync_time: i64,
        writer: W,
        call: F,
    ) -> Result<PhaseReport, PhaseFailure>
    where
        T: Send + 'static,
        W: FnMut(&Connection, T) -> DbResult<()> + Send + 'static,
        F: FnOnce(DownloadSender<T>, ProgressFn) -> Fut,
        Fut: Future<Output = NetworkResult<DecodedResponse>>,
    {
        let local = |e: SyncError| PhaseFailure::local(step, &e);
        let pending_count = u32::try_from(pending).unwrap_or(u32::MAX);
        match step.upload_phase(pending) {
            Some(phase) => self.progress.enter(phase, 0, pending_count),
            None => self.progress.enter(step.download_phase(), 0, 0),
        }

        let on_progress = self.download_progress(step);
        let result = stream_into_store(&self.db, self.channel_capacity, writer, move |sender| {
            call(sender, on_progress)
        })
        .await;

        let (decoded, written) = match result {
            NetworkResult::Success { value, .. } => value,
            other => {
                if let NetworkResult::NetworkException(SyncError::Database(e)) = &other {
                    error!(step = %step, "local store rejected downloaded records: {}", e);
                }
                return Err(PhaseFailure::from_result(step, &other));
            }
        };

        let residual = self
            .read_local(|conn| step.count_pending(conn))
            .map_err(local)?;
        if residual > 0 {
            warn!(
                step = %step,
                residual,
                "records still need upload after a successful sync"
            );
        }
        if let Some(errors) = &decoded.errors {
            warn!(step = %step, "server reported errors: {}", errors);
        }
        if let Some(kind) = step.watermark() {
            self.watermarks.set(kind, sync_time).map_err(local)?;
        }

        let downloaded = u32::try_from(written).unwrap_or(u32::MAX);
        let total = decoded
            .total
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(downloaded)
            .max(downloaded);
        self.progress.report_now(step.download_phase(), downloaded, total);

        Ok(PhaseReport {
            step,
            uploaded: pending_count.saturating_sub(residual),
            downloaded,
            total: decoded.total,
            errors: decoded.errors,
        })
    }

    /// Progress callback for a download. The first element switches the
    /// published phase to the step's download phase.
    fn download_progress(&self, step: SyncStep) -> ProgressFn {
        let reporter = self.progress.clone();
        let phase = step.download_phase();
        Box::new(move |current, total| {
            if current == 1 {
                reporter.enter(phase, current, total);
            } else {
                reporter.report(phase, current, total);
            }
        })
    }

    fn read_local<R>(&self, read: impl FnOnce(&Connection) -> DbResult<R>) -> SyncResult<R> {
        let guard = lock_db(&self.db)?;
        Ok(read(guard.conn())?)
    }
}
