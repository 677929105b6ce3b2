//! Login, initial download and logout.
//!
//! A successful login stores the session and then pulls the user's full
//! data set through the same streaming pipeline sync uses. Each download
//! commits on its own; a failed one is reported but does not undo the login.

use std::future::Future;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::codec::DecodedResponse;
use crate::db::{self, DbResult, SharedDatabase};
use crate::error::SyncError;
use crate::models::{unix_now, Assessment, HealthFacility, Patient, Referral};
use crate::net::{LoginResponse, NetworkResult, RestApi};
use crate::sync::pipeline::{stream_into_store, DownloadSender, ProgressFn};
use crate::sync::{
    lock_db, PhaseFailure, Preferences, ProgressReporter, Session, SyncPhase, SyncStep, Watermarks,
    DEFAULT_CHANNEL_CAPACITY,
};

/// What a successful login fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user_id: i64,
    pub email: String,
    pub role: Option<String>,
    pub first_name: Option<String>,
    pub health_facility_name: Option<String>,
    /// Records written per completed download
    pub downloads: Vec<(SyncStep, usize)>,
    /// Downloads that failed or were skipped because one they depend on failed
    pub failures: Vec<PhaseFailure>,
}

impl LoginOutcome {
    fn new(response: &LoginResponse) -> Self {
        Self {
            user_id: response.user_id,
            email: response.email.clone(),
            role: response.role.clone(),
            first_name: response.first_name.clone(),
            health_facility_name: response.health_facility_name.clone(),
            downloads: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn downloaded(&self, step: SyncStep) -> Option<usize> {
        self.downloads
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, count)| *count)
    }
}

pub struct LoginManager {
    db: SharedDatabase,
    api: RestApi,
    prefs: Arc<dyn Preferences>,
    progress: Arc<ProgressReporter>,
    channel_capacity: usize,
    run_lock: Arc<Mutex<()>>,
}

impl LoginManager {
    pub fn new(
        db: SharedDatabase,
        api: RestApi,
        prefs: Arc<dyn Preferences>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            db,
            api,
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

    /// Serialise login and logout with sync runs. Pass
    /// [`SyncWorker::run_lock`](crate::sync::SyncWorker::run_lock).
    pub fn with_run_lock(mut self, run_lock: Arc<Mutex<()>>) -> Self {
        self.run_lock = run_lock;
        self
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(Session::load(self.prefs.as_ref()), Ok(Some(_)))
    }

    /// Authenticate and download the user's data.
    ///
    /// Fails with [`SyncError::AlreadyLoggedIn`] if a session exists. A
    /// rejected login leaves no session behind.
    pub async fn login(&self, email: &str, password: &str) -> NetworkResult<LoginOutcome> {
        let _guard = self.run_lock.lock().await;

        match Session::load(self.prefs.as_ref()) {
            Ok(None) => {}
            Ok(Some(_)) => return NetworkResult::NetworkException(SyncError::AlreadyLoggedIn),
            Err(e) => return NetworkResult::NetworkException(e),
        }

        let response = match self.api.authenticate(email, password).await {
            NetworkResult::Success { value, .. } => value,
            other => {
                warn!(status = ?other.status_code(), "login rejected");
                return other.cast();
            }
        };

        let login_time = unix_now();
        let session = Session {
            token: response.token.clone(),
            user_id: response.user_id,
            email: response.email.clone(),
            role: response.role.clone(),
            health_facility_name: response.health_facility_name.clone(),
        };
        if let Err(e) = session.store(self.prefs.as_ref()) {
            return NetworkResult::NetworkException(e);
        }
        info!(user_id = response.user_id, "logged in, downloading data");

        let api = self.api.clone().with_token(&response.token);
        let mut outcome = LoginOutcome::new(&response);

        let writer = |conn: &Connection, p: Patient| db::upsert_patient(conn, &p);
        let patients = self
            .download(&mut outcome, SyncStep::Patients, login_time, writer, |sender, progress| {
                api.get_all_patients(sender, progress)
            })
            .await;

        let home = response.health_facility_name.clone();
        let writer = move |conn: &Connection, f: HealthFacility| {
            let select = home.as_deref() == Some(f.name.as_str());
            db::upsert_health_facility(conn, &f, select)
        };
        let facilities = self
            .download(&mut outcome, SyncStep::HealthFacilities, login_time, writer, |sender, progress| {
                api.get_health_facilities(sender, progress)
            })
            .await;

        if patients {
            let writer = db::store_server_reading;
            self.download(&mut outcome, SyncStep::Readings, login_time, writer, |sender, progress| {
                api.get_all_readings(sender, progress)
            })
            .await;
        } else {
            outcome.failures.push(skipped(SyncStep::Readings));
        }

        if patients && facilities {
            let writer = |conn: &Connection, r: Referral| db::upsert_referral(conn, &r, true);
            self.download(&mut outcome, SyncStep::Referrals, login_time, writer, |sender, progress| {
                api.get_all_referrals(sender, progress)
            })
            .await;
        } else {
            outcome.failures.push(skipped(SyncStep::Referrals));
        }

        if patients {
            let writer = |conn: &Connection, a: Assessment| db::upsert_assessment(conn, &a, true);
            self.download(&mut outcome, SyncStep::Assessments, login_time, writer, |sender, progress| {
                api.get_all_assessments(sender, progress)
            })
            .await;
        } else {
            outcome.failures.push(skipped(SyncStep::Assessments));
        }

        self.progress.enter(SyncPhase::Idle, 0, 0);
        NetworkResult::Success {
            value: outcome,
            status_code: 200,
        }
    }

    /// Forget the session and every watermark, and empty the database.
    ///
    /// Waits for a running sync to finish first.
    pub async fn logout(&self) -> Result<(), SyncError> {
        let _guard = self.run_lock.lock().await;
        self.prefs.clear_except(&[])?;
        lock_db(&self.db)?.clear_all_tables()?;
        self.progress.enter(SyncPhase::Idle, 0, 0);
        info!("logged out");
        Ok(())
    }

    /// Run one bootstrap download. Returns whether it committed.
    async fn download<T, W, F, Fut>(
        &self,
        outcome: &mut LoginOutcome,
        step: SyncStep,
        login_time: i64,
        writer: W,
        call: F,
    ) -> bool
    where
        T: Send + 'static,
        W: FnMut(&Connection, T) -> DbResult<()> + Send + 'static,
        F: FnOnce(DownloadSender<T>, ProgressFn) -> Fut,
        Fut: Future<Output = NetworkResult<DecodedResponse>>,
    {
        let phase = step.download_phase();
        self.progress.enter(phase, 0, 0);
        let reporter = self.progress.clone();
        let on_progress: ProgressFn = Box::new(move |current, total| {
            reporter.report(phase, current, total);
        });

        let result = stream_into_store(&self.db, self.channel_capacity, writer, move |sender| {
            call(sender, on_progress)
        })
        .await;

        match result {
            NetworkResult::Success {
                value: (_, written),
                ..
            } => {
                if let Some(kind) = step.watermark() {
                    if let Err(e) = Watermarks::new(self.prefs.clone()).set(kind, login_time) {
                        outcome.failures.push(PhaseFailure::local(step, &e));
                        return false;
                    }
                }
                let count = u32::try_from(written).unwrap_or(u32::MAX);
                self.progress.report_now(phase, count, count);
                outcome.downloads.push((step, written));
                true
            }
            other => {
                let failure = PhaseFailure::from_result(step, &other);
                warn!(step = %step, "login download failed: {}", failure.message);
                outcome.failures.push(failure);
                false
            }
        }
    }
}

fn skipped(step: SyncStep) -> PhaseFailure {
    PhaseFailure {
        step,
        status_code: None,
        message: "skipped because an earlier download failed".to_string(),
    }
}
