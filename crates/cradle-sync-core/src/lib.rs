//! CRADLE Sync Core Library
//!
//! Offline-first store for patient health records with two-way server sync.
//!
//! # Architecture
//!
//! ```text
//!   local edits ──► SQLite (dirty: lastEdited > base / !isUploadedToServer)
//!                      │
//!                 SyncWorker, one step per entity type
//!                      │
//!        POST <entity>/sync?since=<watermark>   body = dirty records
//!                      │
//!              response body, streamed
//!                      │
//!   ChunkReader ─► serde visitor ─► bounded channel ─► writer thread
//!                                                       (one transaction,
//!                                                        commit on Complete)
//!                      │
//!        watermark := sync start time   (only if the step succeeded)
//! ```
//!
//! # Core Principle
//!
//! **A step is all-or-nothing.** Downloaded records become visible only if
//! the whole response was received and parsed.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer with dirty tracking
//! - [`models`]: Domain types (Patient, Reading, Referral, Assessment, etc.)
//! - [`codec`]: Streaming decoder for sync responses
//! - [`net`]: HTTP transport, endpoints and the typed server API
//! - [`sync`]: Sync orchestration, download pipeline, progress and watermarks
//! - [`login`]: Login bootstrap and logout

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod login;
pub mod models;
pub mod net;
pub mod sync;

// Re-export commonly used types
pub use config::SyncConfig;
pub use db::{Database, SharedDatabase};
pub use error::{SyncError, SyncResult};
pub use login::{LoginManager, LoginOutcome};
pub use models::{Assessment, FormClassification, HealthFacility, Patient, Reading, Referral, Sex};
pub use net::{NetworkResult, RestApi};
pub use sync::{SyncOutcome, SyncPhase, SyncProgress, SyncReport, SyncStep, SyncWorker};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

use net::{Endpoints, Http, HttpClient, ReqwestClient};
use sync::{DbPreferences, Preferences, ProgressReporter};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CradleSyncError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Login error: {0}")]
    LoginError(String),
}

impl From<db::DbError> for CradleSyncError {
    fn from(e: db::DbError) -> Self {
        CradleSyncError::DatabaseError(e.to_string())
    }
}

impl From<error::SyncError> for CradleSyncError {
    fn from(e: error::SyncError) -> Self {
        match e {
            error::SyncError::Database(e) => CradleSyncError::DatabaseError(e.to_string()),
            error::SyncError::Config(msg) => CradleSyncError::InvalidInput(msg),
            error::SyncError::AlreadyLoggedIn | error::SyncError::NotLoggedIn => {
                CradleSyncError::LoginError(e.to_string())
            }
            other => CradleSyncError::SyncError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CradleSyncError {
    fn from(e: serde_json::Error) -> Self {
        CradleSyncError::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for CradleSyncError {
    fn from(e: std::io::Error) -> Self {
        CradleSyncError::SyncError(format!("Runtime error: {}", e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for CradleSyncError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CradleSyncError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create the record store at `db_path`.
///
/// `config_json` is a [`SyncConfig`] as JSON; missing fields take their
/// defaults.
#[uniffi::export]
pub fn open_cradle_sync(db_path: String, config_json: String) -> Result<Arc<CradleSync>, CradleSyncError> {
    let config = SyncConfig::from_json(&config_json)?;
    let db = Database::open(&db_path)?.into_shared();
    let client = ReqwestClient::new(&config)?;
    Ok(Arc::new(CradleSync::with_client(db, &config, Arc::new(client))?))
}

/// Open an in-memory store (for testing).
#[uniffi::export]
pub fn open_cradle_sync_in_memory(config_json: String) -> Result<Arc<CradleSync>, CradleSyncError> {
    let config = SyncConfig::from_json(&config_json)?;
    let db = Database::open_in_memory()?.into_shared();
    let client = ReqwestClient::new(&config)?;
    Ok(Arc::new(CradleSync::with_client(db, &config, Arc::new(client))?))
}

/// Send engine logs to stderr. `filter` uses `RUST_LOG` syntax.
#[uniffi::export]
pub fn init_logging(filter: Option<String>) -> Result<(), CradleSyncError> {
    logging::init_logging(filter.as_deref()).map_err(|e| CradleSyncError::InvalidInput(e.to_string()))
}

// =========================================================================
// Main API Object
// =========================================================================

/// The engine as seen by the host app. Every call blocks the calling thread.
#[derive(uniffi::Object)]
pub struct CradleSync {
    runtime: tokio::runtime::Runtime,
    db: SharedDatabase,
    worker: SyncWorker,
    login: LoginManager,
    progress: Arc<ProgressReporter>,
}

impl CradleSync {
    /// Build an engine over an open database and any HTTP client.
    pub fn with_client(
        db: SharedDatabase,
        config: &SyncConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, CradleSyncError> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("cradle-sync")
            .build()?;

        let http = Http::new(client, config.channel_capacity);
        let api = RestApi::new(http, Endpoints::new(config));
        let prefs: Arc<dyn Preferences> = Arc::new(DbPreferences::new(db.clone()));
        let progress = Arc::new(ProgressReporter::with_interval(config.progress_interval()));

        let worker = SyncWorker::new(db.clone(), api.clone(), prefs.clone(), progress.clone())
            .with_channel_capacity(config.channel_capacity);
        let login = LoginManager::new(db.clone(), api, prefs, progress.clone())
            .with_channel_capacity(config.channel_capacity)
            .with_run_lock(worker.run_lock());

        Ok(Self {
            runtime,
            db,
            worker,
            login,
            progress,
        })
    }

    /// Shared database handle.
    pub fn database(&self) -> SharedDatabase {
        self.db.clone()
    }
}

#[uniffi::export]
impl CradleSync {
    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Log in and download the user's records.
    pub fn login(&self, email: String, password: String) -> Result<FfiLoginResult, CradleSyncError> {
        let result = self.runtime.block_on(self.login.login(&email, &password));
        Ok(FfiLoginResult::from(result))
    }

    /// Log out, removing the session and every local record.
    pub fn logout(&self) -> Result<(), CradleSyncError> {
        self.runtime.block_on(self.login.logout())?;
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.login.is_logged_in()
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Run a sync now. Returns `None` if one was already running.
    pub fn sync_now(&self) -> Result<Option<FfiSyncReport>, CradleSyncError> {
        match self.runtime.block_on(self.worker.run())? {
            SyncOutcome::Finished(report) => Ok(Some(report.into())),
            SyncOutcome::AlreadyRunning => Ok(None),
        }
    }

    /// Latest published progress.
    pub fn current_progress(&self) -> FfiSyncProgress {
        self.progress.current().into()
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Create a patient locally. It is uploaded on the next sync.
    pub fn create_patient(&self, name: String, sex: String) -> Result<FfiPatient, CradleSyncError> {
        let sex = Sex::parse(&sex).ok_or_else(|| CradleSyncError::InvalidInput(format!("unknown sex '{}'", sex)))?;
        let patient = Patient::new(name, sex);
        let db = self.db.lock()?;
        db.upsert_patient(&patient)?;
        Ok(patient.into())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: String) -> Result<Option<FfiPatient>, CradleSyncError> {
        let db = self.db.lock()?;
        let patient = db.get_patient(&id)?;
        Ok(patient.map(|p| p.into()))
    }

    /// List all patients.
    pub fn list_patients(&self) -> Result<Vec<FfiPatient>, CradleSyncError> {
        let db = self.db.lock()?;
        let patients = db.list_patients()?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    // =========================================================================
    // Reading Operations
    // =========================================================================

    /// Record a reading for a patient. It is uploaded on the next sync.
    pub fn add_reading(&self, reading: FfiNewReading) -> Result<String, CradleSyncError> {
        let mut new = Reading::new(
            reading.patient_id,
            reading.bp_systolic,
            reading.bp_diastolic,
            reading.heart_rate_bpm,
        );
        new.symptoms = reading.symptoms;
        let db = self.db.lock()?;
        db.add_reading(&new)?;
        Ok(new.id)
    }

    // =========================================================================
    // Health Facility Operations
    // =========================================================================

    pub fn list_health_facilities(&self) -> Result<Vec<FfiHealthFacility>, CradleSyncError> {
        let db = self.db.lock()?;
        let facilities = db.list_health_facilities()?;
        Ok(facilities.into_iter().map(|f| f.into()).collect())
    }

    /// Mark a facility as one the user refers to. Returns false if unknown.
    pub fn set_health_facility_selected(&self, name: String, selected: bool) -> Result<bool, CradleSyncError> {
        let db = self.db.lock()?;
        Ok(db.set_health_facility_selected(&name, selected)?)
    }

    // =========================================================================
    // Pending Upload Counts
    // =========================================================================

    /// Number of local records the server has not acknowledged.
    pub fn pending_upload_count(&self) -> Result<u32, CradleSyncError> {
        let db = self.db.lock()?;
        Ok(db.count_patients_to_upload()?
            + db.count_readings_to_upload()?
            + db.count_referrals_to_upload()?
            + db.count_assessments_to_upload()?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub name: String,
    pub dob: Option<String>,
    pub sex: String,
    pub is_pregnant: bool,
    pub zone: Option<String>,
    pub village_number: Option<String>,
    pub last_edited: Option<i64>,
    pub base: Option<i64>,
    pub needs_upload: bool,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            needs_upload: patient.needs_upload(),
            id: patient.id,
            name: patient.name,
            dob: patient.dob,
            sex: patient.sex.as_str().to_string(),
            is_pregnant: patient.is_pregnant,
            zone: patient.zone,
            village_number: patient.village_number,
            last_edited: patient.last_edited,
            base: patient.base,
        }
    }
}

/// FFI-safe input for a new reading.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNewReading {
    pub patient_id: String,
    pub bp_systolic: i32,
    pub bp_diastolic: i32,
    pub heart_rate_bpm: i32,
    pub symptoms: Vec<String>,
}

/// FFI-safe health facility.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHealthFacility {
    pub name: String,
    pub location: Option<String>,
    pub phone_number: Option<String>,
    pub is_user_selected: bool,
}

impl From<HealthFacility> for FfiHealthFacility {
    fn from(facility: HealthFacility) -> Self {
        Self {
            name: facility.name,
            location: facility.location,
            phone_number: facility.phone_number,
            is_user_selected: facility.is_user_selected,
        }
    }
}

/// FFI-safe per-step sync counts.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPhaseReport {
    pub step: String,
    pub uploaded: u32,
    pub downloaded: u32,
    pub errors: Option<String>,
}

impl From<sync::PhaseReport> for FfiPhaseReport {
    fn from(phase: sync::PhaseReport) -> Self {
        Self {
            step: phase.step.label().to_string(),
            uploaded: phase.uploaded,
            downloaded: phase.downloaded,
            errors: phase.errors,
        }
    }
}

/// FFI-safe sync report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    pub success: bool,
    pub message: String,
    pub sync_time: i64,
    pub phases: Vec<FfiPhaseReport>,
    pub failed_status_code: Option<u16>,
}

impl From<SyncReport> for FfiSyncReport {
    fn from(report: SyncReport) -> Self {
        Self {
            success: report.is_success(),
            message: report.message(),
            sync_time: report.sync_time,
            failed_status_code: report.failure.as_ref().and_then(|f| f.status_code),
            phases: report.phases.into_iter().map(|p| p.into()).collect(),
        }
    }
}

/// FFI-safe progress snapshot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncProgress {
    pub phase: String,
    pub current: Option<u32>,
    pub total: Option<u32>,
}

impl From<SyncProgress> for FfiSyncProgress {
    fn from(progress: SyncProgress) -> Self {
        Self {
            phase: progress.phase.as_str().to_string(),
            current: progress.progress.map(|(current, _)| current),
            total: progress.progress.map(|(_, total)| total),
        }
    }
}

/// FFI-safe login result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLoginResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub user_id: Option<i64>,
    pub health_facility_name: Option<String>,
    pub failed_downloads: Vec<String>,
}

impl From<NetworkResult<LoginOutcome>> for FfiLoginResult {
    fn from(result: NetworkResult<LoginOutcome>) -> Self {
        let status_code = result.status_code();
        let message = result.error_message();
        match result {
            NetworkResult::Success { value, .. } => Self {
                success: true,
                status_code,
                message: None,
                user_id: Some(value.user_id),
                health_facility_name: value.health_facility_name,
                failed_downloads: value
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.step, f.message))
                    .collect(),
            },
            _ => Self {
                success: false,
                status_code,
                message,
                user_id: None,
                health_facility_name: None,
                failed_downloads: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Method, MockHttpClient, MockReply};

    fn engine(mock: Arc<MockHttpClient>) -> CradleSync {
        let db = Database::open_in_memory().unwrap().into_shared();
        CradleSync::with_client(db, &SyncConfig::new("cradle.test"), mock).unwrap()
    }

    #[test]
    fn test_sync_requires_login() {
        let sync = engine(Arc::new(MockHttpClient::new()));
        assert!(!sync.is_logged_in());
        assert!(matches!(sync.sync_now(), Err(CradleSyncError::LoginError(_))));
    }

    #[test]
    fn test_create_patient_is_pending() {
        let sync = engine(Arc::new(MockHttpClient::new()));
        let patient = sync.create_patient("Asha".into(), "FEMALE".into()).unwrap();
        assert!(patient.needs_upload);
        assert_eq!(sync.pending_upload_count().unwrap(), 1);
        assert!(sync.create_patient("X".into(), "unknown".into()).is_err());
    }

    #[test]
    fn test_login_then_sync_through_facade() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(
            Method::Post,
            "/user/auth",
            MockReply::json(200, r#"{"email":"a@b.c","role":"VHT","healthFacilityName":"H1","userId":3,"token":"t"}"#),
        );
        mock.on(Method::Get, "/facilities", MockReply::json(200, r#"[{"name":"H1"},{"name":"H2"}]"#));
        for path in ["/mobile/patients", "/mobile/readings", "/mobile/referrals", "/mobile/assessments"] {
            mock.on(Method::Get, path, MockReply::json(200, "[]"));
        }
        mock.on(Method::Post, "/sync/patients", MockReply::json(200, r#"{"total":0,"patients":[]}"#));
        mock.on(Method::Post, "/sync/readings", MockReply::json(200, r#"{"total":0,"readings":[]}"#));
        mock.on(Method::Post, "/sync/referrals", MockReply::json(200, r#"{"total":0,"referrals":[]}"#));
        mock.on(Method::Post, "/sync/assessments", MockReply::json(200, r#"{"total":0,"assessments":[]}"#));
        mock.on(Method::Get, "/forms/classifications", MockReply::json(200, "[]"));

        let sync = engine(mock);
        let login = sync.login("a@b.c".into(), "pw".into()).unwrap();
        assert!(login.success);
        assert_eq!(login.user_id, Some(3));

        let selected: Vec<_> = sync
            .list_health_facilities()
            .unwrap()
            .into_iter()
            .filter(|f| f.is_user_selected)
            .map(|f| f.name)
            .collect();
        assert_eq!(selected, vec!["H1".to_string()]);

        let report = sync.sync_now().unwrap().unwrap();
        assert!(report.success, "{}", report.message);
        assert_eq!(report.phases.len(), 6);
        assert_eq!(sync.current_progress().phase, "DONE");

        sync.logout().unwrap();
        assert!(!sync.is_logged_in());
        assert!(sync.list_health_facilities().unwrap().is_empty());
    }
}
