//! Two-way synchronisation with the server.
//!
//! A sync run walks [`SYNC_ORDER`] once. Each step uploads the locally
//! dirty records of one entity type and, in the same request, streams the
//! server's changes since that type's watermark into the database. The
//! first step that does not succeed ends the run.

pub mod pipeline;
mod prefs;
mod progress;
mod worker;

pub use prefs::*;
pub use progress::*;
pub use worker::{SyncOutcome, SyncWorker, DEFAULT_CHANNEL_CAPACITY};

use std::fmt;
use std::sync::MutexGuard;

use rusqlite::Connection;

use crate::db::{self, Database, DbResult, SharedDatabase};
use crate::error::{SyncError, SyncResult};
use crate::net::NetworkResult;

pub(crate) fn lock_db(db: &SharedDatabase) -> SyncResult<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|_| SyncError::Task("database lock poisoned by a panicked writer".into()))
}

/// One entity type's round trip within a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStep {
    Patients,
    HealthFacilities,
    Readings,
    Referrals,
    Assessments,
    FormTemplates,
}

/// Steps in the order a run performs them. Patients come before everything
/// that references them, and facilities before referrals.
pub const SYNC_ORDER: [SyncStep; 6] = [
    SyncStep::Patients,
    SyncStep::HealthFacilities,
    SyncStep::Readings,
    SyncStep::Referrals,
    SyncStep::Assessments,
    SyncStep::FormTemplates,
];

impl SyncStep {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStep::Patients => "Patients",
            SyncStep::HealthFacilities => "Health facilities",
            SyncStep::Readings => "Readings",
            SyncStep::Referrals => "Referrals",
            SyncStep::Assessments => "Assessments",
            SyncStep::FormTemplates => "Form templates",
        }
    }

    /// Key of the persisted "changes since" timestamp; form templates have none.
    pub fn watermark(&self) -> Option<EntityKind> {
        match self {
            SyncStep::Patients => Some(EntityKind::Patients),
            SyncStep::HealthFacilities => Some(EntityKind::HealthFacilities),
            SyncStep::Readings => Some(EntityKind::Readings),
            SyncStep::Referrals => Some(EntityKind::Referrals),
            SyncStep::Assessments => Some(EntityKind::Assessments),
            SyncStep::FormTemplates => None,
        }
    }

    /// Phase announced before the request goes out. `None` for download-only steps.
    pub fn upload_phase(&self, pending: usize) -> Option<SyncPhase> {
        let idle = pending == 0;
        match self {
            SyncStep::Patients if idle => Some(SyncPhase::CheckingServerPatients),
            SyncStep::Patients => Some(SyncPhase::UploadingPatients),
            SyncStep::Readings if idle => Some(SyncPhase::CheckingServerReadings),
            SyncStep::Readings => Some(SyncPhase::UploadingReadings),
            SyncStep::Referrals if idle => Some(SyncPhase::CheckingServerReferrals),
            SyncStep::Referrals => Some(SyncPhase::UploadingReferrals),
            SyncStep::Assessments if idle => Some(SyncPhase::CheckingServerAssessments),
            SyncStep::Assessments => Some(SyncPhase::UploadingAssessments),
            SyncStep::HealthFacilities | SyncStep::FormTemplates => None,
        }
    }

    pub fn download_phase(&self) -> SyncPhase {
        match self {
            SyncStep::Patients => SyncPhase::DownloadingPatients,
            SyncStep::HealthFacilities => SyncPhase::DownloadingHealthFacilities,
            SyncStep::Readings => SyncPhase::DownloadingReadings,
            SyncStep::Referrals => SyncPhase::DownloadingReferrals,
            SyncStep::Assessments => SyncPhase::DownloadingAssessments,
            SyncStep::FormTemplates => SyncPhase::DownloadingFormTemplates,
        }
    }

    /// Records of this type still waiting for upload.
    pub fn count_pending(&self, conn: &Connection) -> DbResult<u32> {
        match self {
            SyncStep::Patients => db::count_patients_to_upload(conn),
            SyncStep::Readings => db::count_readings_to_upload(conn),
            SyncStep::Referrals => db::count_referrals_to_upload(conn),
            SyncStep::Assessments => db::count_assessments_to_upload(conn),
            SyncStep::HealthFacilities | SyncStep::FormTemplates => Ok(0),
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counts for one successful step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub step: SyncStep,
    /// Records the server accepted
    pub uploaded: u32,
    /// Records written to the database
    pub downloaded: u32,
    /// Total the server announced, if it did
    pub total: Option<u64>,
    /// Non-empty `errors` field of the response
    pub errors: Option<String>,
}

/// Why a step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub step: SyncStep,
    /// HTTP status, when the server answered
    pub status_code: Option<u16>,
    pub message: String,
}

impl PhaseFailure {
    pub fn from_result<T>(step: SyncStep, result: &NetworkResult<T>) -> Self {
        Self {
            step,
            status_code: result.status_code(),
            message: result
                .failure_summary()
                .unwrap_or_else(|| "unexpected success".to_string()),
        }
    }

    /// A failure that happened locally, before or after the request.
    pub fn local(step: SyncStep, error: &SyncError) -> Self {
        Self {
            step,
            status_code: None,
            message: format!("{}: {}", error.kind(), error),
        }
    }
}

/// Outcome of a completed sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Timestamp written to every successful step's watermark
    pub sync_time: i64,
    pub phases: Vec<PhaseReport>,
    pub failure: Option<PhaseFailure>,
}

impl SyncReport {
    pub fn new(sync_time: i64) -> Self {
        Self {
            sync_time,
            phases: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn phase(&self, step: SyncStep) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.step == step)
    }

    /// Summary shown to the user.
    pub fn message(&self) -> String {
        if let Some(failure) = &self.failure {
            return format!("Sync failed while syncing {}: {}", failure.step.label().to_lowercase(), failure.message);
        }

        let mut lines = vec!["Sync complete.".to_string()];
        for phase in &self.phases {
            let line = match phase.step {
                SyncStep::HealthFacilities | SyncStep::FormTemplates => {
                    format!("{}: downloaded {}", phase.step, phase.downloaded)
                }
                _ => format!(
                    "{}: uploaded {}, downloaded {}",
                    phase.step, phase.uploaded, phase.downloaded
                ),
            };
            lines.push(line);
            if let Some(errors) = &phase.errors {
                lines.push(format!("  server reported errors: {}", errors));
            }
        }
        lines.join("\n")
    }
}
