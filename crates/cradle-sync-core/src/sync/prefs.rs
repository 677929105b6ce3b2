//! Persisted key/value settings: sync watermarks and the login session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::db::SharedDatabase;
use crate::error::{SyncError, SyncResult};

/// String key/value store that survives restarts.
pub trait Preferences: Send + Sync {
    fn get_string(&self, key: &str) -> SyncResult<Option<String>>;
    fn put_string(&self, key: &str, value: &str) -> SyncResult<()>;
    fn remove(&self, key: &str) -> SyncResult<()>;
    /// Remove every key not listed in `keep`.
    fn clear_except(&self, keep: &[&str]) -> SyncResult<()>;
}

/// [`Preferences`] stored in the database's `sync_state` table.
pub struct DbPreferences {
    db: SharedDatabase,
}

impl DbPreferences {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

impl Preferences for DbPreferences {
    fn get_string(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(super::lock_db(&self.db)?.get_sync_state(key)?)
    }

    fn put_string(&self, key: &str, value: &str) -> SyncResult<()> {
        Ok(super::lock_db(&self.db)?.set_sync_state(key, value)?)
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        Ok(super::lock_db(&self.db)?.remove_sync_state(key)?)
    }

    fn clear_except(&self, keep: &[&str]) -> SyncResult<()> {
        Ok(super::lock_db(&self.db)?.clear_sync_state(keep)?)
    }
}

/// In-memory [`Preferences`].
#[derive(Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Preferences for MemoryPreferences {
    fn get_string(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.values().get(key).cloned())
    }

    fn put_string(&self, key: &str, value: &str) -> SyncResult<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.values().remove(key);
        Ok(())
    }

    fn clear_except(&self, keep: &[&str]) -> SyncResult<()> {
        self.values().retain(|k, _| keep.contains(&k.as_str()));
        Ok(())
    }
}

// =========================================================================
// Watermarks
// =========================================================================

/// Watermark used when an entity type has never synced.
pub const DEFAULT_WATERMARK: i64 = 1;

/// Entity types with their own watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Patients,
    Readings,
    Referrals,
    Assessments,
    HealthFacilities,
}

impl EntityKind {
    pub fn watermark_key(&self) -> &'static str {
        match self {
            EntityKind::Patients => "lastSyncTime",
            EntityKind::Readings => "lastSyncTimeReadings",
            EntityKind::Referrals => "lastSyncTimeReferrals",
            EntityKind::Assessments => "lastSyncTimeAssessments",
            EntityKind::HealthFacilities => "lastSyncTimeHealthFacilities",
        }
    }
}

/// Per-entity "server changes since" timestamps.
#[derive(Clone)]
pub struct Watermarks {
    prefs: Arc<dyn Preferences>,
}

impl Watermarks {
    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self { prefs }
    }

    pub fn get(&self, kind: EntityKind) -> SyncResult<i64> {
        let stored = self.prefs.get_string(kind.watermark_key())?;
        Ok(match stored {
            None => DEFAULT_WATERMARK,
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(key = kind.watermark_key(), value = %value, "ignoring unparsable watermark");
                DEFAULT_WATERMARK
            }),
        })
    }

    pub fn set(&self, kind: EntityKind, timestamp: i64) -> SyncResult<()> {
        self.prefs
            .put_string(kind.watermark_key(), &timestamp.to_string())
    }
}

// =========================================================================
// Session
// =========================================================================

const TOKEN_KEY: &str = "token";
const USER_ID_KEY: &str = "userId";
const EMAIL_KEY: &str = "loginEmail";
const ROLE_KEY: &str = "userRole";
const FACILITY_KEY: &str = "userHealthFacility";

/// Credentials and identity of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub email: String,
    pub role: Option<String>,
    pub health_facility_name: Option<String>,
}

impl Session {
    /// The stored session, or `None` if nobody is logged in.
    pub fn load(prefs: &dyn Preferences) -> SyncResult<Option<Session>> {
        let Some(token) = prefs.get_string(TOKEN_KEY)? else {
            return Ok(None);
        };
        let user_id = prefs
            .get_string(USER_ID_KEY)?
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| SyncError::Protocol("stored session has no user id".into()))?;
        Ok(Some(Session {
            token,
            user_id,
            email: prefs.get_string(EMAIL_KEY)?.unwrap_or_default(),
            role: prefs.get_string(ROLE_KEY)?,
            health_facility_name: prefs.get_string(FACILITY_KEY)?,
        }))
    }

    pub fn store(&self, prefs: &dyn Preferences) -> SyncResult<()> {
        prefs.put_string(TOKEN_KEY, &self.token)?;
        prefs.put_string(USER_ID_KEY, &self.user_id.to_string())?;
        prefs.put_string(EMAIL_KEY, &self.email)?;
        if let Some(role) = &self.role {
            prefs.put_string(ROLE_KEY, role)?;
        }
        if let Some(facility) = &self.health_facility_name {
            prefs.put_string(FACILITY_KEY, facility)?;
        }
        Ok(())
    }
}
