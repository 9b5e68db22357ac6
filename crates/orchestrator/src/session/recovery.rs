//! Time-boxed session recovery cache.
//!
//! At most one record lives per `(user_id, kind)`. A record is valid while
//! `now - saved_at < ttl`; expired or undecodable records are deleted on the
//! read that finds them, so no background sweep is needed.
//!
//! Concurrent writers for the same key are last-writer-wins. There is no
//! merge, since one user session is expected to have a single writer.

use super::store::{InMemorySessionStore, SessionStore};
use chrono::{DateTime, Duration, Utc};
use common::{AppError, RecoveryAction};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecoveryConfig {
    /// Records older than this are treated as absent
    pub ttl_hours: u64,
    pub key_prefix: String,
}

impl Default for SessionRecoveryConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            key_prefix: "session_recovery".to_string(),
        }
    }
}

impl SessionRecoveryConfig {
    pub fn ttl(&self) -> Duration {
        i64::try_from(self.ttl_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Onboarding,
    Analysis,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Onboarding => "onboarding",
            SessionKind::Analysis => "analysis",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a conversational workflow that a client can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecoveryRecord {
    pub session_id: String,
    pub user_id: String,
    pub session_kind: SessionKind,
    pub last_activity_at: DateTime<Utc>,
    /// Overwritten by [`SessionRecoveryCache::save`]
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl SessionRecoveryRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        session_kind: SessionKind,
        payload: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            session_kind,
            last_activity_at: now,
            saved_at: now,
            payload,
        }
    }

    /// Mark user activity.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.saved_at
    }
}

/// A resumable session together with the choices to offer the user.
#[derive(Debug, Clone)]
pub struct RecoveryOffer {
    pub record: SessionRecoveryRecord,
    pub age: Duration,
    pub actions: Vec<RecoveryAction>,
}

pub struct SessionRecoveryCache {
    store: Arc<dyn SessionStore>,
    config: SessionRecoveryConfig,
}

impl fmt::Debug for SessionRecoveryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecoveryCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionRecoveryCache {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionRecoveryConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: SessionRecoveryConfig) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()), config)
    }

    pub fn config(&self) -> &SessionRecoveryConfig {
        &self.config
    }

    /// `{prefix}_{user_id}_{kind}`
    pub fn storage_key(&self, user_id: &str, kind: SessionKind) -> String {
        format!("{}_{}_{}", self.config.key_prefix, user_id, kind)
    }

    /// Upsert `record`, stamping `saved_at`. Storage failures are logged and
    /// reported as `false`, never raised.
    pub async fn save(&self, mut record: SessionRecoveryRecord) -> bool {
        record.saved_at = Utc::now();
        let key = self.storage_key(&record.user_id, record.session_kind);

        let encoded = match serde_json::to_string(&record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode session recovery record");
                return false;
            }
        };

        match self.store.set(&key, encoded).await {
            Ok(()) => {
                debug!(
                    key = %key,
                    session_id = %record.session_id,
                    "Session recovery record saved"
                );
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to save session recovery record");
                false
            }
        }
    }

    /// The live record for `(user_id, kind)`, if any.
    pub async fn get(&self, user_id: &str, kind: SessionKind) -> Option<SessionRecoveryRecord> {
        let key = self.storage_key(user_id, kind);

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read session recovery record");
                return None;
            }
        };

        let record: SessionRecoveryRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable session recovery record");
                self.purge(&key).await;
                return None;
            }
        };

        // A record stored under this key for someone else is not ours to read
        // or delete.
        if record.user_id != user_id || record.session_kind != kind {
            warn!(
                key = %key,
                stored_user = %record.user_id,
                stored_kind = %record.session_kind,
                "Ignoring session recovery record owned by another session"
            );
            return None;
        }

        let age = record.age(Utc::now());
        if age >= self.config.ttl() {
            info!(
                key = %key,
                age_minutes = age.num_minutes(),
                "Session recovery record expired"
            );
            self.purge(&key).await;
            return None;
        }

        Some(record)
    }

    /// Delete the record, e.g. after the recovered workflow completes.
    pub async fn clear(&self, user_id: &str, kind: SessionKind) -> Result<(), AppError> {
        let key = self.storage_key(user_id, kind);
        self.store.delete(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to clear session recovery record");
            AppError::storage(format!("Failed to clear session recovery record {key}"))
        })?;
        debug!(key = %key, "Session recovery record cleared");
        Ok(())
    }

    /// Discard any saved session because the user chose to start over.
    pub async fn start_fresh(&self, user_id: &str, kind: SessionKind) -> Result<(), AppError> {
        info!(user_id, kind = %kind, "User chose to start a fresh session");
        self.clear(user_id, kind).await
    }

    pub async fn check_for_recovery(
        &self,
        user_id: &str,
        kind: SessionKind,
    ) -> Option<RecoveryOffer> {
        let record = self.get(user_id, kind).await?;
        let age = record.age(Utc::now());

        debug!(
            user_id,
            kind = %kind,
            session_id = %record.session_id,
            age_minutes = age.num_minutes(),
            "Offering session recovery"
        );

        Some(RecoveryOffer {
            record,
            age,
            actions: vec![
                RecoveryAction::session_recovery(
                    "Resume where you left off",
                    "Continue the previous session from its last saved step",
                ),
                RecoveryAction::manual("Start fresh", "Discard the saved session and begin again"),
            ],
        })
    }

    async fn purge(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete stale session recovery record");
        }
    }
}
