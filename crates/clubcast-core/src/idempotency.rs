//! Content-addressed idempotency store.
//!
//! Maps a `(tenant, payload)` fingerprint to the terminal outcome of the
//! request that first carried it, so unreliable mobile clients can resubmit
//! freely. Only completed records count as hits; pending markers expire by
//! TTL rather than wedging a key forever.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::{
    error::Result,
    models::{JobOutcome, TenantId},
    time::Clock,
};

/// Retention window for idempotency records, completed or not.
pub const RETENTION_HOURS: i64 = 24;

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// Key seen, outcome not yet committed.
    Pending,
    /// Terminal outcome committed.
    Stored,
}

/// Stored record for one idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    /// Record lifecycle state.
    pub status: IdempotencyStatus,
    /// Terminal outcome; `None` while pending.
    pub response: Option<JobOutcome>,
    /// When the record was last written.
    pub stored_at: DateTime<Utc>,
}

/// Derives the idempotency key for a request.
///
/// With an explicit client token the key is `<tenant>:<token>`. Otherwise
/// the payload is canonicalized (object keys sorted recursively) and
/// fingerprinted with SHA-256, so semantically identical payloads hash
/// identically regardless of client serialization order.
pub fn derive_key(tenant: &TenantId, explicit: Option<&str>, payload: &Value) -> String {
    match explicit {
        Some(token) if !token.is_empty() => format!("{tenant}:{token}"),
        _ => {
            let canonical = canonical_json(payload);
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            format!("{tenant}:{}", hex::encode(hasher.finalize()))
        },
    }
}

/// Serializes a JSON value with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            },
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            },
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Storage contract for idempotency records.
///
/// `check` is read-only and treats pending records as misses; `begin`
/// writes the pending marker; `commit` writes the terminal outcome and
/// overwrites any prior entry (last-write-wins — only the queue consumer
/// commits for a given key).
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Looks up a key, returning the record only if a completed outcome
    /// exists within the retention window.
    fn check(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotencyRecord>>> + Send + '_>>;

    /// Marks a key as seen before its job is enqueued.
    fn begin(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Commits the terminal outcome for a key.
    fn commit(
        &self,
        key: &str,
        outcome: &JobOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-memory idempotency store with TTL expiry.
///
/// Suitable for tests and single-node deployments; records older than the
/// retention window are dropped lazily on access.
pub struct MemoryIdempotencyStore {
    records: RwLock<HashMap<String, IdempotencyRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryIdempotencyStore {
    /// Creates an empty store using the given clock for TTL decisions.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { records: RwLock::new(HashMap::new()), clock }
    }

    fn expired(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
        now - record.stored_at > Duration::hours(RETENTION_HOURS)
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn check(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotencyRecord>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now();
            let records = self.records.read().await;
            let hit = records
                .get(&key)
                .filter(|r| r.status == IdempotencyStatus::Stored && !self.expired(r, now))
                .cloned();
            Ok(hit)
        })
    }

    fn begin(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let now = self.clock.now();
            let mut records = self.records.write().await;
            records.retain(|_, r| !self.expired(r, now));
            // A completed record is never downgraded back to pending.
            records.entry(key).or_insert(IdempotencyRecord {
                status: IdempotencyStatus::Pending,
                response: None,
                stored_at: now,
            });
            Ok(())
        })
    }

    fn commit(
        &self,
        key: &str,
        outcome: &JobOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let outcome = outcome.clone();
        Box::pin(async move {
            let now = self.clock.now();
            let mut records = self.records.write().await;
            records.insert(key, IdempotencyRecord {
                status: IdempotencyStatus::Stored,
                response: Some(outcome),
                stored_at: now,
            });
            Ok(())
        })
    }
}
