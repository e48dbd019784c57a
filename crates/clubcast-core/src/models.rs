//! Domain models for the Clubcast publish pipeline.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype for post job identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Newtype for tenant identifiers.
///
/// Tenants are club organizations; every quota, key, and queue entry is
/// scoped to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Creates a tenant ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Delivery destination for a post.
///
/// Closed set of known channels. The webhook relay is not a channel: it is
/// an alternative route to one of these destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Facebook page post.
    #[serde(rename = "fb")]
    Facebook,
    /// Instagram feed post.
    #[serde(rename = "ig")]
    Instagram,
    /// YouTube community/video post.
    #[serde(rename = "yt")]
    YouTube,
    /// X (Twitter) post.
    X,
}

impl Channel {
    /// All known channels, in canonical order.
    pub const ALL: [Self; 4] = [Self::Facebook, Self::Instagram, Self::YouTube, Self::X];

    /// Returns the wire name of the channel.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Facebook => "fb",
            Self::Instagram => "ig",
            Self::YouTube => "yt",
            Self::X => "x",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fb" | "facebook" => Ok(Self::Facebook),
            "ig" | "instagram" => Ok(Self::Instagram),
            "yt" | "youtube" => Ok(Self::YouTube),
            "x" | "twitter" => Ok(Self::X),
            other => Err(crate::error::CoreError::InvalidInput(format!(
                "unknown channel: {other}"
            ))),
        }
    }
}

/// A unit of publish work accepted by the ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostJob {
    /// Unique job identifier.
    pub id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Content type identifier, e.g. `"goal"` or `"matchday"`.
    pub template: String,
    /// Requested destinations, de-duplicated, order preserved, non-empty.
    pub channels: Vec<Channel>,
    /// Opaque content payload supplied by the content generator.
    pub data: serde_json::Value,
    /// When the ingress accepted the request.
    pub created_at: DateTime<Utc>,
    /// Deduplication key, unique per logical request.
    pub idempotency_key: String,
}

/// Queue envelope around a [`PostJob`].
///
/// Carries the attempt counter and redelivery schedule so retry policy is
/// independent of any particular queue transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// The job being delivered.
    pub job: PostJob,
    /// Delivery attempts made so far, including the in-flight one.
    pub attempts: u32,
    /// Earliest time the job may be claimed again.
    pub next_attempt_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Wraps a freshly accepted job for first delivery.
    pub fn new(job: PostJob, now: DateTime<Utc>) -> Self {
        Self { job, attempts: 0, next_attempt_at: now }
    }
}

/// Billing/deployment plan for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TenantPlan {
    /// Tenant runs their own no-code automation; everything relays.
    SelfHostedWebhook,
    /// Managed plan with optional direct platform integrations.
    Managed,
}

/// Per-channel routing flags for a tenant.
///
/// Direct publishing is opt-in: a channel with no explicit flag routes
/// through the webhook relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelFlags {
    /// Route every channel through the relay regardless of direct flags.
    #[serde(default)]
    pub use_relay: bool,
    /// Channels explicitly enabled for direct publishing.
    #[serde(default)]
    pub direct: HashMap<Channel, bool>,
}

impl ChannelFlags {
    /// Whether the given channel may be published directly.
    pub fn direct_enabled(&self, channel: Channel) -> bool {
        !self.use_relay && self.direct.get(&channel).copied().unwrap_or(false)
    }
}

/// Plan limits applied to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLimits {
    /// Maximum accepted posts per day.
    pub max_posts_per_day: u32,
}

impl Default for TenantLimits {
    fn default() -> Self {
        Self { max_posts_per_day: 50 }
    }
}

/// Tenant configuration read on every publish decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Tenant identifier.
    pub id: TenantId,
    /// Deployment plan.
    pub plan: TenantPlan,
    /// Channel routing flags.
    pub flags: ChannelFlags,
    /// Opaque credentials reference, resolved by direct adapters.
    pub channel_credentials_ref: Option<String>,
    /// Plan limits.
    pub limits: TenantLimits,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Resolves the safe-default record for an unconfigured tenant.
    ///
    /// Defaults route everything through the relay: direct publishing
    /// requires explicit opt-in via the admin interface.
    pub fn with_defaults(id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            plan: TenantPlan::SelfHostedWebhook,
            flags: ChannelFlags { use_relay: true, direct: HashMap::new() },
            channel_credentials_ref: None,
            limits: TenantLimits::default(),
            updated_at: now,
        }
    }
}

/// Outcome status for one channel of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    /// Delivered to the channel.
    Success,
    /// Deliberately not attempted.
    Skipped,
    /// Attempted and failed.
    Failed,
}

/// Result of publishing one channel of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    /// The channel this result belongs to.
    pub channel: Channel,
    /// Whether the publish succeeded.
    pub ok: bool,
    /// Coarse outcome classification.
    pub status: PublishStatus,
    /// Human-readable detail, e.g. the failure reason.
    pub detail: Option<String>,
    /// True when the result came from the relay after a direct failure.
    #[serde(default)]
    pub via_fallback: bool,
}

impl PublishResult {
    /// A successful publish.
    pub fn success(channel: Channel) -> Self {
        Self { channel, ok: true, status: PublishStatus::Success, detail: None, via_fallback: false }
    }

    /// A failed publish with a reason.
    pub fn failed(channel: Channel, detail: impl Into<String>) -> Self {
        Self {
            channel,
            ok: false,
            status: PublishStatus::Failed,
            detail: Some(detail.into()),
            via_fallback: false,
        }
    }

    /// Tags the result as produced by the relay fallback.
    pub fn fallback(mut self) -> Self {
        self.via_fallback = true;
        self
    }
}

/// Terminal error recorded for a dead-lettered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeError {
    /// Error code; `"DLQ"` for exhausted retries.
    pub code: String,
    /// Description of the final failure.
    pub message: String,
}

/// Aggregated terminal outcome of a job, persisted through the
/// idempotency store and returned to replay callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// False only for dead-lettered jobs.
    pub success: bool,
    /// Per-channel results; present on completed jobs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub results: HashMap<Channel, PublishResult>,
    /// Terminal error; present on dead-lettered jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl JobOutcome {
    /// Builds the success aggregate from per-channel results.
    ///
    /// Individual channels may still carry `ok: false`; a completed job
    /// with failed channels is a legitimate terminal outcome.
    pub fn completed(results: HashMap<Channel, PublishResult>) -> Self {
        Self { success: true, results, error: None }
    }

    /// Builds the dead-letter outcome after retries are exhausted.
    pub fn dead_letter(message: impl Into<String>) -> Self {
        Self {
            success: false,
            results: HashMap::new(),
            error: Some(OutcomeError { code: "DLQ".to_string(), message: message.into() }),
        }
    }
}
