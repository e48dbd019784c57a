//! Publisher orchestrator: relay-vs-direct routing with fallback.
//!
//! Per channel, the routing decision is evaluated in order: the tenant's
//! global relay flag or an unset direct flag routes to the relay; an opted-
//! in channel goes to its direct adapter; a direct failure falls back to
//! the relay exactly once. The relay is the system of record — it needs no
//! per-tenant OAuth and is always configured — so its own failure has no
//! further fallback and becomes the channel's terminal result.

use std::{collections::HashMap, sync::Arc, time::Duration};

use clubcast_core::models::{Channel, PublishResult, TenantRecord};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    adapter::{AdapterResponse, ChannelAdapter, PublishRequest},
    error::{PublishError, Result},
};

/// Routing and timeout configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Bound on any single adapter call.
    pub attempt_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { attempt_timeout: Duration::from_secs(15) }
    }
}

/// Chooses and invokes the adapter for each requested channel.
pub struct Publisher {
    relay: Arc<dyn ChannelAdapter>,
    direct: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    config: PublisherConfig,
}

impl Publisher {
    /// Creates a publisher over a relay adapter and a direct-adapter table.
    pub fn new(
        relay: Arc<dyn ChannelAdapter>,
        direct: HashMap<Channel, Arc<dyn ChannelAdapter>>,
        config: PublisherConfig,
    ) -> Self {
        Self { relay, direct, config }
    }

    /// Publishes one channel of one job.
    ///
    /// Terminal channel failures (timeouts, 4xx rejections) come back as
    /// `PublishResult { ok: false }`. A transient relay failure (network,
    /// 5xx) is returned as an error instead: the relay is the path of last
    /// resort, so nothing was delivered and the whole job is safe to
    /// redeliver. Cross-channel outcomes are independent either way.
    ///
    /// # Errors
    ///
    /// Returns the relay's error when the relay path fails transiently.
    pub async fn publish(
        &self,
        tenant: &TenantRecord,
        channel: Channel,
        template: &str,
        data: &Value,
    ) -> Result<PublishResult> {
        let request = PublishRequest {
            tenant_id: tenant.id.clone(),
            channel,
            template: template.to_string(),
            data: data.clone(),
            credentials_ref: tenant.channel_credentials_ref.clone(),
        };

        let direct = if tenant.flags.direct_enabled(channel) {
            self.direct.get(&channel)
        } else {
            None
        };

        let Some(direct) = direct else {
            debug!(tenant = %tenant.id, %channel, "routing through relay");
            return match self.attempt(self.relay.as_ref(), &request).await {
                Ok(_) => Ok(PublishResult::success(channel)),
                Err(error) if is_job_fault(&error) => Err(error),
                Err(error) => Ok(PublishResult::failed(channel, error.to_string())),
            };
        };

        match self.attempt(direct.as_ref(), &request).await {
            Ok(_) => Ok(PublishResult::success(channel)),
            Err(direct_error) => {
                warn!(
                    tenant = %tenant.id,
                    %channel,
                    error = %direct_error,
                    "direct publish failed, falling back to relay"
                );

                match self.attempt(self.relay.as_ref(), &request).await {
                    Ok(_) => Ok(PublishResult::success(channel).fallback()),
                    Err(relay_error) if is_job_fault(&relay_error) => Err(relay_error),
                    Err(relay_error) => Ok(PublishResult::failed(
                        channel,
                        format!("direct: {direct_error}; relay: {relay_error}"),
                    )
                    .fallback()),
                }
            },
        }
    }

    /// Runs one adapter call under the attempt timeout.
    async fn attempt(
        &self,
        adapter: &dyn ChannelAdapter,
        request: &PublishRequest,
    ) -> Result<AdapterResponse> {
        match tokio::time::timeout(self.config.attempt_timeout, adapter.publish(request)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::timeout(self.config.attempt_timeout.as_secs())),
        }
    }
}

/// Whether a relay failure should escape as a job-level fault.
///
/// Timeouts are excluded: the per-attempt bound exists so a slow
/// destination becomes a terminal channel result rather than a redelivery.
fn is_job_fault(error: &PublishError) -> bool {
    !matches!(error, PublishError::Timeout { .. }) && error.is_retryable()
}
