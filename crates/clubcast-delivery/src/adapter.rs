//! Channel adapter contract and implementations.
//!
//! Every destination exposes the same publish contract. The webhook relay
//! adapter is the always-available path: it forwards the post to the
//! tenant's no-code automation, which owns the platform credentials. Direct
//! adapters call platform APIs using a tenant credentials reference and are
//! optional optimizations on top of the relay.

use std::{collections::HashMap, future::Future, pin::Pin, time::Duration};

use clubcast_core::models::{Channel, TenantId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PublishError, Result};

/// One publish request handed to an adapter.
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Destination channel.
    pub channel: Channel,
    /// Content type identifier.
    pub template: String,
    /// Opaque content payload.
    pub data: Value,
    /// Credentials reference for direct adapters; relay ignores it.
    #[serde(skip)]
    pub credentials_ref: Option<String>,
}

/// Successful adapter response.
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    /// HTTP status returned by the destination.
    pub status: u16,
    /// Destination-assigned reference (post id, run id), when available.
    pub reference: Option<String>,
}

/// Uniform publish contract implemented by every destination.
pub trait ChannelAdapter: Send + Sync + 'static {
    /// Adapter name for logs and result details.
    fn name(&self) -> &str;

    /// Publishes one post to the destination.
    fn publish(
        &self,
        request: &PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse>> + Send + '_>>;
}

/// Configuration for the HTTP-based adapters.
#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), user_agent: "Clubcast/1.0".to_string() }
    }
}

/// Webhook relay adapter.
///
/// Forwards the post to the tenant's automation webhook as JSON. Requires
/// no per-tenant OAuth, which is why it serves as the fallback for every
/// direct adapter.
pub struct RelayAdapter {
    client: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl RelayAdapter {
    /// Creates a relay adapter targeting the given webhook URL.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Internal` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, config: HttpAdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| PublishError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, url: url.into(), timeout_secs: config.timeout.as_secs() })
    }

    /// Returns the relay webhook URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChannelAdapter for RelayAdapter {
    fn name(&self) -> &str {
        "relay"
    }

    fn publish(
        &self,
        request: &PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move {
            debug!(
                tenant = %request.tenant_id,
                channel = %request.channel,
                template = %request.template,
                "relaying post to automation webhook"
            );

            let response = self
                .client
                .post(&self.url)
                .header("X-Clubcast-Tenant", request.tenant_id.as_str())
                .header("X-Clubcast-Channel", request.channel.as_str())
                .json(&request)
                .send()
                .await
                .map_err(|e| categorize_reqwest_error(&e, self.timeout_secs))?;

            parse_response(response).await
        })
    }
}

/// Direct platform adapter.
///
/// Thin HTTP client over one platform's posting endpoint. The OAuth dance
/// lives outside the pipeline; the adapter only presents the credentials
/// reference resolved from the tenant record. One instance serves one
/// channel.
pub struct DirectAdapter {
    client: reqwest::Client,
    channel: Channel,
    endpoint: String,
    timeout_secs: u64,
}

impl DirectAdapter {
    /// Creates a direct adapter for a channel's posting endpoint.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Internal` if the HTTP client cannot be built.
    pub fn new(
        channel: Channel,
        endpoint: impl Into<String>,
        config: HttpAdapterConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| PublishError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, channel, endpoint: endpoint.into(), timeout_secs: config.timeout.as_secs() })
    }

    /// The channel this adapter serves.
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl ChannelAdapter for DirectAdapter {
    fn name(&self) -> &str {
        self.channel.as_str()
    }

    fn publish(
        &self,
        request: &PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move {
            let Some(credentials) = request.credentials_ref.clone() else {
                return Err(PublishError::MissingCredentials);
            };

            debug!(
                tenant = %request.tenant_id,
                channel = %self.channel,
                "publishing directly to platform API"
            );

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(credentials)
                .json(&request)
                .send()
                .await
                .map_err(|e| categorize_reqwest_error(&e, self.timeout_secs))?;

            parse_response(response).await
        })
    }
}

/// Maps a reqwest transport error onto the publish taxonomy.
fn categorize_reqwest_error(error: &reqwest::Error, timeout_secs: u64) -> PublishError {
    if error.is_timeout() {
        return PublishError::timeout(timeout_secs);
    }
    if error.is_connect() {
        return PublishError::network(format!("connection failed: {error}"));
    }
    PublishError::network(error.to_string())
}

/// Converts an HTTP response into an adapter response or categorized error.
async fn parse_response(response: reqwest::Response) -> Result<AdapterResponse> {
    let status = response.status().as_u16();

    if response.status().is_success() {
        let reference = response
            .headers()
            .get("x-post-reference")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        return Ok(AdapterResponse { status, reference });
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let body = truncated_body(response).await;

    match status {
        429 => Err(PublishError::ChannelRateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        }),
        400..=499 => Err(PublishError::rejected(status, body)),
        _ => Err(PublishError::unavailable(status, body)),
    }
}

/// Reads a response body bounded to what is worth logging.
async fn truncated_body(response: reqwest::Response) -> String {
    const MAX_BODY: usize = 1024;

    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_BODY => {
            format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..MAX_BODY]))
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(error) => {
            warn!(%error, "failed to read response body");
            String::new()
        },
    }
}

pub mod mock {
    //! Scripted adapter for testing orchestration and consumer behavior.

    use std::{collections::VecDeque, sync::Arc};

    use tokio::sync::Mutex;

    use super::{AdapterResponse, ChannelAdapter, Future, Pin, PublishRequest, Result};
    use crate::error::PublishError;

    /// Recording adapter with scripted outcomes.
    ///
    /// Dequeues one scripted outcome per call; once the script is empty
    /// every call succeeds. All received requests are recorded for
    /// assertion.
    pub struct MockAdapter {
        name: String,
        calls: Arc<Mutex<Vec<PublishRequest>>>,
        script: Arc<Mutex<VecDeque<Result<AdapterResponse>>>>,
    }

    impl MockAdapter {
        /// Creates a mock that succeeds on every call.
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                calls: Arc::new(Mutex::new(Vec::new())),
                script: Arc::new(Mutex::new(VecDeque::new())),
            }
        }

        /// Queues failures for the next `n` calls.
        pub async fn fail_times(&self, n: usize) {
            let mut script = self.script.lock().await;
            for _ in 0..n {
                script.push_back(Err(PublishError::unavailable(503, "scripted failure")));
            }
        }

        /// Queues a specific outcome for the next call.
        pub async fn push_outcome(&self, outcome: Result<AdapterResponse>) {
            self.script.lock().await.push_back(outcome);
        }

        /// Number of publish calls received.
        pub async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }

        /// All requests received, in order.
        pub async fn recorded_calls(&self) -> Vec<PublishRequest> {
            self.calls.lock().await.clone()
        }
    }

    impl ChannelAdapter for MockAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn publish(
            &self,
            request: &PublishRequest,
        ) -> Pin<Box<dyn Future<Output = Result<AdapterResponse>> + Send + '_>> {
            let request = request.clone();
            let calls = self.calls.clone();
            let script = self.script.clone();
            Box::pin(async move {
                calls.lock().await.push(request);
                match script.lock().await.pop_front() {
                    Some(outcome) => outcome,
                    None => Ok(AdapterResponse { status: 200, reference: None }),
                }
            })
        }
    }
}

/// Builds the direct-adapter table from per-channel endpoints.
///
/// # Errors
///
/// Returns an error if any underlying HTTP client cannot be built.
pub fn direct_adapters(
    endpoints: &HashMap<Channel, String>,
    config: &HttpAdapterConfig,
) -> Result<HashMap<Channel, std::sync::Arc<dyn ChannelAdapter>>> {
    let mut adapters: HashMap<Channel, std::sync::Arc<dyn ChannelAdapter>> = HashMap::new();
    for (channel, endpoint) in endpoints {
        let adapter = DirectAdapter::new(*channel, endpoint.clone(), config.clone())?;
        adapters.insert(*channel, std::sync::Arc::new(adapter));
    }
    Ok(adapters)
}
