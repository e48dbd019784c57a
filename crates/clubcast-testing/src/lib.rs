//! Test environment for driving the publish pipeline end to end.
//!
//! Builds the complete in-memory stack — stores, rate limiter, mock
//! adapters, consumer engine, and HTTP router — around a controllable
//! clock, so tests exercise the real request path without a database or
//! network.

#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use clubcast_api::{create_router, AppState};
use clubcast_core::{
    idempotency::MemoryIdempotencyStore,
    models::{Channel, TenantId, TenantRecord},
    queue::MemoryJobQueue,
    ratelimit::{RateLimitConfig, RateLimiter},
    registry::MemoryTenantRegistry,
    Clock, TenantRegistry, TestClock,
};
use clubcast_delivery::{
    adapter::mock::MockAdapter, ChannelAdapter, ConsumerConfig, ConsumerContext, PublishEngine,
    Publisher, PublisherConfig, RetryPolicy,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

/// Options for building a [`TestEnv`].
pub struct TestEnvBuilder {
    rate_limit: RateLimitConfig,
    max_attempts: u32,
    direct_channels: Vec<Channel>,
}

impl TestEnvBuilder {
    /// Overrides the token-bucket parameters.
    #[must_use]
    pub fn rate_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.rate_limit = RateLimitConfig { capacity, refill_per_sec };
        self
    }

    /// Overrides the job attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Registers a mock direct adapter for a channel.
    #[must_use]
    pub fn direct_adapter(mut self, channel: Channel) -> Self {
        self.direct_channels.push(channel);
        self
    }

    /// Builds the environment.
    pub fn build(self) -> TestEnv {
        let clock = Arc::new(TestClock::new());
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let queue = Arc::new(MemoryJobQueue::new(clock_dyn.clone()));
        let idempotency = Arc::new(MemoryIdempotencyStore::new(clock_dyn.clone()));
        let registry = Arc::new(MemoryTenantRegistry::new(clock_dyn.clone()));
        let limiter = Arc::new(RateLimiter::new(self.rate_limit, clock_dyn.clone()));

        let relay = Arc::new(MockAdapter::new("relay"));
        let mut direct_mocks = HashMap::new();
        let mut direct: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
        for channel in self.direct_channels {
            let adapter = Arc::new(MockAdapter::new(channel.as_str()));
            direct.insert(channel, adapter.clone());
            direct_mocks.insert(channel, adapter);
        }

        let publisher =
            Arc::new(Publisher::new(relay.clone(), direct, PublisherConfig::default()));

        let ctx = ConsumerContext {
            queue: queue.clone(),
            idempotency: idempotency.clone(),
            registry: registry.clone(),
            publisher,
            clock: clock_dyn.clone(),
        };
        let engine = PublishEngine::new(ctx, ConsumerConfig {
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                jitter_factor: 0.0,
                ..RetryPolicy::default()
            },
            ..ConsumerConfig::default()
        });

        let router = create_router(AppState {
            queue: queue.clone(),
            idempotency: idempotency.clone(),
            registry: registry.clone(),
            limiter: limiter.clone(),
            clock: clock_dyn,
        });

        TestEnv { clock, queue, idempotency, registry, relay, direct: direct_mocks, engine, router }
    }
}

/// Fully wired in-memory pipeline for tests.
pub struct TestEnv {
    /// Controllable clock shared by every component.
    pub clock: Arc<TestClock>,
    /// The job queue behind the ingress.
    pub queue: Arc<MemoryJobQueue>,
    /// The idempotency store.
    pub idempotency: Arc<MemoryIdempotencyStore>,
    /// The tenant registry.
    pub registry: Arc<MemoryTenantRegistry>,
    /// Recording relay adapter.
    pub relay: Arc<MockAdapter>,
    /// Recording direct adapters, keyed by channel.
    pub direct: HashMap<Channel, Arc<MockAdapter>>,
    /// Consumer engine; drive it with `process_batch`.
    pub engine: PublishEngine,
    router: Router,
}

impl TestEnv {
    /// Starts building an environment with defaults.
    #[must_use]
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder {
            rate_limit: RateLimitConfig::default(),
            max_attempts: 5,
            direct_channels: Vec::new(),
        }
    }

    /// Builds an environment with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Stores a tenant record.
    pub async fn put_tenant(&self, record: TenantRecord) {
        self.registry.put(record).await.expect("memory registry put cannot fail");
    }

    /// Submits a post request as a member of `tenant`.
    pub async fn submit_post(&self, tenant: &str, body: &Value) -> (StatusCode, Value) {
        self.submit_post_with_key(tenant, body, None).await
    }

    /// Submits a post request with an explicit idempotency key.
    pub async fn submit_post_with_key(
        &self,
        tenant: &str,
        body: &Value,
        idempotency_key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/v1/post")
            .header("content-type", "application/json")
            .header("x-auth-tenant", tenant)
            .header("x-auth-user", "test-user");

        if let Some(key) = idempotency_key {
            request = request.header("idempotency-key", key);
        }

        let request = request.body(Body::from(body.to_string())).expect("request builds");
        self.send(request).await
    }

    /// Polls the outcome for an idempotency token.
    pub async fn poll_post(&self, tenant: &str, token: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(format!("/api/v1/post/{token}"))
            .header("x-auth-tenant", tenant)
            .header("x-auth-user", "test-user")
            .body(Body::empty())
            .expect("request builds");
        self.send(request).await
    }

    /// Sends an arbitrary request through the router.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response =
            self.router.clone().oneshot(request).await.expect("router handles request");
        let status = response.status();
        let bytes =
            response.into_body().collect().await.expect("body collects").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// Runs one consumer batch.
    pub async fn process_batch(&self) -> usize {
        self.engine.process_batch().await.expect("batch processing succeeds")
    }

    /// Alternates clock advances and batches until redeliveries drain.
    pub async fn drain(&self, rounds: usize) {
        for _ in 0..rounds {
            self.process_batch().await;
            self.clock.advance(Duration::from_secs(600));
        }
    }

    /// The idempotency key the ingress would derive for a request body.
    ///
    /// Mirrors the handler's normalization: channels parsed, de-duplicated,
    /// and fingerprinted together with template and data.
    #[must_use]
    pub fn derived_key(&self, tenant: &str, body: &Value) -> String {
        let mut channels: Vec<Channel> = Vec::new();
        for name in body["channels"].as_array().into_iter().flatten() {
            let channel: Channel = name
                .as_str()
                .and_then(|s| s.parse().ok())
                .expect("test body uses known channels");
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        let payload = serde_json::json!({
            "template": body["template"],
            "channels": channels,
            "data": body["data"],
        });
        clubcast_core::idempotency::derive_key(&TenantId::from(tenant), None, &payload)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
