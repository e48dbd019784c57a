//! Integration tests for the queue consumer lifecycle.
//!
//! Drives the engine batch-by-batch over the in-memory stack with a test
//! clock, covering commit-and-ack, redelivery with backoff, dead-lettering,
//! and the terminal-channel-failure policy.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use clubcast_core::{
    idempotency::MemoryIdempotencyStore,
    models::{Channel, JobId, PostJob, TenantId, TenantRecord},
    queue::MemoryJobQueue,
    registry::MemoryTenantRegistry,
    Clock, IdempotencyStore, JobQueue, TenantRegistry, TestClock,
};
use clubcast_delivery::{
    adapter::mock::MockAdapter, error::PublishError, ChannelAdapter, ConsumerConfig,
    ConsumerContext, PublishEngine, Publisher, PublisherConfig, RetryPolicy,
};
use serde_json::json;

struct Pipeline {
    clock: Arc<TestClock>,
    queue: Arc<MemoryJobQueue>,
    idempotency: Arc<MemoryIdempotencyStore>,
    registry: Arc<MemoryTenantRegistry>,
    relay: Arc<MockAdapter>,
    engine: PublishEngine,
}

fn pipeline(max_attempts: u32) -> Pipeline {
    let clock = Arc::new(TestClock::new());
    let clock_dyn: Arc<dyn Clock> = clock.clone();

    let queue = Arc::new(MemoryJobQueue::new(clock_dyn.clone()));
    let idempotency = Arc::new(MemoryIdempotencyStore::new(clock_dyn.clone()));
    let registry = Arc::new(MemoryTenantRegistry::new(clock_dyn.clone()));
    let relay = Arc::new(MockAdapter::new("relay"));

    let publisher = Arc::new(Publisher::new(
        relay.clone(),
        HashMap::new(),
        PublisherConfig::default(),
    ));

    let ctx = ConsumerContext {
        queue: queue.clone(),
        idempotency: idempotency.clone(),
        registry: registry.clone(),
        publisher,
        clock: clock_dyn,
    };

    let config = ConsumerConfig {
        retry_policy: RetryPolicy {
            max_attempts,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        },
        ..ConsumerConfig::default()
    };

    Pipeline { clock, queue, idempotency, registry, relay, engine: PublishEngine::new(ctx, config) }
}

fn post_job(tenant: &str, channels: Vec<Channel>) -> PostJob {
    PostJob {
        id: JobId::new(),
        tenant_id: TenantId::from(tenant),
        template: "goal".to_string(),
        channels,
        data: json!({"scorer": "Nkunku", "minute": 88}),
        created_at: Utc::now(),
        idempotency_key: format!("{tenant}:{}", JobId::new()),
    }
}

/// Drains redeliveries by alternating clock advances with batch runs.
async fn drain(p: &Pipeline, rounds: usize) -> Result<()> {
    for _ in 0..rounds {
        p.engine.process_batch().await?;
        p.clock.advance(Duration::from_secs(600));
    }
    Ok(())
}

#[tokio::test]
async fn successful_job_commits_outcome_and_drains_queue() -> Result<()> {
    let p = pipeline(5);
    let job = post_job("t1", vec![Channel::Facebook, Channel::YouTube]);
    let key = job.idempotency_key.clone();
    p.queue.enqueue(job).await?;

    let processed = p.engine.process_batch().await?;

    assert_eq!(processed, 1);
    assert_eq!(p.queue.depth().await?, 0);

    let record = p.idempotency.check(&key).await?.expect("outcome committed");
    let outcome = record.response.expect("stored response");
    assert!(outcome.success);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[&Channel::Facebook].ok);
    assert!(outcome.results[&Channel::YouTube].ok);

    let stats = p.engine.stats().await;
    assert_eq!(stats.jobs_completed, 1);
    assert_eq!(stats.channels_published, 2);
    Ok(())
}

#[tokio::test]
async fn transient_failures_redeliver_until_success() -> Result<()> {
    let p = pipeline(5);
    p.relay.fail_times(2).await;

    let job = post_job("t1", vec![Channel::Facebook]);
    let key = job.idempotency_key.clone();
    p.queue.enqueue(job).await?;

    drain(&p, 4).await?;

    // Two transient failures, success on the third claim.
    assert_eq!(p.relay.call_count().await, 3);
    assert_eq!(p.queue.depth().await?, 0);

    let outcome = p.idempotency.check(&key).await?.expect("committed").response.unwrap();
    assert!(outcome.success);

    let stats = p.engine.stats().await;
    assert_eq!(stats.jobs_retried, 2);
    assert_eq!(stats.jobs_completed, 1);
    Ok(())
}

#[tokio::test]
async fn redelivery_waits_grow_monotonically() -> Result<()> {
    let p = pipeline(5);
    p.relay.fail_times(3).await;

    let job = post_job("t1", vec![Channel::Facebook]);
    p.queue.enqueue(job).await?;

    // First attempt fails immediately.
    p.engine.process_batch().await?;
    assert_eq!(p.relay.call_count().await, 1);

    // Base delay is 2s (no jitter): not due after 1s, due after 2s.
    p.clock.advance(Duration::from_secs(1));
    p.engine.process_batch().await?;
    assert_eq!(p.relay.call_count().await, 1);
    p.clock.advance(Duration::from_secs(1));
    p.engine.process_batch().await?;
    assert_eq!(p.relay.call_count().await, 2);

    // Second wait doubles to 4s: still pending at 2s, due at 4s.
    p.clock.advance(Duration::from_secs(2));
    p.engine.process_batch().await?;
    assert_eq!(p.relay.call_count().await, 2);
    p.clock.advance(Duration::from_secs(2));
    p.engine.process_batch().await?;
    assert_eq!(p.relay.call_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_dead_letter_exactly_once() -> Result<()> {
    let p = pipeline(5);
    p.relay.fail_times(100).await;

    let job = post_job("t1", vec![Channel::Facebook]);
    let key = job.idempotency_key.clone();
    p.queue.enqueue(job).await?;

    drain(&p, 10).await?;

    // max_attempts = 5: five claims, then removal.
    assert_eq!(p.relay.call_count().await, 5);
    assert_eq!(p.queue.depth().await?, 0, "poison job must leave the queue");

    let outcome = p.idempotency.check(&key).await?.expect("terminal outcome").response.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_ref().unwrap().code, "DLQ");

    let stats = p.engine.stats().await;
    assert_eq!(stats.jobs_dead_lettered, 1);
    Ok(())
}

#[tokio::test]
async fn rejected_channel_stays_inside_success_aggregate() -> Result<()> {
    let p = pipeline(5);
    // 4xx is terminal for the channel, not a job fault.
    p.relay.push_outcome(Err(PublishError::rejected(422, "unsupported template"))).await;

    let job = post_job("t1", vec![Channel::Facebook, Channel::X]);
    let key = job.idempotency_key.clone();
    p.queue.enqueue(job).await?;

    p.engine.process_batch().await?;

    assert_eq!(p.queue.depth().await?, 0, "no redelivery for terminal channel failure");
    let outcome = p.idempotency.check(&key).await?.expect("committed").response.unwrap();
    assert!(outcome.success, "job completes despite one failed channel");
    assert!(!outcome.results[&Channel::Facebook].ok);
    assert!(outcome.results[&Channel::X].ok);

    let stats = p.engine.stats().await;
    assert_eq!(stats.channels_failed, 1);
    assert_eq!(stats.channels_published, 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_jobs_with_same_key_converge_on_one_outcome() -> Result<()> {
    let p = pipeline(5);

    // The ingress race can enqueue the same logical request twice; both
    // commits write the same key and replay callers see a single result.
    let mut first = post_job("t1", vec![Channel::Facebook]);
    first.idempotency_key = "t1:same".to_string();
    let mut second = post_job("t1", vec![Channel::Facebook]);
    second.idempotency_key = "t1:same".to_string();

    p.queue.enqueue(first).await?;
    p.queue.enqueue(second).await?;
    p.engine.process_batch().await?;

    assert_eq!(p.queue.depth().await?, 0);
    let outcome = p.idempotency.check("t1:same").await?.expect("committed").response.unwrap();
    assert!(outcome.success);
    assert_eq!(p.relay.call_count().await, 2, "both duplicates publish (at-least-once)");
    Ok(())
}

#[tokio::test]
async fn direct_tenant_flags_drive_routing_end_to_end() -> Result<()> {
    let p = pipeline(5);

    // Rebuild the engine with a direct adapter table for this test.
    let direct_fb = Arc::new(MockAdapter::new("fb"));
    let mut direct: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    direct.insert(Channel::Facebook, direct_fb.clone());
    let publisher =
        Arc::new(Publisher::new(p.relay.clone(), direct, PublisherConfig::default()));

    let clock_dyn: Arc<dyn Clock> = p.clock.clone();
    let ctx = ConsumerContext {
        queue: p.queue.clone(),
        idempotency: p.idempotency.clone(),
        registry: p.registry.clone(),
        publisher,
        clock: clock_dyn,
    };
    let engine = PublishEngine::new(ctx, ConsumerConfig::default());

    let mut record = TenantRecord::with_defaults(TenantId::from("t1"), Utc::now());
    record.flags.use_relay = false;
    record.flags.direct.insert(Channel::Facebook, true);
    record.channel_credentials_ref = Some("creds".to_string());
    p.registry.put(record).await?;

    p.queue.enqueue(post_job("t1", vec![Channel::Facebook])).await?;
    engine.process_batch().await?;

    assert_eq!(direct_fb.call_count().await, 1);
    assert_eq!(p.relay.call_count().await, 0);
    Ok(())
}
