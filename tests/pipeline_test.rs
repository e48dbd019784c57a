//! End-to-end tests for the publish pipeline.
//!
//! Drives the full request path — ingress, rate limiter, idempotency
//! store, queue, consumer, orchestrator, adapters — over the in-memory
//! stack with a controllable clock.

use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use clubcast_core::{
    models::{Channel, TenantId, TenantRecord},
    JobQueue,
};
use clubcast_testing::TestEnv;
use serde_json::{json, Value};

fn goal_post() -> Value {
    json!({
        "tenant": "t1",
        "template": "goal",
        "channels": ["fb"],
        "data": {"scorer": "Nkunku", "minute": 88}
    })
}

#[tokio::test]
async fn fresh_post_is_accepted_and_queued() {
    let env = TestEnv::new();

    let (status, body) = env.submit_post("t1", &goal_post()).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["queued"], json!(true));
    assert_eq!(env.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_before_completion_converges_on_one_result() {
    let env = TestEnv::new();
    let body = goal_post();

    // Both land before the consumer runs: the pending record is a miss,
    // so both are accepted (the documented check-then-enqueue race).
    let (first, _) = env.submit_post("t1", &body).await;
    let (second, _) = env.submit_post("t1", &body).await;
    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::ACCEPTED);

    env.process_batch().await;
    assert_eq!(env.queue.depth().await.unwrap(), 0);

    // Replays now observe a single committed result.
    let (status_a, reply_a) = env.submit_post("t1", &body).await;
    let (status_b, reply_b) = env.submit_post("t1", &body).await;
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(reply_a, reply_b, "replay responses must be identical");
    assert_eq!(reply_a["data"]["results"]["fb"]["ok"], json!(true));
}

#[tokio::test]
async fn replay_after_completion_returns_stored_outcome() {
    let env = TestEnv::new();
    let body = goal_post();

    env.submit_post("t1", &body).await;
    env.process_batch().await;

    let (status, reply) = env.submit_post("t1", &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["success"], json!(true));
    assert_eq!(reply["data"]["results"]["fb"]["status"], json!("success"));
    // The replay does not publish again.
    assert_eq!(env.relay.call_count().await, 1);
}

#[tokio::test]
async fn explicit_idempotency_key_deduplicates_different_serializations() {
    let env = TestEnv::new();

    env.submit_post_with_key("t1", &goal_post(), Some("req-7")).await;
    env.process_batch().await;

    // Same key, different body: still a replay.
    let other = json!({
        "tenant": "t1", "template": "vote", "channels": ["x"], "data": {}
    });
    let (status, _) = env.submit_post_with_key("t1", &other, Some("req-7")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.relay.call_count().await, 1);
}

#[tokio::test]
async fn rate_limiter_rejects_after_capacity_and_recovers() {
    let env = TestEnv::builder().rate_limit(2, 1.0).build();

    let (first, _) = env.submit_post("t1", &goal_post()).await;
    env.clock.advance(Duration::from_millis(900));
    let (second, _) = env.submit_post("t1", &goal_post()).await;
    env.clock.advance(Duration::from_millis(900));
    let (third, body) = env.submit_post("t1", &goal_post()).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    // Second submission of the identical payload is already pending, not
    // yet committed, so it is accepted again rather than replayed.
    assert_eq!(second, StatusCode::ACCEPTED);
    assert_eq!(third, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], json!("RATE_LIMITED"));

    // The bucket refills while exhausted.
    env.clock.advance(Duration::from_secs(7));
    let (recovered, _) = env.submit_post("t1", &goal_post()).await;
    assert_ne!(recovered, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rate_limits_are_scoped_per_tenant() {
    let env = TestEnv::builder().rate_limit(1, 1.0).build();

    let mut body_t2 = goal_post();
    body_t2["tenant"] = json!("t2");

    let (first, _) = env.submit_post("t1", &goal_post()).await;
    let (blocked, _) = env.submit_post("t1", &goal_post()).await;
    let (other_tenant, _) = env.submit_post("t2", &body_t2).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(blocked, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other_tenant, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn transient_adapter_failures_retry_until_success() {
    let env = TestEnv::new();
    env.relay.fail_times(2).await;

    env.submit_post_with_key("t1", &goal_post(), Some("retry-case")).await;
    env.drain(5).await;

    // Failed twice, succeeded on the third delivery attempt.
    assert_eq!(env.relay.call_count().await, 3);

    let (status, reply) = env.poll_post("t1", "retry-case").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["data"]["results"]["fb"]["ok"], json!(true));
}

#[tokio::test]
async fn poison_job_dead_letters_after_attempt_budget() {
    let env = TestEnv::new();
    env.relay.fail_times(100).await;

    env.submit_post_with_key("t1", &goal_post(), Some("poison")).await;
    env.drain(10).await;

    assert_eq!(env.relay.call_count().await, 5, "exactly max_attempts deliveries");
    assert_eq!(env.queue.depth().await.unwrap(), 0, "queue must not grow unbounded");

    let (status, reply) = env.poll_post("t1", "poison").await;
    assert_eq!(status, StatusCode::OK, "dead-letter is a terminal, observable answer");
    assert_eq!(reply["success"], json!(false));
    assert_eq!(reply["error"]["code"], json!("DLQ"));
}

#[tokio::test]
async fn disabled_direct_flag_never_touches_direct_adapter() {
    let env = TestEnv::builder().direct_adapter(Channel::Facebook).build();

    // Default tenant record: relay everything.
    env.submit_post("t1", &goal_post()).await;
    env.process_batch().await;

    assert_eq!(env.direct[&Channel::Facebook].call_count().await, 0);
    assert_eq!(env.relay.call_count().await, 1);
}

#[tokio::test]
async fn relay_tenant_scenario_publishes_goal_to_facebook() {
    let env = TestEnv::new();

    let mut record = TenantRecord::with_defaults(TenantId::from("T1"), Utc::now());
    record.flags.use_relay = true;
    env.put_tenant(record).await;

    let body = json!({
        "tenant": "T1",
        "template": "goal",
        "channels": ["fb"],
        "data": {"scorer": "Nkunku", "minute": 88}
    });
    env.submit_post("T1", &body).await;
    env.process_batch().await;

    let calls = env.relay.recorded_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tenant_id, TenantId::from("T1"));
    assert_eq!(calls[0].template, "goal");
    assert_eq!(calls[0].data, body["data"]);

    let (status, reply) = env.submit_post("T1", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["data"]["results"]["fb"]["ok"], json!(true));
}

#[tokio::test]
async fn multi_channel_job_covers_every_requested_channel() {
    let env = TestEnv::new();

    let body = json!({
        "tenant": "t1",
        "template": "matchday",
        "channels": ["fb", "ig", "yt", "x"],
        "data": {"opponent": "Rovers"}
    });
    env.submit_post("t1", &body).await;
    env.process_batch().await;

    let (_, reply) = env.submit_post("t1", &body).await;
    let results = reply["data"]["results"].as_object().unwrap();
    assert_eq!(results.len(), 4, "aggregate must include all requested channels");
    assert_eq!(env.relay.call_count().await, 4);
}

#[tokio::test]
async fn requests_without_auth_context_are_unauthenticated() {
    let env = TestEnv::new();

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/post")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(goal_post().to_string()))
        .unwrap();

    let (status, body) = env.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("UNAUTHENTICATED"));
}

#[tokio::test]
async fn cross_tenant_submission_is_forbidden() {
    let env = TestEnv::new();

    // Authenticated as t2, posting on behalf of t1.
    let (status, body) = env.submit_post("t2", &goal_post()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("FORBIDDEN"));
}

#[tokio::test]
async fn malformed_requests_are_rejected_with_validation_code() {
    let env = TestEnv::new();

    let no_channels = json!({
        "tenant": "t1", "template": "goal", "channels": [], "data": {}
    });
    let (status, body) = env.submit_post("t1", &no_channels).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("VALIDATION"));

    let bad_channel = json!({
        "tenant": "t1", "template": "goal", "channels": ["myspace"], "data": {}
    });
    let (status, _) = env.submit_post("t1", &bad_channel).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenant_update_requires_admin_role() {
    let env = TestEnv::new();
    let update = json!({"plan": "managed", "flags": {"use_relay": false, "direct": {"fb": true}}});

    let member = axum::http::Request::builder()
        .method("PUT")
        .uri("/api/v1/tenants/t1")
        .header("content-type", "application/json")
        .header("x-auth-tenant", "t1")
        .header("x-auth-user", "u1")
        .body(axum::body::Body::from(update.to_string()))
        .unwrap();
    let (status, _) = env.send(member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = axum::http::Request::builder()
        .method("PUT")
        .uri("/api/v1/tenants/t1")
        .header("content-type", "application/json")
        .header("x-auth-tenant", "t1")
        .header("x-auth-user", "u1")
        .header("x-auth-roles", "admin")
        .body(axum::body::Body::from(update.to_string()))
        .unwrap();
    let (status, _) = env.send(admin).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_endpoints_answer_without_auth() {
    let env = TestEnv::new();

    for path in ["/health", "/ready", "/live"] {
        let request = axum::http::Request::builder()
            .method("GET")
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, _) = env.send(request).await;
        assert_eq!(status, StatusCode::OK, "{path} should be public");
    }
}

#[tokio::test]
async fn rate_limit_check_route_shares_the_post_bucket() {
    let env = TestEnv::builder().rate_limit(2, 1.0).build();

    let check = |bucket: &str| {
        axum::http::Request::builder()
            .method("GET")
            .uri(format!("/api/v1/ratelimit/check?bucket={bucket}"))
            .header("x-auth-tenant", "t1")
            .header("x-auth-user", "u1")
            .body(axum::body::Body::empty())
            .unwrap()
    };

    let (status, body) = env.send(check("t1:post")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["limit"], json!(2));
    assert_eq!(body["remaining"], json!(1));

    // The sub-protocol spends from the same bucket the ingress uses.
    let (status, _) = env.submit_post("t1", &goal_post()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, body) = env.send(check("t1:post")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["ok"], json!(false));

    // Another tenant's bucket is off limits.
    let (status, _) = env.send(check("t2:post")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn poll_route_returns_not_found_before_commit() {
    let env = TestEnv::new();

    env.submit_post_with_key("t1", &goal_post(), Some("early")).await;

    // Queued but not yet consumed: the pending record is not an outcome.
    let (status, body) = env.poll_post("t1", "early").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));

    env.process_batch().await;
    let (status, _) = env.poll_post("t1", "early").await;
    assert_eq!(status, StatusCode::OK);
}
