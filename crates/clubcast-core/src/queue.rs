//! At-least-once job queue.
//!
//! Consumers claim batches, then either `ack` (remove) or `nack`
//! (reschedule with an incremented attempt counter). A claimed job that is
//! neither acked nor nacked stays invisible until its visibility deadline
//! lapses, after which it is redelivered — crash recovery is the queue's
//! concern, retry policy is the consumer's.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::{
    error::Result,
    models::{JobId, PostJob, QueuedJob},
    time::Clock,
};

/// How long a claimed job stays invisible before redelivery.
const VISIBILITY_SECS: i64 = 60;

/// Storage contract for the publish job queue.
pub trait JobQueue: Send + Sync + 'static {
    /// Appends a freshly accepted job.
    fn enqueue(&self, job: PostJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Claims up to `batch_size` due jobs, marking them in-flight.
    fn claim(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedJob>>> + Send + '_>>;

    /// Removes a job after terminal handling (success or dead-letter).
    fn ack(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a job to the queue for redelivery no earlier than
    /// `next_attempt_at`, preserving its attempt count.
    fn nack(
        &self,
        job_id: JobId,
        next_attempt_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Number of jobs waiting or in flight. Used by tests and readiness.
    fn depth(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>>;
}

#[derive(Debug)]
struct QueueState {
    ready: Vec<QueuedJob>,
    in_flight: HashMap<JobId, (QueuedJob, DateTime<Utc>)>,
}

/// In-memory job queue with visibility-timeout redelivery.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState { ready: Vec::new(), in_flight: HashMap::new() }),
            clock,
        }
    }

    fn reap_expired(state: &mut QueueState, now: DateTime<Utc>) {
        let expired: Vec<JobId> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some((mut queued, _)) = state.in_flight.remove(&id) {
                queued.next_attempt_at = now;
                state.ready.push(queued);
            }
        }
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, job: PostJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            self.state.lock().await.ready.push(QueuedJob::new(job, now));
            Ok(())
        })
    }

    fn claim(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedJob>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            Self::reap_expired(&mut state, now);

            let mut claimed = Vec::new();
            let mut index = 0;
            while index < state.ready.len() && claimed.len() < batch_size {
                if state.ready[index].next_attempt_at <= now {
                    let mut queued = state.ready.remove(index);
                    queued.attempts += 1;
                    let deadline = now + Duration::seconds(VISIBILITY_SECS);
                    state.in_flight.insert(queued.job.id, (queued.clone(), deadline));
                    claimed.push(queued);
                } else {
                    index += 1;
                }
            }

            Ok(claimed)
        })
    }

    fn ack(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().await.in_flight.remove(&job_id);
            Ok(())
        })
    }

    fn nack(
        &self,
        job_id: JobId,
        next_attempt_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some((mut queued, _)) = state.in_flight.remove(&job_id) {
                queued.next_attempt_at = next_attempt_at;
                state.ready.push(queued);
            }
            Ok(())
        })
    }

    fn depth(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.ready.len() + state.in_flight.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use serde_json::json;

    use super::*;
    use crate::{
        models::{Channel, TenantId},
        time::TestClock,
    };

    fn job(tenant: &str) -> PostJob {
        PostJob {
            id: JobId::new(),
            tenant_id: TenantId::from(tenant),
            template: "goal".to_string(),
            channels: vec![Channel::Facebook],
            data: json!({"minute": 90}),
            created_at: Utc::now(),
            idempotency_key: format!("{tenant}:abc"),
        }
    }

    fn queue() -> (Arc<TestClock>, MemoryJobQueue) {
        let clock = Arc::new(TestClock::new());
        let queue = MemoryJobQueue::new(clock.clone());
        (clock, queue)
    }

    #[tokio::test]
    async fn claim_increments_attempts() {
        let (_clock, queue) = queue();
        queue.enqueue(job("t1")).await.unwrap();

        let claimed = queue.claim(10).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
    }

    #[tokio::test]
    async fn acked_job_is_gone() {
        let (_clock, queue) = queue();
        queue.enqueue(job("t1")).await.unwrap();

        let claimed = queue.claim(10).await.unwrap();
        queue.ack(claimed[0].job.id).await.unwrap();

        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(queue.claim(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nacked_job_waits_for_its_schedule() {
        let (clock, queue) = queue();
        queue.enqueue(job("t1")).await.unwrap();

        let claimed = queue.claim(10).await.unwrap();
        let job_id = claimed[0].job.id;
        queue.nack(job_id, clock.now() + Duration::seconds(30)).await.unwrap();

        assert!(queue.claim(10).await.unwrap().is_empty(), "not due yet");

        clock.advance(StdDuration::from_secs(31));
        let redelivered = queue.claim(10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].attempts, 2, "attempt count survives redelivery");
    }

    #[tokio::test]
    async fn abandoned_claim_is_redelivered_after_visibility_timeout() {
        let (clock, queue) = queue();
        queue.enqueue(job("t1")).await.unwrap();

        let claimed = queue.claim(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        // Consumer crashes: no ack, no nack.

        clock.advance(StdDuration::from_secs(VISIBILITY_SECS as u64 + 1));
        let redelivered = queue.claim(10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].job.id, claimed[0].job.id);
    }

    #[tokio::test]
    async fn claim_respects_batch_size() {
        let (_clock, queue) = queue();
        for _ in 0..5 {
            queue.enqueue(job("t1")).await.unwrap();
        }

        let claimed = queue.claim(3).await.unwrap();
        assert_eq!(claimed.len(), 3);
        assert_eq!(queue.depth().await.unwrap(), 5);
    }
}
