use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};

use tracefin_core::cache::SpanCache;
use tracefin_core::model::completion::CompletionTime;
use tracefin_core::model::span::Span;

use crate::deriver::{CompletionTimeDeriver, CompletionTimeProcessing};
use crate::initiator::ProcessingInitiator;
use crate::publish::CompletionTimePublisher;
use crate::task::{DEFAULT_RETRY_DELAY, Stage};

const PUBLISH_ATTEMPTS: u32 = 3;

/// One redeliverable unit of derivation work. The carried processing state is
/// what makes each retry monotonic instead of recomputing from nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub tenant: String,
    pub processing: CompletionTimeProcessing,
    pub attempts: u32,
    pub first_submitted: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(tenant: impl Into<String>, processing: CompletionTimeProcessing) -> Self {
        Self {
            tenant: tenant.into(),
            processing,
            attempts: 0,
            first_submitted: Utc::now(),
        }
    }
}

/// Bounds on redelivery. The quiescence heuristic alone would retry forever
/// for a trace whose producer died mid-flight; whichever bound trips first
/// abandons the item with a warning.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            max_age: Duration::from_secs(15 * 60),
        }
    }
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub retry_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

/// In-process republish loop around the completion-time deriver: work items
/// enter through an mpsc channel, a single consumer runs the deriver stage,
/// and "not ready" items are re-enqueued after the stage-requested delay.
///
/// The single consumer is what serializes attempts for the same trace; the
/// deriver itself holds no lock and depends on that guarantee.
#[derive(Clone)]
pub struct CompletionPipeline {
    tx: mpsc::Sender<WorkItem>,
}

impl CompletionPipeline {
    pub fn new(
        cache: Arc<dyn SpanCache>,
        publisher: Arc<dyn CompletionTimePublisher>,
        cfg: PipelineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        let deriver = CompletionTimeDeriver::new(cache).with_retry_delay(cfg.retry_delay);
        tokio::spawn(run_worker(deriver, publisher, cfg.retry, rx, tx.clone()));
        Self { tx }
    }

    /// Starts a derivation for every root span in the batch. Descendants only
    /// feed the correlation store; the in-flight item for their trace picks
    /// them up on its next poll.
    pub async fn submit_spans(&self, tenant: &str, spans: Vec<Span>) {
        let run = Stage::OneToMany(&ProcessingInitiator).run(tenant, spans, 0);
        for processing in run.outputs {
            self.submit(WorkItem::new(tenant, processing)).await;
        }
    }

    pub async fn submit(&self, item: WorkItem) {
        if self.tx.send(item).await.is_err() {
            warn!("completion pipeline dropped item: receiver closed");
        }
    }
}

async fn run_worker(
    deriver: CompletionTimeDeriver,
    publisher: Arc<dyn CompletionTimePublisher>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<WorkItem>,
    tx: mpsc::Sender<WorkItem>,
) {
    while let Some(item) = rx.recv().await {
        let WorkItem {
            tenant,
            processing,
            attempts,
            first_submitted,
        } = item;
        let run = Stage::OneToOne(&deriver).run(&tenant, vec![processing], attempts);

        for event in run.outputs {
            publish_with_retries(publisher.as_ref(), &tenant, event).await;
        }

        for state in run.retries {
            let attempts = attempts + 1;
            if attempts > policy.max_attempts {
                warn!(
                    trace_id = %state.root_span.trace_id,
                    attempts,
                    "abandoning trace: retry attempts exhausted"
                );
                continue;
            }
            let age = Utc::now()
                .signed_duration_since(first_submitted)
                .to_std()
                .unwrap_or_default();
            if age > policy.max_age {
                warn!(
                    trace_id = %state.root_span.trace_id,
                    age_secs = age.as_secs(),
                    "abandoning trace: older than retry window"
                );
                continue;
            }

            let next = WorkItem {
                tenant: tenant.clone(),
                processing: state,
                attempts,
                first_submitted,
            };
            let tx = tx.clone();
            let delay = run.retry_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(next).await;
            });
        }
    }
}

/// A derived event must not be lost to a transient sink failure: the publish
/// step gets its own short retry loop, separate from derivation retries, and
/// the full payload is logged if the sink stays down.
async fn publish_with_retries(
    publisher: &dyn CompletionTimePublisher,
    tenant: &str,
    event: CompletionTime,
) {
    let events = std::slice::from_ref(&event);
    for attempt in 0..PUBLISH_ATTEMPTS {
        match publisher.publish(tenant, events).await {
            Ok(()) => return,
            Err(e) => {
                warn!(id = %event.id, attempt, error = %e, "completion time publish failed");
                tokio::time::sleep(Duration::from_millis(30 * u64::from(attempt + 1))).await;
            }
        }
    }

    match serde_json::to_string(&event) {
        Ok(payload) => {
            error!(id = %event.id, payload = %payload, "completion time dropped after publish retries");
        }
        Err(_) => error!(id = %event.id, "completion time dropped after publish retries"),
    }
}
