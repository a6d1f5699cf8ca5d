use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use tracefin_core::error::{Result, TracefinError};
use tracefin_core::model::completion::CompletionTime;

/// Downstream sink for finalized completion-time events. A rejected publish
/// surfaces as an error so the caller can retry it; it is never an excuse to
/// recompute the event.
#[async_trait]
pub trait CompletionTimePublisher: Send + Sync {
    async fn publish(&self, tenant: &str, events: &[CompletionTime]) -> Result<()>;
}

/// Default sink: emits events into the structured log stream.
pub struct LogPublisher;

#[async_trait]
impl CompletionTimePublisher for LogPublisher {
    async fn publish(&self, tenant: &str, events: &[CompletionTime]) -> Result<()> {
        for event in events {
            let payload = serde_json::to_string(event)
                .map_err(|e| TracefinError::Publish(format!("encode event failed: {e}")))?;
            info!(tenant, payload = %payload, "completion time");
        }
        Ok(())
    }
}

/// Posts events as a JSON batch to a collector endpoint.
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TracefinError::Publish(format!("failed to build publish client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionTimePublisher for HttpPublisher {
    async fn publish(&self, tenant: &str, events: &[CompletionTime]) -> Result<()> {
        let url = format!("{}/v1/completions", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .header("x-tenant", tenant)
            .json(events)
            .send()
            .await
            .map_err(|e| TracefinError::Publish(format!("post to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(TracefinError::Publish(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Collects published events in memory, for embedding and tests.
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<(String, CompletionTime)>>,
}

impl MemoryPublisher {
    pub fn published(&self) -> Vec<(String, CompletionTime)> {
        self.events
            .lock()
            .expect("memory publisher mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl CompletionTimePublisher for MemoryPublisher {
    async fn publish(&self, tenant: &str, events: &[CompletionTime]) -> Result<()> {
        let mut guard = self.events.lock().expect("memory publisher mutex poisoned");
        for event in events {
            guard.push((tenant.to_string(), event.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn event(id: &str) -> CompletionTime {
        CompletionTime {
            id: id.into(),
            timestamp_ms: 1,
            duration_ms: 2,
            operation: "GET /".into(),
            fault: None,
            host_address: None,
            endpoint_type: Some("HTTP".into()),
            uri: Some("/".into()),
            properties: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn memory_publisher_records_tenant_and_event() {
        let publisher = MemoryPublisher::default();
        publisher
            .publish("acme", &[event("a"), event("b")])
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "acme");
        assert_eq!(published[1].1.id, "b");
    }

    #[tokio::test]
    async fn log_publisher_accepts_events() {
        LogPublisher.publish("acme", &[event("a")]).await.unwrap();
    }

    #[tokio::test]
    async fn http_publisher_fails_against_closed_port() {
        let publisher =
            HttpPublisher::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = publisher.publish("acme", &[event("a")]).await.unwrap_err();
        assert!(matches!(err, TracefinError::Publish(_)));
    }
}
