use std::sync::Arc;
use std::time::Duration;

use testkit::{descendant_span, root_span};
use tracefin_processor::publish::MemoryPublisher;
use tracefin_processor::{CompletionPipeline, PipelineConfig, RetryPolicy};
use tracefin_store::Store;

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        channel_capacity: 16,
        retry_delay: Duration::from_millis(10),
        retry: RetryPolicy::default(),
    }
}

#[tokio::test]
async fn derives_completion_time_from_stored_spans() {
    let store = Store::open_in_memory().unwrap();
    let publisher = Arc::new(MemoryPublisher::default());
    let pipeline = CompletionPipeline::new(
        Arc::new(store.clone()),
        publisher.clone(),
        fast_config(),
    );

    let root = root_span("t1");
    store.insert_spans("acme", &[root.clone()]).unwrap();
    pipeline.submit_spans("acme", vec![root]).await;

    // An async leg reported while the root's item is still polling. Only the
    // correlation store sees it; no new work item starts for a descendant.
    let late = descendant_span("t1", "late", 15, 900);
    store.insert_spans("acme", &[late.clone()]).unwrap();
    pipeline.submit_spans("acme", vec![late]).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    let event = &published[0].1;
    assert_eq!(event.id, "t1");
    assert_eq!(event.duration_ms, 900);
    assert!(event.properties.iter().any(|p| p.name == "peer.service"));
    assert!(event.properties.iter().any(|p| p.name == "service"));
}

#[tokio::test]
async fn traces_for_different_tenants_stay_apart() {
    let store = Store::open_in_memory().unwrap();
    let publisher = Arc::new(MemoryPublisher::default());
    let pipeline = CompletionPipeline::new(
        Arc::new(store.clone()),
        publisher.clone(),
        fast_config(),
    );

    let root = root_span("t1");
    store.insert_spans("acme", &[root.clone()]).unwrap();
    store.insert_spans("globex", &[root.clone()]).unwrap();
    pipeline.submit_spans("acme", vec![root.clone()]).await;
    pipeline.submit_spans("globex", vec![root]).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut tenants: Vec<String> = publisher
        .published()
        .into_iter()
        .map(|(tenant, _)| tenant)
        .collect();
    tenants.sort();
    assert_eq!(tenants, vec!["acme".to_string(), "globex".to_string()]);
}
