use std::collections::HashMap;
use std::sync::Mutex;

use tracefin_core::cache::SpanCache;
use tracefin_core::error::Result;
use tracefin_core::model::span::{
    Annotation, Endpoint, EndpointRole, Span, TAG_HTTP_METHOD, TAG_HTTP_URL, Tag,
};

/// Base timestamp for fixture spans, microseconds since the epoch.
pub const BASE_US: i64 = 1_700_000_000_000_000;

/// Root span of a fixture trace: a 500 ms server-side GET with boundary
/// annotations at both ends. The span id mirrors the trace id, as roots
/// reported by the instrumentation do.
pub fn root_span(trace_id: &str) -> Span {
    Span {
        id: trace_id.to_string(),
        trace_id: trace_id.to_string(),
        parent_id: None,
        timestamp_us: BASE_US,
        duration_us: 500_000,
        annotations: vec![
            Annotation {
                timestamp_us: BASE_US,
                value: "sr".into(),
            },
            Annotation {
                timestamp_us: BASE_US + 500_000,
                value: "ss".into(),
            },
        ],
        tags: vec![
            Tag {
                key: TAG_HTTP_METHOD.into(),
                value: "GET".into(),
            },
            Tag {
                key: TAG_HTTP_URL.into(),
                value: "http://orders:8080/v1/orders".into(),
            },
        ],
        endpoint: Some(Endpoint {
            host: Some("10.0.0.1".into()),
            service_name: Some("orders".into()),
            role: EndpointRole::Server,
        }),
    }
}

/// A descendant span offset from the fixture base, annotated at its start and
/// end. Offsets are in milliseconds relative to the root start.
pub fn descendant_span(trace_id: &str, id: &str, start_offset_ms: i64, end_offset_ms: i64) -> Span {
    let start_us = BASE_US + start_offset_ms * 1_000;
    let end_us = BASE_US + end_offset_ms * 1_000;
    Span {
        id: id.to_string(),
        trace_id: trace_id.to_string(),
        parent_id: Some(trace_id.to_string()),
        timestamp_us: start_us,
        duration_us: end_us - start_us,
        annotations: vec![
            Annotation {
                timestamp_us: start_us,
                value: "cs".into(),
            },
            Annotation {
                timestamp_us: end_us,
                value: "cr".into(),
            },
        ],
        tags: vec![Tag {
            key: "peer.service".into(),
            value: "redis".into(),
        }],
        endpoint: Some(Endpoint {
            host: Some("10.0.0.2".into()),
            service_name: Some("orders".into()),
            role: EndpointRole::Client,
        }),
    }
}

/// In-memory correlation store standing in for the real span store in tests.
/// `put` replaces the whole snapshot for a trace, mimicking a store that
/// other producers keep appending to between polls.
#[derive(Default)]
pub struct MapCache {
    traces: Mutex<HashMap<(String, String), Vec<Span>>>,
}

impl MapCache {
    pub fn put(&self, tenant: &str, trace_id: &str, spans: Vec<Span>) {
        self.traces
            .lock()
            .expect("map cache mutex poisoned")
            .insert((tenant.to_string(), trace_id.to_string()), spans);
    }
}

impl SpanCache for MapCache {
    fn get_trace(&self, tenant: &str, trace_id: &str) -> Result<Vec<Span>> {
        Ok(self
            .traces
            .lock()
            .expect("map cache mutex poisoned")
            .get(&(tenant.to_string(), trace_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// A root plus one async descendant that outlives it, the shape the
/// completion-time pipeline exists to handle.
pub fn sample_trace(trace_id: &str) -> Vec<Span> {
    vec![
        root_span(trace_id),
        descendant_span(trace_id, "descendant", 15, 2_000),
    ]
}
