use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tracefin_core::cache::SpanCache;
use tracefin_core::model::completion::{CompletionTime, Property};
use tracefin_core::model::span::{Span, TAG_ERROR, TAG_HTTP_METHOD, TAG_HTTP_STATUS_CODE};
use tracefin_core::time::us_to_ms;

use crate::task::{DEFAULT_RETRY_DELAY, OneToOne, Step};

pub const PROP_SERVICE_NAME: &str = "service";
pub const URI_CLIENT_PREFIX: &str = "client:";

/// In-flight derivation state for one trace, carried across redeliveries.
/// `last_timestamp_us` is the mark observed on the previous poll; `None`
/// means the item was never polled, which is distinct from a mark of zero
/// and must survive (de)serialization that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTimeProcessing {
    pub root_span: Span,
    pub last_timestamp_us: Option<i64>,
}

impl CompletionTimeProcessing {
    pub fn new(root_span: Span) -> Self {
        Self {
            root_span,
            last_timestamp_us: None,
        }
    }
}

/// Derives the completion time of a trace from the spans reported so far.
///
/// Each poll reads a fresh snapshot from the correlation store and compares
/// the newest observed mark against the one carried in the processing state.
/// "No new data within one retry interval" stands in for "trace finished":
/// async spans can be reported any time after the root, so legs arriving
/// after the bounded retry window are missed. That window is the transport's
/// retry policy, not something decided here.
pub struct CompletionTimeDeriver {
    cache: Arc<dyn SpanCache>,
    retry_delay: Duration,
}

impl CompletionTimeDeriver {
    pub fn new(cache: Arc<dyn SpanCache>) -> Self {
        Self {
            cache,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl OneToOne for CompletionTimeDeriver {
    type State = CompletionTimeProcessing;
    type Out = CompletionTime;

    fn process(
        &self,
        tenant: &str,
        mut item: CompletionTimeProcessing,
    ) -> Step<CompletionTimeProcessing, CompletionTime> {
        if let Err(e) = item.root_span.validate() {
            return Step::Drop(format!("unusable root span: {e}"));
        }

        let trace = match self.cache.get_trace(tenant, &item.root_span.trace_id) {
            Ok(trace) if !trace.is_empty() => trace,
            Ok(_) => {
                // Correlation row not visible yet; poll again.
                return Step::Retry(item);
            }
            Err(e) => {
                warn!(
                    trace_id = %item.root_span.trace_id,
                    error = %e,
                    "trace lookup failed, retrying"
                );
                return Step::Retry(item);
            }
        };

        let last_mark = last_observed_us(&trace);

        // The trace grew since the previous poll (or was never polled):
        // remember the new mark and wait one more interval. Never emit on the
        // first poll.
        match item.last_timestamp_us {
            Some(prev) if prev >= last_mark => {}
            _ => {
                item.last_timestamp_us = Some(last_mark);
                return Step::Retry(item);
            }
        }

        let mut event = completion_time_from_root(&item.root_span);
        event.duration_ms = us_to_ms(trace_duration_us(&item.root_span, last_mark));
        event.properties.extend(collect_properties(&trace));

        debug!(
            id = %event.id,
            duration_ms = event.duration_ms,
            "derived trace completion time"
        );
        Step::Output(event)
    }

    fn retry_delay(&self, _items: &[CompletionTimeProcessing], _retry_count: u32) -> Duration {
        self.retry_delay
    }
}

/// Newest mark across the snapshot: the maximum annotation timestamp, or the
/// latest span end when the snapshot carries no annotations at all.
fn last_observed_us(trace: &[Span]) -> i64 {
    trace
        .iter()
        .filter_map(|s| s.last_annotation_us())
        .max()
        .unwrap_or_else(|| trace.iter().map(|s| s.end_us()).max().unwrap_or(0))
}

/// Cross-span estimate floored by the root's own measured duration: the
/// instrumentation sets the root duration, so a smaller estimate means the
/// estimate undershoots, not that the trace was shorter.
fn trace_duration_us(root: &Span, last_mark_us: i64) -> i64 {
    let estimated = last_mark_us - root.timestamp_us;
    estimated.max(root.duration_us)
}

/// Identity fields of the event come from the root span only; descendants
/// contribute duration and properties.
fn completion_time_from_root(root: &Span) -> CompletionTime {
    let (endpoint_type, uri) = match root.url_parts() {
        Some((scheme, path)) => {
            let uri = if root.is_client() {
                format!("{URI_CLIENT_PREFIX}{path}")
            } else {
                path
            };
            (Some(scheme.to_uppercase()), Some(uri))
        }
        None => (Some("Unknown".to_string()), None),
    };

    let mut properties: BTreeSet<Property> = root.properties().into_iter().collect();
    if let Some(service) = root.service() {
        properties.insert(Property::new(PROP_SERVICE_NAME, service));
    }

    CompletionTime {
        id: root.id.clone(),
        timestamp_ms: us_to_ms(root.timestamp_us),
        duration_ms: us_to_ms(root.duration_us),
        operation: derive_operation(root),
        fault: derive_fault(root),
        host_address: root.host().map(str::to_string),
        endpoint_type,
        uri,
        properties,
    }
}

fn derive_operation(root: &Span) -> String {
    let method = root.tag(TAG_HTTP_METHOD);
    let path = root.url_parts().map(|(_, path)| path);
    match (method, path) {
        (Some(method), Some(path)) => format!("{method} {path}"),
        (Some(method), None) => method.to_string(),
        (None, Some(path)) => path,
        (None, None) => "unknown".to_string(),
    }
}

fn derive_fault(root: &Span) -> Option<String> {
    if let Some(status) = root.tag(TAG_HTTP_STATUS_CODE)
        && let Ok(code) = status.parse::<u16>()
        && code >= 400
    {
        return Some(code.to_string());
    }
    root.tag(TAG_ERROR).map(|value| {
        if value.is_empty() || value == "true" {
            "error".to_string()
        } else {
            value.to_string()
        }
    })
}

fn collect_properties(trace: &[Span]) -> BTreeSet<Property> {
    trace.iter().flat_map(|s| s.properties()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use testkit::{BASE_US, MapCache, descendant_span, root_span};
    use tracefin_core::error::TracefinError;
    use tracefin_core::model::span::{Annotation, Tag};

    use super::*;

    struct FailingCache;

    impl SpanCache for FailingCache {
        fn get_trace(&self, _tenant: &str, _trace_id: &str) -> tracefin_core::Result<Vec<Span>> {
            Err(TracefinError::Store("connection refused".into()))
        }
    }

    fn deriver(cache: Arc<MapCache>) -> CompletionTimeDeriver {
        CompletionTimeDeriver::new(cache)
    }

    /// Millisecond-granularity rendition of the reference scenario: poll 1
    /// records the mark, poll 2 emits the root's own duration, a late async
    /// descendant grows the trace, polls 3/4 repeat the cycle with the
    /// extended duration.
    #[test]
    fn derives_completion_time_across_polls() {
        let cache = Arc::new(MapCache::default());
        let deriver = deriver(cache.clone());

        let mut root = root_span("trace");
        root.duration_us = 1_000;
        root.annotations = vec![
            Annotation {
                timestamp_us: BASE_US,
                value: "sr".into(),
            },
            Annotation {
                timestamp_us: BASE_US + 1_000,
                value: "ss".into(),
            },
        ];
        cache.put("acme", "trace", vec![root.clone()]);

        let item = CompletionTimeProcessing::new(root.clone());

        let step = deriver.process("acme", item);
        let Step::Retry(item) = step else {
            panic!("first poll must not emit, got {step:?}");
        };
        assert_eq!(item.last_timestamp_us, Some(BASE_US + 1_000));

        let step = deriver.process("acme", item.clone());
        let Step::Output(event) = step else {
            panic!("unchanged mark must emit, got {step:?}");
        };
        assert_eq!(event.duration_ms, 1);

        let descendant = descendant_span("trace", "descendant", 15, 20);
        cache.put("acme", "trace", vec![root, descendant]);

        let step = deriver.process("acme", item);
        let Step::Retry(item) = step else {
            panic!("grown trace must not emit, got {step:?}");
        };
        assert_eq!(item.last_timestamp_us, Some(BASE_US + 20_000));

        let step = deriver.process("acme", item);
        let Step::Output(event) = step else {
            panic!("stable trace must emit, got {step:?}");
        };
        assert_eq!(event.duration_ms, 20);
    }

    #[test]
    fn first_poll_never_emits() {
        let cache = Arc::new(MapCache::default());
        let root = root_span("t1");
        cache.put("acme", "t1", vec![root.clone()]);

        let step = deriver(cache).process("acme", CompletionTimeProcessing::new(root));
        assert!(matches!(step, Step::Retry(_)));
    }

    #[test]
    fn repeated_polls_of_stable_state_are_pure() {
        let cache = Arc::new(MapCache::default());
        let root = root_span("t1");
        cache.put("acme", "t1", vec![root.clone()]);
        let deriver = deriver(cache);

        let mut item = CompletionTimeProcessing::new(root);
        item.last_timestamp_us = Some(BASE_US + 500_000);

        let Step::Output(first) = deriver.process("acme", item.clone()) else {
            panic!("expected output");
        };
        let Step::Output(second) = deriver.process("acme", item) else {
            panic!("expected output");
        };
        assert_eq!(first, second);
    }

    #[test]
    fn duration_never_undershoots_root_duration() {
        let cache = Arc::new(MapCache::default());
        let mut root = root_span("t1");
        // Root measured 500ms but its last annotation sits at +100ms.
        root.annotations = vec![Annotation {
            timestamp_us: BASE_US + 100_000,
            value: "ss".into(),
        }];
        cache.put("acme", "t1", vec![root.clone()]);
        let deriver = deriver(cache);

        let mut item = CompletionTimeProcessing::new(root);
        item.last_timestamp_us = Some(BASE_US + 100_000);

        let Step::Output(event) = deriver.process("acme", item) else {
            panic!("expected output");
        };
        assert_eq!(event.duration_ms, 500);
    }

    #[test]
    fn properties_union_deduplicates() {
        let cache = Arc::new(MapCache::default());
        let root = root_span("t1");
        let mut first = descendant_span("t1", "d1", 10, 20);
        let mut second = descendant_span("t1", "d2", 30, 40);
        first.tags = vec![Tag {
            key: "region".into(),
            value: "eu-1".into(),
        }];
        second.tags = first.tags.clone();
        cache.put("acme", "t1", vec![root.clone(), first, second]);
        let deriver = deriver(cache);

        let mut item = CompletionTimeProcessing::new(root);
        item.last_timestamp_us = Some(BASE_US + 500_000);

        let Step::Output(event) = deriver.process("acme", item) else {
            panic!("expected output");
        };
        let regions: Vec<_> = event
            .properties
            .iter()
            .filter(|p| p.name == "region")
            .collect();
        assert_eq!(regions.len(), 1);
        assert!(
            event
                .properties
                .contains(&Property::new(PROP_SERVICE_NAME, "orders"))
        );
    }

    #[test]
    fn identity_fields_come_from_root_only() {
        let cache = Arc::new(MapCache::default());
        let root = root_span("t1");
        let mut failing_child = descendant_span("t1", "d1", 10, 20);
        failing_child.tags.push(Tag {
            key: TAG_HTTP_STATUS_CODE.into(),
            value: "503".into(),
        });
        cache.put("acme", "t1", vec![root.clone(), failing_child]);
        let deriver = deriver(cache);

        let mut item = CompletionTimeProcessing::new(root.clone());
        item.last_timestamp_us = Some(BASE_US + 500_000);

        let Step::Output(event) = deriver.process("acme", item) else {
            panic!("expected output");
        };
        assert_eq!(event.id, root.id);
        assert_eq!(event.operation, "GET /v1/orders");
        assert_eq!(event.fault, None);
        assert_eq!(event.uri.as_deref(), Some("/v1/orders"));
        assert_eq!(event.endpoint_type.as_deref(), Some("HTTP"));
        assert_eq!(event.host_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn faulted_root_sets_fault() {
        let mut root = root_span("t1");
        root.tags.push(Tag {
            key: TAG_HTTP_STATUS_CODE.into(),
            value: "500".into(),
        });
        let event = completion_time_from_root(&root);
        assert_eq!(event.fault.as_deref(), Some("500"));

        let mut root = root_span("t2");
        root.tags.push(Tag {
            key: TAG_ERROR.into(),
            value: "true".into(),
        });
        let event = completion_time_from_root(&root);
        assert_eq!(event.fault.as_deref(), Some("error"));
    }

    #[test]
    fn client_root_uri_is_prefixed() {
        let mut root = root_span("t1");
        root.endpoint.as_mut().unwrap().role =
            tracefin_core::model::span::EndpointRole::Client;
        let event = completion_time_from_root(&root);
        assert_eq!(event.uri.as_deref(), Some("client:/v1/orders"));
    }

    #[test]
    fn root_without_url_gets_unknown_endpoint_type() {
        let mut root = root_span("t1");
        root.tags.retain(|t| t.key != tracefin_core::model::span::TAG_HTTP_URL);
        let event = completion_time_from_root(&root);
        assert_eq!(event.endpoint_type.as_deref(), Some("Unknown"));
        assert_eq!(event.uri, None);
    }

    #[test]
    fn lookup_failure_retries_with_unchanged_state() {
        let deriver = CompletionTimeDeriver::new(Arc::new(FailingCache));
        let root = root_span("t1");
        let mut item = CompletionTimeProcessing::new(root);
        item.last_timestamp_us = Some(42);

        let Step::Retry(state) = deriver.process("acme", item.clone()) else {
            panic!("lookup failure must retry");
        };
        assert_eq!(state, item);
    }

    #[test]
    fn malformed_root_is_dropped() {
        let cache = Arc::new(MapCache::default());
        let mut root = root_span("t1");
        root.id.clear();
        let step = deriver(cache).process("acme", CompletionTimeProcessing::new(root));
        assert!(matches!(step, Step::Drop(_)));
    }

    #[test]
    fn annotation_free_snapshot_falls_back_to_span_end() {
        let cache = Arc::new(MapCache::default());
        let mut root = root_span("t1");
        root.annotations.clear();
        cache.put("acme", "t1", vec![root.clone()]);
        let deriver = deriver(cache);

        let Step::Retry(item) = deriver.process("acme", CompletionTimeProcessing::new(root)) else {
            panic!("first poll must retry");
        };
        assert_eq!(item.last_timestamp_us, Some(BASE_US + 500_000));
    }

    #[test]
    fn serialization_keeps_never_polled_distinct_from_zero() {
        let never = CompletionTimeProcessing::new(root_span("t1"));
        let zero = CompletionTimeProcessing {
            last_timestamp_us: Some(0),
            ..never.clone()
        };

        let never_json = serde_json::to_string(&never).unwrap();
        let zero_json = serde_json::to_string(&zero).unwrap();
        assert_ne!(never_json, zero_json);

        let never_back: CompletionTimeProcessing = serde_json::from_str(&never_json).unwrap();
        let zero_back: CompletionTimeProcessing = serde_json::from_str(&zero_json).unwrap();
        assert_eq!(never_back.last_timestamp_us, None);
        assert_eq!(zero_back.last_timestamp_us, Some(0));
    }
}
