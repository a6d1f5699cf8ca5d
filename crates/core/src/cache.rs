use crate::error::Result;
use crate::model::span::Span;

/// Correlation lookup over every span currently known for a trace.
///
/// The returned set is a point-in-time snapshot: other producers keep
/// appending spans concurrently, so callers must never treat a snapshot as
/// final, only compare it against their own earlier observations.
pub trait SpanCache: Send + Sync {
    fn get_trace(&self, tenant: &str, trace_id: &str) -> Result<Vec<Span>>;
}
