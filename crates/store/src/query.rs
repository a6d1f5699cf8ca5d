use duckdb::params;
use tracefin_core::cache::SpanCache;
use tracefin_core::error::{Result, TracefinError};
use tracefin_core::model::span::{Annotation, Endpoint, EndpointRole, Span, Tag};

use crate::Store;

impl Store {
    /// Snapshot of every span currently stored for a trace, oldest first.
    /// Producers keep appending concurrently, so two consecutive calls may
    /// return different sets.
    pub fn get_trace(&self, tenant: &str, trace_id: &str) -> Result<Vec<Span>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT span_id, trace_id, parent_span_id, start_us, duration_us,
                        service, host, role, annotations_json, tags_json
                 FROM spans
                 WHERE tenant = ? AND trace_id = ?
                 ORDER BY start_us ASC",
            )
            .map_err(|e| TracefinError::Store(format!("prepare get_trace failed: {e}")))?;

        let rows = stmt
            .query_map(params![tenant, trace_id], |row| {
                Ok(SpanRow {
                    span_id: row.get(0)?,
                    trace_id: row.get(1)?,
                    parent_span_id: row.get(2)?,
                    start_us: row.get(3)?,
                    duration_us: row.get(4)?,
                    service: row.get(5)?,
                    host: row.get(6)?,
                    role: row.get(7)?,
                    annotations_json: row.get(8)?,
                    tags_json: row.get(9)?,
                })
            })
            .map_err(|e| TracefinError::Store(format!("get_trace query failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            let row = row.map_err(|e| TracefinError::Store(format!("get_trace row failed: {e}")))?;
            spans.push(row.into_span()?);
        }
        Ok(spans)
    }
}

impl SpanCache for Store {
    fn get_trace(&self, tenant: &str, trace_id: &str) -> Result<Vec<Span>> {
        Store::get_trace(self, tenant, trace_id)
    }
}

struct SpanRow {
    span_id: String,
    trace_id: String,
    parent_span_id: Option<String>,
    start_us: i64,
    duration_us: i64,
    service: Option<String>,
    host: Option<String>,
    role: Option<String>,
    annotations_json: String,
    tags_json: String,
}

impl SpanRow {
    fn into_span(self) -> Result<Span> {
        let annotations: Vec<Annotation> = serde_json::from_str(&self.annotations_json)
            .map_err(|e| TracefinError::Store(format!("decode annotations failed: {e}")))?;
        let tags: Vec<Tag> = serde_json::from_str(&self.tags_json)
            .map_err(|e| TracefinError::Store(format!("decode tags failed: {e}")))?;

        let endpoint = if self.service.is_some() || self.host.is_some() || self.role.is_some() {
            Some(Endpoint {
                host: self.host,
                service_name: self.service,
                role: match self.role.as_deref() {
                    Some("client") => EndpointRole::Client,
                    _ => EndpointRole::Server,
                },
            })
        } else {
            None
        };

        Ok(Span {
            id: self.span_id,
            trace_id: self.trace_id,
            parent_id: self.parent_span_id,
            timestamp_us: self.start_us,
            duration_us: self.duration_us,
            annotations,
            tags,
            endpoint,
        })
    }
}
