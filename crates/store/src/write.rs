use duckdb::params;
use tracefin_core::error::{Result, TracefinError};
use tracefin_core::model::span::{EndpointRole, Span};

use crate::Store;

impl Store {
    /// Upserts a batch of spans for one tenant. Re-reported spans replace the
    /// stored row, so redelivered batches stay idempotent.
    pub fn insert_spans(&self, tenant: &str, spans: &[Span]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| TracefinError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO spans
                     (tenant, trace_id, span_id, parent_span_id, start_us, duration_us,
                      service, host, role, annotations_json, tags_json)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| TracefinError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                let annotations_json = serde_json::to_string(&span.annotations)
                    .map_err(|e| TracefinError::Store(format!("encode annotations failed: {e}")))?;
                let tags_json = serde_json::to_string(&span.tags)
                    .map_err(|e| TracefinError::Store(format!("encode tags failed: {e}")))?;
                let role = span.endpoint.as_ref().map(|e| match e.role {
                    EndpointRole::Client => "client",
                    EndpointRole::Server => "server",
                });

                stmt.execute(params![
                    tenant,
                    span.trace_id,
                    span.id,
                    span.parent_id,
                    span.timestamp_us,
                    span.duration_us,
                    span.service(),
                    span.host(),
                    role,
                    annotations_json,
                    tags_json,
                ])
                .map_err(|e| TracefinError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TracefinError::Store(format!("commit spans failed: {e}")))
    }
}
