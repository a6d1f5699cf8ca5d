pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
    tenant TEXT NOT NULL,
    trace_id TEXT NOT NULL,
    span_id TEXT NOT NULL,
    parent_span_id TEXT,
    start_us BIGINT NOT NULL,
    duration_us BIGINT NOT NULL,
    service TEXT,
    host TEXT,
    role TEXT,
    annotations_json TEXT NOT NULL,
    tags_json TEXT NOT NULL,
    PRIMARY KEY (tenant, trace_id, span_id)
);

CREATE INDEX IF NOT EXISTS spans_trace_idx ON spans (tenant, trace_id);
CREATE INDEX IF NOT EXISTS spans_start_idx ON spans (start_us);
"#;
