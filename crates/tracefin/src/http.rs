use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::Level;

use tracefin_core::model::span::Span;
use tracefin_processor::CompletionPipeline;
use tracefin_store::Store;
use tracefin_store::db::StatusSnapshot;

const TENANT_HEADER: &str = "x-tenant";
const DEFAULT_TENANT: &str = "default";

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub pipeline: CompletionPipeline,
}

pub fn router(store: Store, pipeline: CompletionPipeline) -> Router {
    Router::new()
        .route("/v1/spans", post(ingest_spans))
        .route("/v1/status", get(status))
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(AppState { store, pipeline })
}

async fn ingest_spans(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spans): Json<Vec<Span>>,
) -> StatusCode {
    let tenant = tenant_of(&headers);

    let mut accepted = Vec::with_capacity(spans.len());
    for span in spans {
        match span.validate() {
            Ok(()) => accepted.push(span),
            Err(e) => tracing::warn!(tenant = %tenant, error = %e, "span rejected"),
        }
    }

    if let Err(e) = state.store.insert_spans(&tenant, &accepted) {
        tracing::warn!(tenant = %tenant, error = %e, "failed to store span batch");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    tracing::debug!(count = accepted.len(), tenant = %tenant, "span batch accepted");

    state.pipeline.submit_spans(&tenant, accepted).await;
    StatusCode::OK
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, StatusCode> {
    state.store.status().map(Json).map_err(|e| {
        tracing::warn!(error = %e, "status query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn tenant_of(headers: &HeaderMap) -> String {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}
