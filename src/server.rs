//! HTTP integration surface: exposes the Comparator over `/health` and
//! `/compare`.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::analysis::Analyzer;
use crate::comparator::{ComparisonReport, Comparator, Thresholds};
use crate::loader::Loader;
use crate::opcode_table::opcode_table;
use crate::toolchain::ToolchainAdapter;

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub orig_artifact_b64: String,
    pub candidate_source: String,
    pub debug_filename: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "pybc-verify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

struct ServerState {
    thresholds: Thresholds,
    toolchain: ToolchainAdapter,
}

async fn compare_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<CompareRequest>,
) -> impl IntoResponse {
    match run_compare(&state, payload).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: e.to_string() }),
        )
            .into_response(),
    }
}

async fn run_compare(
    state: &ServerState,
    payload: CompareRequest,
) -> crate::error::Result<ComparisonReport> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&payload.orig_artifact_b64)
        .map_err(|e| crate::error::VerifyError::LoadError {
            path: "<request body>".to_string(),
            reason: e.to_string(),
        })?;

    let tmp = tempfile::Builder::new().suffix(".pyc").tempfile().map_err(crate::error::VerifyError::Io)?;
    tokio::fs::write(tmp.path(), &bytes).await.map_err(crate::error::VerifyError::Io)?;
    let orig = Loader::load(tmp.path())?;

    let resolved = state.toolchain.locator.resolve_or_current(orig.version);
    let compiled_dir = tempfile::tempdir().map_err(crate::error::VerifyError::Io)?;
    let compiled_path = compiled_dir.path().join("candidate.pyc");
    state
        .toolchain
        .compile_source(&resolved.path, &payload.candidate_source, &compiled_path, &payload.debug_filename)
        .await?;
    let comp = Loader::load(&compiled_path)?;

    let table_orig = opcode_table(orig.version, orig.implementation);
    let table_comp = opcode_table(comp.version, comp.implementation);
    let orig_units = Analyzer::new(&table_orig).analyze(&orig.root);
    let comp_units = Analyzer::new(&table_comp).analyze(&comp.root);

    let comparator = Comparator::new(state.thresholds);
    Ok(comparator.compare(&orig_units, &comp_units, orig.version, comp.version))
}

pub async fn run_server(port: u16, thresholds: Thresholds) -> anyhow::Result<()> {
    let state = Arc::new(ServerState {
        thresholds,
        toolchain: ToolchainAdapter::default(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/compare", post(compare_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "pybc-verify server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
