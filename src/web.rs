//! HTTP surface: namespace and document management plus permission
//! checks. Path parameters always win over ids in request bodies.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::models::{Document, Namespace, PermissionsRequest};
use crate::settings::Settings;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/namespace/{namespace}",
            put(save_namespace).post(check_permissions),
        )
        .route("/namespace/{namespace}/doc/{document}", put(save_document))
        .route("/namespace/{namespace}/refresh", post(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

pub async fn serve(settings: Settings, engine: Arc<Engine>) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "Permissions API listening");
    axum::serve(listener, router(engine)).await.into_diagnostic()?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn save_namespace(
    State(engine): State<Arc<Engine>>,
    Path(namespace): Path<String>,
    Json(mut body): Json<Namespace>,
) -> Response {
    body.id = namespace;
    match engine.save_namespace(&body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => e.into_response(),
    }
}

async fn save_document(
    State(engine): State<Arc<Engine>>,
    Path((namespace, document)): Path<(String, String)>,
    Json(mut body): Json<Document>,
) -> Response {
    body.namespace_id = namespace;
    body.key = document;
    match engine.save_document(&body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => e.into_response(),
    }
}

async fn refresh(State(engine): State<Arc<Engine>>, Path(namespace): Path<String>) -> Response {
    match engine.refresh_policy_cache(&namespace).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => e.into_response(),
    }
}

async fn check_permissions(
    State(engine): State<Arc<Engine>>,
    Path(namespace): Path<String>,
    Json(mut request): Json<PermissionsRequest>,
) -> Response {
    request.namespace_id = namespace;
    match engine.process_engine_request(&request).await {
        Ok(actions) => Json(actions).into_response(),
        Err(e) => e.into_response(),
    }
}
