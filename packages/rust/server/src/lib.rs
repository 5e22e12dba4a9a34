//! HTTP surface for the reconciliation engine.
//!
//! Routes:
//! - `POST /identify` - reconcile a contact fragment
//! - `GET /contacts/:id` - consolidated view of the group containing a contact
//! - `GET /health` - liveness probe

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reconciler_core::ReconciliationEngine;
use reconciler_shared::{ContactId, IdentifyRequest, IdentifyResponse, ReconcilerError};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// State shared by every handler.
pub struct AppState {
    pub engine: ReconciliationEngine,
}

impl AppState {
    pub fn new(engine: ReconciliationEngine) -> Self {
        Self { engine }
    }
}

/// Build the router with all routes and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/identify", post(identify))
        .route("/contacts/:id", get(get_contact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<(), ReconcilerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ReconcilerError::server(addr, e))?;
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ReconcilerError::server(addr, e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

async fn identify(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError(ReconcilerError::invalid_input(e.body_text())))?;
    let contact = state.engine.identify(request).await?;
    Ok(Json(IdentifyResponse { contact }))
}

async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let found = state.engine.lookup(ContactId(id)).await?;
    Ok(match found {
        Some(contact) => Json(IdentifyResponse { contact }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "NotFound".into(),
                message: format!("contact {id} not found"),
            }),
        )
            .into_response(),
    })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Maps [`ReconcilerError`] onto an HTTP response: caller faults are 400,
/// everything else 500.
#[derive(Debug)]
pub struct ApiError(ReconcilerError);

impl From<ReconcilerError> for ApiError {
    fn from(err: ReconcilerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorBody {
            error: self.0.kind().into(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use reconciler_storage::MemoryStore;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let engine = ReconciliationEngine::new(Arc::new(MemoryStore::new()));
        build_router(Arc::new(AppState::new(engine)))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_identify(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/identify")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn identify_links_and_reports_group() {
        let app = test_app();

        let resp = app
            .clone()
            .oneshot(post_identify(
                r#"{"email": "lorraine@hillvalley.edu", "phoneNumber": "123456"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let first = body_json(resp).await;
        assert_eq!(first["contact"]["primaryContatctId"], 1);
        assert_eq!(first["contact"]["secondaryContactIds"], serde_json::json!([]));

        let resp = app
            .oneshot(post_identify(
                r#"{"email": "mcfly@hillvalley.edu", "phoneNumber": 123456}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let second = body_json(resp).await;
        assert_eq!(
            second,
            serde_json::json!({
                "contact": {
                    "primaryContatctId": 1,
                    "emails": ["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"],
                    "phoneNumbers": ["123456"],
                    "secondaryContactIds": [2]
                }
            })
        );
    }

    #[tokio::test]
    async fn identify_without_fields_is_bad_request() {
        let resp = test_app()
            .oneshot(post_identify(r#"{"email": null, "phoneNumber": null}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "InvalidInput");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let resp = test_app()
            .oneshot(post_identify(r#"{"email": "#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "InvalidInput");
    }

    #[tokio::test]
    async fn contact_lookup_finds_group_or_404() {
        let app = test_app();
        app.clone()
            .oneshot(post_identify(r#"{"email": "a@x.io"}"#))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/contacts/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["contact"]["emails"][0], "a@x.io");

        let resp = app
            .oneshot(Request::builder().uri("/contacts/99").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bind_failure_reports_the_address() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let engine = ReconciliationEngine::new(Arc::new(MemoryStore::new()));

        let err = serve(&addr, Arc::new(AppState::new(engine)))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcilerError::Server { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[test]
    fn store_errors_map_to_500() {
        let resp = ApiError(ReconcilerError::store("database is locked")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
