//! HTTP server for the fact extraction service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/parse` | Extract facts from text (cached by content hash) |
//! | `GET`  | `/facts` | Retrieve stored facts, optionally filtered by `?context=` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses carry a flat JSON body:
//!
//! ```json
//! { "error": "Invalid text parameter" }
//! ```
//!
//! `/parse` returns 400 for invalid input and 500 for completion, parse, or
//! persistence failures. `/facts` returns 404 when nothing matches and 500
//! when the store is unreachable.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::completion::{self, CompletionClient};
use crate::config::Config;
use crate::db;
use crate::extract::{extract_facts, ParseError};
use crate::models::Fact;
use crate::store::{FactStore, PgFactStore};

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
///
/// Both collaborators are injected trait objects, so tests run the same
/// router against in-memory doubles.
#[derive(Clone)]
pub struct AppState {
    pub completion: Arc<dyn CompletionClient>,
    pub store: Arc<dyn FactStore>,
}

/// Starts the HTTP server.
///
/// Connects to Postgres, builds the completion client from config, and binds
/// to the address in `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let state = AppState {
        completion: Arc::from(completion::create_client(&config.completion)?),
        store: Arc::new(PgFactStore::new(pool)),
    };

    let app = build_router(state);
    let bind_addr = &config.server.bind;

    tracing::info!(addr = %bind_addr, model = %config.completion.model, "listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router with all routes and the CORS layer.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/parse", post(handle_parse))
        .route("/facts", get(handle_facts))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// Flat JSON error body: `{ "error": "<message>" }`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: message.into(),
    }
}

/// Constructs a 500 Internal Server Error.
fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /parse ============

/// JSON request body for `POST /parse`.
#[derive(Deserialize)]
struct ParseRequest {
    text: Option<String>,
    context: Option<String>,
}

/// JSON response body for `POST /parse`: the extracted fact strings,
/// whether served from the cache or freshly generated.
#[derive(Serialize)]
struct ParseResponse {
    facts: Vec<String>,
}

/// Handler for `POST /parse`.
///
/// Validates `text` and `context`, then returns the cached fact set for the
/// text's hash or runs a fresh extraction through the completion API.
async fn handle_parse(
    State(state): State<AppState>,
    Json(req): Json<ParseRequest>,
) -> Result<Json<ParseResponse>, AppError> {
    let facts = extract_facts(
        state.completion.as_ref(),
        state.store.as_ref(),
        req.text.as_deref(),
        req.context.as_deref(),
    )
    .await
    .map_err(|e| match e {
        ParseError::InvalidText => bad_request("Invalid text parameter"),
        ParseError::InvalidContext => bad_request("Invalid context parameter"),
        ParseError::Upstream(err) => {
            error!(error = %err, "parse failed");
            internal_error(err.to_string())
        }
    })?;

    Ok(Json(ParseResponse { facts }))
}

// ============ GET /facts ============

/// Query parameters for `GET /facts`.
#[derive(Deserialize)]
struct FactsQuery {
    context: Option<String>,
}

/// JSON response body for `GET /facts`: full stored fact rows.
#[derive(Serialize)]
struct FactsResponse {
    facts: Vec<Fact>,
}

/// Handler for `GET /facts`.
///
/// Returns all fact rows matching the `context` filter; with no filter,
/// returns every stored fact. An empty result set is a 404.
async fn handle_facts(
    State(state): State<AppState>,
    Query(query): Query<FactsQuery>,
) -> Result<Json<FactsResponse>, AppError> {
    let facts = state
        .store
        .facts_by_context(query.context.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, "facts query failed");
            internal_error(e.to_string())
        })?;

    if facts.is_empty() {
        return Err(not_found(
            "No facts were found matching the specified text and context.",
        ));
    }

    Ok(Json(FactsResponse { facts }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StaticClient;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn router_with(client: StaticClient, store: MemoryStore) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(store);
        let app = build_router(AppState {
            completion: Arc::new(client),
            store: store.clone(),
        });
        (app, store)
    }

    fn parse_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri("/parse")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_parse_returns_extracted_facts() {
        let (app, store) = router_with(
            StaticClient::returning("\"fact one\", \"fact two\""),
            MemoryStore::new(),
        );

        let response = app
            .oneshot(parse_request(serde_json::json!({
                "text": "John McCrae wrote the web serial Worm.",
                "context": "Worm"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "facts": ["fact one", "fact two"] }));
        assert_eq!(store.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_invalid_text() {
        let (app, _store) = router_with(StaticClient::returning("\"a\""), MemoryStore::new());

        let response = app
            .oneshot(parse_request(serde_json::json!({
                "text": "",
                "context": "Worm"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "error": "Invalid text parameter" }));
    }

    #[tokio::test]
    async fn test_parse_overlong_text() {
        let (app, _store) = router_with(StaticClient::returning("\"a\""), MemoryStore::new());

        let response = app
            .oneshot(parse_request(serde_json::json!({
                "text": "x".repeat(2001),
                "context": "Worm"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "error": "Invalid text parameter" }));
    }

    #[tokio::test]
    async fn test_parse_invalid_context() {
        let (app, _store) = router_with(StaticClient::returning("\"a\""), MemoryStore::new());

        let response = app
            .oneshot(parse_request(serde_json::json!({
                "text": "valid text",
                "context": "c".repeat(257)
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({ "error": "Invalid context parameter" })
        );
    }

    #[tokio::test]
    async fn test_parse_malformed_completion_is_500() {
        let (app, store) = router_with(
            StaticClient::returning("definitely not json"),
            MemoryStore::new(),
        );

        let response = app
            .oneshot(parse_request(serde_json::json!({
                "text": "valid text",
                "context": "Worm"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("fact list"));
        assert!(store.prompts().is_empty());
        assert!(store.facts().is_empty());
    }

    #[tokio::test]
    async fn test_parse_second_request_hits_cache() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(StaticClient::returning("\"fact one\""));
        let app = build_router(AppState {
            completion: client.clone(),
            store: store.clone(),
        });

        let body = serde_json::json!({ "text": "same text", "context": "Worm" });
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(parse_request(body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json, serde_json::json!({ "facts": ["fact one"] }));
        }

        assert_eq!(client.call_count(), 1);
        assert_eq!(store.prompts().len(), 1);
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_extraction(
                "worm text",
                "Worm",
                "h1",
                &["fact one".to_string(), "fact two".to_string()],
            )
            .await
            .unwrap();
        store
            .insert_extraction("ward text", "Ward", "h2", &["other fact".to_string()])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_facts_filtered_by_context() {
        let (app, _store) = router_with(StaticClient::returning(""), seeded_store().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/facts?context=Worm")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let facts = body["facts"].as_array().unwrap();
        assert_eq!(facts.len(), 2);
        // Full rows, not just text projections.
        assert_eq!(facts[0]["text"], "fact one");
        assert_eq!(facts[0]["context"], "Worm");
        assert_eq!(facts[0]["prompt_id"], 1);
        assert!(facts[0]["inserted_at"].is_string());
        assert!(facts[0]["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_facts_without_filter_returns_all() {
        let (app, _store) = router_with(StaticClient::returning(""), seeded_store().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/facts")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["facts"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_facts_no_match_is_404() {
        let (app, _store) = router_with(StaticClient::returning(""), seeded_store().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/facts?context=Twig")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "error": "No facts were found matching the specified text and context."
            })
        );
    }

    #[tokio::test]
    async fn test_facts_store_failure_is_500() {
        let (app, _store) = router_with(StaticClient::returning(""), MemoryStore::failing());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/facts")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _store) = router_with(StaticClient::returning(""), MemoryStore::new());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }
}
