// Bank Categorizer - Web Server
// REST API over the rule store with Axum

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bank_categorizer::{
    classify_all, load_config, BatchOutcome, Category, Classification, RuleError, RuleStore,
};

#[derive(Parser, Debug)]
#[command(name = "categorizer-server", version, about = "Rule store REST API")]
struct Args {
    /// Config file (default: ./bank-categorizer.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<RuleStore>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Rule store failure carried out of a handler
struct ApiError(RuleError);

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RuleError::DuplicateCategory(_) => StatusCode::CONFLICT,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        (status, Json(ApiResponse::failed(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Deserialize)]
struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
struct KeywordRequest {
    keyword: String,
}

#[derive(Serialize)]
struct KeywordAdded {
    added: bool,
}

#[derive(Deserialize)]
struct LearnRequest {
    description: String,
}

#[derive(Serialize)]
struct KeywordLearned {
    keyword: Option<String>,
}

#[derive(Deserialize)]
struct ClassifyRequest {
    descriptions: Vec<Option<String>>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/categories - Categories with keywords, in match priority order
async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<Category>> {
    Ok(Json(ApiResponse::ok(state.store.list_categories()?)))
}

/// POST /api/categories - Create a category
async fn create_category(
    State(state): State<AppState>,
    Json(body): Json<NameRequest>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<Category>>), ApiError> {
    let category = state.store.add_category(&body.name)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(category))))
}

/// PUT /api/categories/:name - Rename a category
async fn rename_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<NameRequest>,
) -> ApiResult<Category> {
    state.store.rename_category(&name, &body.name)?;
    Ok(Json(ApiResponse::ok(state.store.get_category(&body.name)?)))
}

/// DELETE /api/categories/:name - Delete a category and its keywords
async fn delete_category(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    state.store.delete_category(&name)?;
    Ok(Json(ApiResponse::ok(())))
}

/// POST /api/categories/:name/keywords - Add a keyword (idempotent)
async fn add_keyword(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<KeywordRequest>,
) -> ApiResult<KeywordAdded> {
    let added = state.store.add_keyword(&name, &body.keyword)?;
    Ok(Json(ApiResponse::ok(KeywordAdded { added })))
}

/// DELETE /api/categories/:name/keywords/:keyword - Remove a keyword
async fn remove_keyword(
    State(state): State<AppState>,
    Path((name, keyword)): Path<(String, String)>,
) -> ApiResult<()> {
    state.store.remove_keyword(&name, &keyword)?;
    Ok(Json(ApiResponse::ok(())))
}

/// POST /api/categories/:name/learn - Learn a keyword from a recategorized description
async fn learn_keyword(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<LearnRequest>,
) -> ApiResult<KeywordLearned> {
    let keyword = state.store.learn_keyword(&name, &body.description)?;
    Ok(Json(ApiResponse::ok(KeywordLearned { keyword })))
}

/// POST /api/classify - Classify a batch of descriptions against one snapshot
async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> ApiResult<BatchOutcome<Option<String>>> {
    let snapshot = state.store.snapshot()?;
    Ok(Json(ApiResponse::ok(classify_all(body.descriptions, &snapshot))))
}

/// GET /api/match/:description - Classify one description
async fn match_description(
    State(state): State<AppState>,
    Path(description): Path<String>,
) -> ApiResult<Classification> {
    Ok(Json(ApiResponse::ok(state.store.snapshot()?.classify(&description))))
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:name", put(rename_category).delete(delete_category))
        .route("/categories/:name/keywords", post(add_keyword))
        .route("/categories/:name/keywords/:keyword", delete(remove_keyword))
        .route("/categories/:name/learn", post(learn_keyword))
        .route("/classify", post(classify))
        .route("/match/:description", get(match_description))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    println!("🌐 Bank Categorizer - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = RuleStore::open(&config.storage.db_path)
        .with_context(|| format!("open rule store {}", config.storage.db_path.display()))?
        .with_actor("api");
    println!("✓ Rule store opened: {}", config.storage.db_path.display());

    match store.import_legacy_if_present(&config.storage.legacy_path) {
        Ok(Some(report)) => println!("✓ Legacy rules: {}", report.summary()),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "automatic legacy import failed"),
    }

    let app = router(AppState {
        store: Arc::new(store),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("bind {}", config.server.addr))?;

    println!("\n🚀 Server running on http://{}", config.server.addr);
    println!("   API: http://{}/api/categories", config.server.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState {
            store: Arc::new(RuleStore::open_in_memory().unwrap()),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_category_lifecycle() {
        let app = app();

        let (status, _) = send(&app, "POST", "/api/categories", Some(r#"{"name":"Food"}"#)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            "POST",
            "/api/categories/Food/keywords",
            Some(r#"{"keyword":"coffee"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["added"], true);

        let (_, body) = send(&app, "GET", "/api/categories", None).await;
        assert_eq!(body["data"][0]["name"], "Food");
        assert_eq!(body["data"][0]["keywords"][0]["pattern"], "coffee");

        let (status, body) = send(&app, "PUT", "/api/categories/food", Some(r#"{"name":"Dining"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Dining");

        let (status, _) = send(&app, "DELETE", "/api/categories/Dining/keywords/COFFEE", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "DELETE", "/api/categories/Dining", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();
        send(&app, "POST", "/api/categories", Some(r#"{"name":"Food"}"#)).await;

        let (status, body) = send(&app, "POST", "/api/categories", Some(r#"{"name":"FOOD"}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, _) = send(&app, "DELETE", "/api/categories/Travel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/api/categories/Food/keywords",
            Some(r#"{"keyword":"   "}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_learn_keyword_route() {
        let app = app();
        send(&app, "POST", "/api/categories", Some(r#"{"name":"Groceries"}"#)).await;

        let body = r#"{"description":"COMPRA LULU HYPERMARKET 12.50"}"#;
        let (status, first) = send(&app, "POST", "/api/categories/groceries/learn", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["keyword"], "HYPERMARKET");

        let (_, second) = send(&app, "POST", "/api/categories/Groceries/learn", Some(body)).await;
        assert_eq!(second["data"]["keyword"], serde_json::Value::Null);

        let (status, _) = send(&app, "POST", "/api/categories/Travel/learn", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_classify_batch() {
        let app = app();
        send(&app, "POST", "/api/categories", Some(r#"{"name":"Travel"}"#)).await;
        send(&app, "POST", "/api/categories/Travel/keywords", Some(r#"{"keyword":"uber"}"#)).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/classify",
            Some(r#"{"descriptions":["UBER TRIP", "RENT", null]}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["results"][0]["classification"]["category"], "Travel");
        assert_eq!(body["data"]["summary"]["uncategorized_count"], 2);
        assert_eq!(body["data"]["summary"]["total"], 3);
    }
}
