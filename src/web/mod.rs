pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    models::ModelManager,
    prediction::{PredictionService, PredictionStore, UPLOAD_URL_PREFIX},
    utils::error::RetinaError,
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir, timeout::TimeoutLayer,
};

use extractors::RequestId;
use handlers::ApiResponse;

/// 处理器共享状态：模型与结果存储随进程存活
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub service: PredictionService,
}

impl AppState {
    pub fn new(manager: ModelManager) -> Self {
        let store = Arc::new(PredictionStore::new());
        let service = PredictionService::new(manager.model(), store)
            .with_upload_dir(manager.config().upload_dir.clone());

        Self {
            manager: Arc::new(manager),
            service,
        }
    }

    pub fn config(&self) -> &Config {
        self.manager.config()
    }
}

pub async fn serve(config: Config) -> Result<()> {
    // 加载模型；失败时直接退出，不提供服务
    let manager = ModelManager::load(config.clone())?;
    manager.health_check()?;
    std::fs::create_dir_all(&config.upload_dir)?;

    let app = create_app(AppState::new(manager));

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        RetinaError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{} ({} variant)", addr, config.variant);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /predict          - JSON base64 upload");
    tracing::info!("  POST /predict/upload   - Multipart file upload");
    tracing::info!("  GET  /results/:id      - Stored prediction lookup");
    tracing::info!("  GET  /advice/:level    - Advice level lookup");
    tracing::info!("  GET  /health           - Health check");
    tracing::info!("  GET  /api/info         - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        RetinaError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| RetinaError::Internal(format!("Server failed to start: {}", e)))?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let max_request_size = state.config().server_config.max_request_size;
    let request_timeout = Duration::from_secs(state.config().server_config.request_timeout);
    let upload_dir = state.config().upload_dir.clone();

    Router::new()
        .route("/predict", post(handlers::predict_json_handler))
        .route("/predict/upload", post(handlers::predict_upload_handler))
        .route("/results/:id", get(handlers::result_handler))
        .route("/advice/:level", get(handlers::advice_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .nest_service(UPLOAD_URL_PREFIX, ServeDir::new(upload_dir))
        .fallback(not_found_handler)
        .layer(axum::middleware::from_fn(middleware::request_logging))
        // Json/Multipart 提取器自带 2MB 上限，统一改为配置值
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查端点
async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.health_check())
        .await
        .map_err(|e| RetinaError::Internal(format!("Health check task failed: {}", e)))??;

    Ok(Json(json!({
        "status": "healthy",
        "variant": state.service.variant(),
        "stored_results": state.service.store().len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// 服务信息端点
async fn info_handler(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let stats = state.manager.get_stats();
    let range = state.service.variant().level_range();

    Json(json!({
        "service": "Retina Screening Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
        "levels": { "min": range.min, "max": range.max },
        "upload_url_prefix": UPLOAD_URL_PREFIX
    }))
}

async fn not_found_handler(RequestId(request_id): RequestId) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            "NOT_FOUND".to_string(),
            "No such endpoint".to_string(),
            request_id,
        )),
    )
}
