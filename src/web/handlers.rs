use crate::{
    image::ImageLoader,
    models::ModelVariant,
    prediction::{PredictionService, ResultRecord, Severity},
    utils::error::RetinaError,
    Result,
};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::extractors::{RequestId, ValidatedJson};
use super::AppState;

/// JSON请求体（base64模式）
#[derive(Debug, Deserialize)]
pub struct PredictJsonRequest {
    /// Base64编码的图像数据，可带 data URL 前缀
    pub image: String,
}

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, request_id: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }

    pub fn error(code: String, message: String, request_id: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError { code, message }),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id,
        }
    }
}

/// 提交成功后的响应：新 ID 与完整结果
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub id: String,
    pub result: Arc<ResultRecord>,
}

/// 结果查询响应
#[derive(Debug, Serialize)]
pub struct ResultLookup {
    pub id: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<ResultRecord>>,
}

/// 建议页面响应
#[derive(Debug, Serialize)]
pub struct AdviceResponse {
    pub requested: i64,
    pub level: u8,
    pub label: String,
}

/// JSON base64上传处理器
pub async fn predict_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ValidatedJson(request): ValidatedJson<PredictJsonRequest>,
) -> Result<Json<ApiResponse<PredictionResponse>>> {
    tracing::info!(
        "Processing JSON prediction request: request_id={}, payload={} chars",
        request_id,
        request.image.len()
    );

    let image = ImageLoader::from_base64(&request.image)?;
    let response = submit(state.service.clone(), image, &request_id).await?;

    Ok(Json(ApiResponse::success(response, request_id)))
}

/// Multipart文件上传处理器
pub async fn predict_upload_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PredictionResponse>>> {
    tracing::info!("Processing multipart prediction request: request_id={}", request_id);

    let mut image_data: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        RetinaError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        if field_name != "file" {
            tracing::debug!("Ignoring unknown field: {}", field_name);
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
                return Err(RetinaError::UnsupportedFormat(content_type.to_string()));
            }
        }

        let data = field.bytes().await.map_err(|e| {
            RetinaError::InvalidInput(format!("Failed to read file data: {}", e))
        })?;

        if data.is_empty() {
            return Err(RetinaError::InvalidInput("Empty file".to_string()));
        }

        tracing::debug!("Received file: {} bytes", data.len());
        image_data = Some(data);
    }

    let image_data =
        image_data.ok_or_else(|| RetinaError::InvalidInput("No image file provided".to_string()))?;

    let image = ImageLoader::from_bytes(&image_data)?;
    let response = submit(state.service.clone(), image, &request_id).await?;

    Ok(Json(ApiResponse::success(response, request_id)))
}

/// 推理放到阻塞线程池，避免占用异步工作线程
async fn submit(
    service: PredictionService,
    image: DynamicImage,
    request_id: &str,
) -> Result<PredictionResponse> {
    let start_time = Instant::now();

    let (id, result) = tokio::task::spawn_blocking(move || service.submit(image))
        .await
        .map_err(|e| RetinaError::Internal(format!("Prediction task failed: {}", e)))??;

    tracing::info!(
        "Prediction completed: request_id={}, id={}, level={}, time={:.3}s",
        request_id,
        id,
        result.level(),
        start_time.elapsed().as_secs_f32()
    );

    Ok(PredictionResponse { id, result })
}

/// 按 ID 查询结果；不存在时返回 404 与 `found: false`
pub async fn result_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    Path(id): Path<String>,
) -> Response {
    match state.service.get_result(&id) {
        Some(result) => {
            let lookup = ResultLookup {
                id,
                found: true,
                result: Some(result),
            };
            Json(ApiResponse::success(lookup, request_id)).into_response()
        }
        None => {
            tracing::info!("Result not found: id={}, request_id={}", id, request_id);
            let lookup = ResultLookup {
                id,
                found: false,
                result: None,
            };
            (StatusCode::NOT_FOUND, Json(lookup)).into_response()
        }
    }
}

/// 建议页面：请求等级钳制到当前变体的范围
pub async fn advice_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    Path(requested): Path<i64>,
) -> Json<ApiResponse<AdviceResponse>> {
    let level = state.service.advice_level(requested);
    let label = advice_label(state.service.variant(), level);

    tracing::debug!("Advice requested: {} -> {} ({})", requested, level, label);

    Json(ApiResponse::success(
        AdviceResponse {
            requested,
            level,
            label,
        },
        request_id,
    ))
}

fn advice_label(variant: ModelVariant, level: u8) -> String {
    match variant {
        ModelVariant::Classification => Severity::from_level(level)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| format!("Level {}", level)),
        ModelVariant::Regression => format!("Level {}", level),
    }
}
