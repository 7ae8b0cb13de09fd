use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetinaError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Image preprocessing failed: {0}")]
    Preprocess(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Training data error: {0}")]
    TrainingData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl RetinaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RetinaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RetinaError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            RetinaError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RetinaError::Base64(_) => StatusCode::BAD_REQUEST,
            RetinaError::Json(_) => StatusCode::BAD_REQUEST,
            RetinaError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RetinaError::Preprocess(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RetinaError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RetinaError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            RetinaError::Preprocess(_) => "PREPROCESS_ERROR",
            RetinaError::Inference(_) => "INFERENCE_ERROR",
            RetinaError::InvalidInput(_) => "INVALID_INPUT",
            RetinaError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            RetinaError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            RetinaError::TrainingData(_) => "TRAINING_DATA_ERROR",
            RetinaError::Config(_) => "CONFIG_ERROR",
            RetinaError::Io(_) => "IO_ERROR",
            RetinaError::Json(_) => "JSON_ERROR",
            RetinaError::Base64(_) => "BASE64_DECODE_ERROR",
            RetinaError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            RetinaError::Ort(_) => "ORT_ERROR",
            RetinaError::Candle(_) => "TENSOR_ERROR",
            RetinaError::Csv(_) => "CSV_ERROR",
            RetinaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for RetinaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });

        tracing::error!("Request failed: {} ({})", self, status);

        (status, axum::Json(error_response)).into_response()
    }
}
