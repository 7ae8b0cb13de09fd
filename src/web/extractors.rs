use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

/// 验证的JSON提取器
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: for<'de> Deserialize<'de> + Validate,
    S: Send + Sync,
{
    type Rejection = ValidationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| ValidationError::JsonParse(err.body_text()))?;

        value
            .validate()
            .map_err(|err| ValidationError::Validation(err.to_string()))?;

        Ok(ValidatedJson(value))
    }
}

/// 验证trait
pub trait Validate {
    type Error: std::fmt::Display;

    fn validate(&self) -> Result<(), Self::Error>;
}

/// 验证错误类型
#[derive(Debug)]
pub enum ValidationError {
    JsonParse(String),
    Validation(String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "VALIDATION_ERROR",
                "message": self.to_string()
            }
        });

        tracing::warn!("Rejected request: {}", self);
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::JsonParse(msg) => write!(f, "JSON parse error: {}", msg),
            ValidationError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl Validate for crate::web::handlers::PredictJsonRequest {
    type Error = String;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.image.trim().is_empty() {
            return Err("Image data cannot be empty".to_string());
        }
        Ok(())
    }
}

/// 请求ID提取器：优先使用 `X-Request-ID` 头，否则生成新的 UUID
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("X-Request-ID")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RequestId(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::handlers::PredictJsonRequest;
    use axum::body::Body;

    #[tokio::test]
    async fn request_id_prefers_header() {
        let req = axum::http::Request::builder()
            .header("X-Request-ID", "abc-123")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();

        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "abc-123");
    }

    #[tokio::test]
    async fn empty_image_fails_validation() {
        let req = axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"image":"   "}"#))
            .unwrap();

        let result = ValidatedJson::<PredictJsonRequest>::from_request(req, &()).await;
        assert!(matches!(result, Err(ValidationError::Validation(_))));
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let req = axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let result = ValidatedJson::<PredictJsonRequest>::from_request(req, &()).await;
        match result {
            Err(err @ ValidationError::JsonParse(_)) => {
                assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST)
            }
            _ => panic!("expected a JSON parse error"),
        }
    }
}
