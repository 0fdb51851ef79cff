//! HTTP mapping of the core error taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gridpulse_core::error::GridPulseError;

/// Wrapper turning a `GridPulseError` into a JSON error response.
pub struct ApiError(pub GridPulseError);

impl From<GridPulseError> for ApiError {
    fn from(e: GridPulseError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GridPulseError::Validation(_) => StatusCode::BAD_REQUEST,
            GridPulseError::NotFound(_) => StatusCode::NOT_FOUND,
            GridPulseError::Conflict(_) => StatusCode::CONFLICT,
            GridPulseError::Unavailable(_) | GridPulseError::ApiKeyMissing(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GridPulseError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "ok": false,
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GridPulseError::Validation("x".into()), 400),
            (GridPulseError::NotFound("x".into()), 404),
            (GridPulseError::Conflict("x".into()), 409),
            (GridPulseError::Unavailable("x".into()), 503),
            (GridPulseError::ApiKeyMissing("openai".into()), 503),
            (GridPulseError::Http("x".into()), 502),
            (GridPulseError::Execution("x".into()), 500),
            (GridPulseError::Database("x".into()), 500),
        ];
        for (err, code) in cases {
            let resp = ApiError(err).into_response();
            assert_eq!(resp.status().as_u16(), code);
        }
    }
}
