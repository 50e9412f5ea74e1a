use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use yoyaku::domain::scheduling::SchedulingError;

/// APIのエラー応答
#[derive(Debug)]
pub enum ApiError {
    Scheduling(SchedulingError),
    /// `x-user-id` ヘッダーが無い
    Unauthenticated,
    BadRequest(String),
    NotFound(String),
}

impl From<SchedulingError> for ApiError {
    fn from(value: SchedulingError) -> Self {
        ApiError::Scheduling(value)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Scheduling(e) => match e {
                SchedulingError::Validation { .. } => StatusCode::BAD_REQUEST,
                SchedulingError::NotFound { .. } => StatusCode::NOT_FOUND,
                SchedulingError::Conflict => StatusCode::CONFLICT,
                SchedulingError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SchedulingError::Unauthorized => StatusCode::FORBIDDEN,
                SchedulingError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Scheduling(SchedulingError::TransientStore(e)) => {
                error!("ストレージエラー: {}", e);
                "Storage is temporarily unavailable".to_owned()
            }
            ApiError::Scheduling(e) => e.to_string(),
            ApiError::Unauthenticated => "Missing x-user-id header".to_owned(),
            ApiError::BadRequest(reason) | ApiError::NotFound(reason) => reason,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use yoyaku::domain::{scheduling::PolicyViolation, DataAccessError};

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (SchedulingError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                SchedulingError::NotFound {
                    entity: "booking",
                    id: 1,
                },
                StatusCode::NOT_FOUND,
            ),
            (SchedulingError::Conflict, StatusCode::CONFLICT),
            (
                PolicyViolation::NotYetEnded.into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SchedulingError::Unauthorized, StatusCode::FORBIDDEN),
            (
                DataAccessError::VersionConflict("x".to_owned()).into(),
                StatusCode::CONFLICT,
            ),
            (
                SchedulingError::TransientStore(DataAccessError::ReadError("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
        assert_eq!(
            ApiError::Unauthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
