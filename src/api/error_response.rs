//! HTTP error response handling for the API
//!
//! Converts pipeline errors into HTTP responses with matching status codes and JSON error
//! bodies.

use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

/// Bare `ApiError`s carry no status; they are answered with 500
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceStage;
    use std::time::Duration;

    async fn body_of(response: Response) -> ApiError {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn busy_is_conflict() {
        let response = Error::Busy.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_of(response).await.error.code, "pipeline_busy");
    }

    #[tokio::test]
    async fn poll_timeout_is_gateway_timeout_with_job_id() {
        let response = Error::PollTimeout {
            job_id: "job-7".into(),
            elapsed: Duration::from_secs(1800),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let api_error = body_of(response).await;
        assert_eq!(api_error.error.code, "poll_timeout");
        assert_eq!(api_error.error.details.unwrap()["job_id"], "job-7");
    }

    #[tokio::test]
    async fn group_failure_answers_with_its_cause() {
        let response = Error::GroupFailed {
            group: 2,
            job_id: Some("job-3".into()),
            source: Box::new(Error::Service {
                stage: ServiceStage::Fetch,
                status: 404,
                body: "gone".into(),
            }),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let api_error = body_of(response).await;
        assert_eq!(api_error.error.code, "service_error");
        let details = api_error.error.details.unwrap();
        assert_eq!(details["group"], 2);
        assert_eq!(details["job_id"], "job-3");
    }

    #[tokio::test]
    async fn bare_api_error_is_internal() {
        let response = ApiError::new("internal_error", "boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
