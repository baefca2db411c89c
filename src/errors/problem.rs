//! Problem details (RFC 7807) rendering for rejected calls

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::IntakeError;

const PROBLEM_TYPE_BASE: &str = "urn:petition-intake:problem:";

/// Structured error body returned to rejected callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    /// Always present in the body; `null` when the caller named no instance
    pub instance: Option<String>,

    /// Carried as a header, not in the body
    #[serde(skip)]
    pub retry_after: Option<u64>,
}

impl ProblemDetails {
    /// Build the problem body for an error, optionally naming the instance
    pub fn from_error(err: &IntakeError, instance: Option<String>) -> Self {
        let status = err.status_code();
        Self {
            problem_type: format!("{}{}", PROBLEM_TYPE_BASE, err.code()),
            title: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            status: status.as_u16(),
            detail: err.to_string(),
            instance,
            retry_after: err.retry_after(),
        }
    }
}

impl From<&IntakeError> for ProblemDetails {
    fn from(err: &IntakeError) -> Self {
        Self::from_error(err, None)
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.status)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        ProblemDetails::from(&self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_problem_body_fields() {
        let err = IntakeError::QueueOverflow {
            depth: 10_000,
            threshold: 10_000,
            retry_after_secs: 60,
        };
        let problem = ProblemDetails::from_error(&err, Some("/petitions".to_string()));
        assert_eq!(problem.problem_type, "urn:petition-intake:problem:queue-overflow");
        assert_eq!(problem.status, 503);
        assert_eq!(problem.title, "Service Unavailable");
        assert_eq!(problem.retry_after, Some(60));

        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "urn:petition-intake:problem:queue-overflow");
        assert_eq!(json["instance"], "/petitions");
        assert!(json.get("retry_after").is_none());
    }

    #[test]
    fn test_instance_serialized_even_when_unnamed() {
        let problem = ProblemDetails::from(&IntakeError::NotFound("petition x".into()));
        let json = serde_json::to_value(&problem).unwrap();
        let body = json.as_object().unwrap();
        for field in ["type", "title", "status", "detail", "instance"] {
            assert!(body.contains_key(field), "missing {field}");
        }
        assert!(json["instance"].is_null());
    }

    #[test]
    fn test_response_carries_retry_after_header() {
        let err = IntakeError::SystemHalted {
            retry_after_secs: 45,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "45");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }

    #[test]
    fn test_no_retry_after_for_permanent_errors() {
        let err = IntakeError::NotFound("petition x".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
