use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    BadRequest(String),
    /// Operation is illegal for the session's current status.
    InvalidState(String),
    /// Capability requires a patient consent that has not been granted.
    ConsentRequired(String),
    /// Capability was explicitly denied by the patient.
    ConsentDenied(String),
    /// The feature toggle for this capability is off on the session.
    FeatureDisabled(String),
    /// A runtime precondition (e.g. a live doctor connection) is missing.
    PreconditionFailed(String),
    /// A join link or consent record is past its expiry.
    Expired(String),
    /// Stored ciphertext could not be decrypted. Distinct from NotFound so
    /// key-rotation bugs are visible to operators.
    DecryptionFailed(String),
    /// Delivery to a connected participant failed.
    TransportFailure(String),
    InternalServerError(anyhow::Error),
    Validation(Vec<String>),
}

impl AppError {
    /// Machine-readable kind, also used as the `code` field of the response.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::ConsentRequired(_) => "CONSENT_REQUIRED",
            AppError::ConsentDenied(_) => "CONSENT_DENIED",
            AppError::FeatureDisabled(_) => "FEATURE_DISABLED",
            AppError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            AppError::Expired(_) => "EXPIRED",
            AppError::DecryptionFailed(_) => "DECRYPTION_FAILED",
            AppError::TransportFailure(_) => "TRANSPORT_FAILURE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// Caller-visible message; internal failures stay opaque.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::InvalidState(msg)
            | AppError::ConsentRequired(msg)
            | AppError::ConsentDenied(msg)
            | AppError::FeatureDisabled(msg)
            | AppError::PreconditionFailed(msg)
            | AppError::Expired(msg)
            | AppError::DecryptionFailed(msg)
            | AppError::TransportFailure(msg) => msg.clone(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            AppError::Validation(_) => "Validation failed".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code().to_string();
        let (status, error_message, details) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::InvalidState(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::ConsentRequired(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::ConsentDenied(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::FeatureDisabled(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::PreconditionFailed(msg) => (StatusCode::PRECONDITION_FAILED, msg, None),
            AppError::Expired(msg) => (StatusCode::GONE, msg, None),
            AppError::DecryptionFailed(msg) => {
                tracing::error!("Decryption failure: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
            AppError::TransportFailure(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                Some(serde_json::json!({ "errors": errors })),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code,
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::InternalServerError(err.into()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let code = e.code.as_ref();
                    format!("{}: {}", field, code)
                })
            })
            .collect();
        AppError::Validation(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn app_error_into_response_maps_status_and_body() {
        let response = AppError::InvalidState("cannot start".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = response_json(response).await;
        assert_eq!(json["error"], "cannot start");
        assert_eq!(json["code"], "INVALID_STATE");

        let response = AppError::ConsentRequired("consent missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = response_json(response).await;
        assert_eq!(json["code"], "CONSENT_REQUIRED");

        let response = AppError::FeatureDisabled("chat off".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = response_json(response).await;
        assert_eq!(json["code"], "FEATURE_DISABLED");

        let response = AppError::PreconditionFailed("no doctor".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        let json = response_json(response).await;
        assert_eq!(json["code"], "PRECONDITION_FAILED");

        let response = AppError::Expired("link expired".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
        let json = response_json(response).await;
        assert_eq!(json["code"], "EXPIRED");

        let response = AppError::NotFound("missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_json(response).await;
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn decryption_failure_is_distinct_from_not_found() {
        let response = AppError::DecryptionFailed("bad envelope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["code"], "DECRYPTION_FAILED");
        assert_ne!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn app_error_validation_includes_details() {
        let response = AppError::Validation(vec!["field: invalid".to_string()]).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Validation failed");
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["details"]["errors"][0], "field: invalid");
    }

    #[tokio::test]
    async fn app_error_internal_maps_to_generic_message() {
        let response = AppError::InternalServerError(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert_eq!(json["code"], "INTERNAL_SERVER_ERROR");
        assert!(json["details"].is_null());
    }
}
