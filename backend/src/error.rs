//! HTTP-facing error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mesai_common::ValidationError;
use serde_json::json;

use crate::provider::ProviderError;
use crate::session::SignUpError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    SignUp(#[from] SignUpError),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not signed in")]
    Unauthenticated,
}

impl Error {
    /// Sign-in rejections (400/401 from the provider) are bad credentials.
    pub fn from_sign_in(err: ProviderError) -> Self {
        match err {
            ProviderError::Api {
                status: 400 | 401,
                message,
                ..
            } => Error::InvalidCredentials(message),
            other => Error::Provider(other),
        }
    }
}

fn provider_status(err: &ProviderError) -> (StatusCode, &'static str) {
    match err {
        ProviderError::Api { status: 403, .. } => (StatusCode::FORBIDDEN, "forbidden"),
        ProviderError::MissingServiceKey => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        _ => (StatusCode::BAD_GATEWAY, "provider_error"),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Provider(err) => provider_status(err),
            Error::SignUp(SignUpError::Provider(ProviderError::Api {
                status: 400 | 422,
                ..
            })) => (StatusCode::BAD_REQUEST, "sign_up_rejected"),
            Error::SignUp(SignUpError::Provider(err)) => provider_status(err),
            Error::SignUp(SignUpError::UserNotCreated) => (StatusCode::BAD_GATEWAY, "provider_error"),
            Error::SignUp(SignUpError::PartialInconsistency { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "partial_inconsistency")
            }
            Error::InvalidCredentials(_) => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api(status: u16) -> ProviderError {
        ProviderError::Api {
            status,
            code: None,
            message: "rejected".to_string(),
        }
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = Error::from(ValidationError::InvalidHours).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_sign_in_rejection_is_invalid_credentials() {
        assert!(matches!(Error::from_sign_in(api(400)), Error::InvalidCredentials(_)));
        assert!(matches!(Error::from_sign_in(api(401)), Error::InvalidCredentials(_)));
        assert!(matches!(Error::from_sign_in(api(500)), Error::Provider(_)));
        assert_eq!(
            Error::from_sign_in(api(400)).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[rstest]
    #[case(api(403), StatusCode::FORBIDDEN)]
    #[case(api(404), StatusCode::BAD_GATEWAY)]
    #[case(api(500), StatusCode::BAD_GATEWAY)]
    #[case(ProviderError::Network("refused".to_string()), StatusCode::BAD_GATEWAY)]
    #[case(ProviderError::InvalidResponse("bad row".to_string()), StatusCode::BAD_GATEWAY)]
    #[case(ProviderError::MissingServiceKey, StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_provider_status_mapping(#[case] err: ProviderError, #[case] expected: StatusCode) {
        assert_eq!(Error::from(err).into_response().status(), expected);
    }

    #[test]
    fn test_partial_inconsistency_is_server_error() {
        let err = Error::from(SignUpError::PartialInconsistency {
            user_id: "u1".to_string(),
            source: api(500),
            rolled_back: false,
        });
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rejected_sign_up_is_bad_request() {
        let err = Error::from(SignUpError::Provider(api(422)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
