//! Conversion of service failures into error envelopes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use service::{FieldErrors, ServiceError};
use tracing::{error, info};

use crate::response::meta;

/// Error returned by handlers and extractors.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// Request payload failed validation.
    Validation(FieldErrors),
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    MethodNotAllowed,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

fn field(name: &str, message: impl Into<String>) -> Value {
    json!({ name: [message.into()] })
}

impl ApiError {
    /// Status, message and optional `errors` object of the envelope.
    pub fn parts(&self) -> (StatusCode, String, Option<Value>) {
        match self {
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "The given data was invalid.".into(),
                Some(json!(errors)),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed for this endpoint.".into(),
                None,
            ),
            Self::Service(err) => service_parts(err),
        }
    }
}

fn service_parts(err: &ServiceError) -> (StatusCode, String, Option<Value>) {
    use ServiceError as E;

    let unprocessable = StatusCode::UNPROCESSABLE_ENTITY;
    match err {
        E::Validation(errors) => (unprocessable, "Validation failed".into(), Some(json!(errors))),
        E::EmailAlreadyExists => (
            unprocessable,
            "Validation failed".into(),
            Some(field("email", err.to_string())),
        ),
        E::InvalidCredentials => (
            unprocessable,
            "Invalid credentials".into(),
            Some(field("email", err.to_string())),
        ),
        E::EmailNotVerified(email) => (
            unprocessable,
            "Please verify your email address before logging in. Check your inbox for the verification link.".into(),
            Some(json!({ "email_verified": false, "email": email })),
        ),
        E::DuplicateSku => (
            unprocessable,
            "Validation failed".into(),
            Some(field("sku", err.to_string())),
        ),
        E::DuplicateSlug => (
            unprocessable,
            "Validation failed".into(),
            Some(field("slug", err.to_string())),
        ),
        E::Unauthenticated => (
            StatusCode::UNAUTHORIZED,
            "Unauthenticated. Please login to continue.".into(),
            None,
        ),
        E::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
        E::UserNotFound
        | E::ProductNotFound
        | E::CategoryNotFound
        | E::OrderNotFound
        | E::PaymentNotFound => (StatusCode::NOT_FOUND, err.to_string(), None),
        E::EmptyCart
        | E::InsufficientStock { .. }
        | E::OrderCannotBeCancelled { .. }
        | E::OrderAlreadyPaid => (unprocessable, err.to_string(), None),
        E::PaymentFailed(_) | E::InvalidVerificationToken | E::EmailAlreadyVerified => {
            (StatusCode::BAD_REQUEST, err.to_string(), None)
        }
        E::Db(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "A database error occurred.".into(),
            None,
        ),
        E::Unexpected(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred.".into(),
            None,
        ),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, errors) = self.parts();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            info!(status = status.as_u16(), message = %message, "Request rejected");
        }

        let mut body = json!({ "success": false, "message": message });
        if let Some(errors) = errors {
            body["errors"] = errors;
        }
        body["meta"] = Value::Object(meta());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::OrderStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::EmailAlreadyExists, 422),
            (ServiceError::InvalidCredentials, 422),
            (ServiceError::Unauthenticated, 401),
            (ServiceError::Forbidden("no".into()), 403),
            (ServiceError::OrderNotFound, 404),
            (ServiceError::EmptyCart, 422),
            (ServiceError::OrderAlreadyPaid, 422),
            (ServiceError::PaymentFailed("x".into()), 400),
            (ServiceError::EmailAlreadyVerified, 400),
            (ServiceError::Unexpected("boom".into()), 500),
            (
                ServiceError::OrderCannotBeCancelled {
                    order_id: 1,
                    order_number: "ORD-1".into(),
                    status: OrderStatus::Shipped,
                },
                422,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).parts().0.as_u16(), status);
        }
    }

    #[test]
    fn test_field_errors_are_attached() {
        let (_, message, errors) = ApiError::from(ServiceError::DuplicateSku).parts();
        assert_eq!(message, "Validation failed");
        assert_eq!(errors, Some(json!({ "sku": ["The sku has already been taken."] })));

        let (_, _, errors) = ApiError::from(ServiceError::EmailNotVerified("a@b.c".into())).parts();
        assert_eq!(errors, Some(json!({ "email_verified": false, "email": "a@b.c" })));
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (status, message, errors) =
            ApiError::from(ServiceError::Unexpected("secret detail".into())).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "An unexpected error occurred.");
        assert!(errors.is_none());
    }
}
