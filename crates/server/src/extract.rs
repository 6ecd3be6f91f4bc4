//! Request extractors: bearer authentication and validated JSON bodies.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use service::{Authenticated, FieldErrors, RequestContext, ServiceError};
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::ApiError;
use crate::state::AppState;

/// The caller identified by the `Authorization: Bearer` header.
pub struct AuthUser(pub Authenticated);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(ServiceError::Unauthenticated)?;

        let auth = state.auth.resolve(bearer).await?;
        if let Some(ctx) = RequestContext::current() {
            ctx.set_user(auth.user.id);
        }
        Ok(Self(auth))
    }
}

/// Numeric `{id}` path segment. Anything else is answered with 404.
pub struct Id(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for Id {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::NotFound(NOT_FOUND.into()))?;
        Ok(Self(id))
    }
}

pub const NOT_FOUND: &str = "The requested resource was not found.";

/// JSON body deserialized into `T` and checked with its `Validate` rules.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        value
            .validate()
            .map_err(|errors| ApiError::Validation(field_errors(&errors)))?;
        Ok(Self(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::JsonDataError(err) => {
            let mut errors = FieldErrors::new();
            errors.insert("body".into(), vec![err.body_text()]);
            ApiError::Validation(errors)
        }
        other => ApiError::BadRequest(other.body_text()),
    }
}

/// Flattens nested validator errors into `{"shipping_address.city": [..]}`.
///
/// Struct-level (schema) errors are keyed by their error code.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut out = FieldErrors::new();
    collect("", errors, &mut out);
    out
}

fn collect(prefix: &str, errors: &ValidationErrors, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = join(prefix, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let key = if *field == "__all__" {
                        join(prefix, &error.code)
                    } else {
                        path.clone()
                    };
                    let message = message_for(&key, error);
                    out.entry(key).or_default().push(message);
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(&format!("{path}.{index}"), inner, out);
                }
            }
        }
    }
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn message_for(field: &str, error: &ValidationError) -> String {
    match &error.message {
        Some(message) => message.to_string(),
        None => format!("The {field} field is invalid."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Line {
        #[validate(range(min = 1, message = "Quantity must be at least 1."))]
        quantity: i32,
    }

    #[derive(Debug, Deserialize, Validate)]
    struct Cart {
        #[validate(length(max = 5))]
        note: String,
        #[validate]
        lines: Vec<Line>,
    }

    #[test]
    fn test_nested_errors_are_flattened() {
        let cart = Cart {
            note: "too long".into(),
            lines: vec![Line { quantity: 2 }, Line { quantity: 0 }],
        };
        let errors = field_errors(&cart.validate().unwrap_err());

        assert_eq!(errors["note"], vec!["The note field is invalid.".to_string()]);
        assert_eq!(
            errors["lines.1.quantity"],
            vec!["Quantity must be at least 1.".to_string()]
        );
        assert!(!errors.contains_key("lines.0.quantity"));
    }
}
