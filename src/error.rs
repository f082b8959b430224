use std::collections::BTreeMap;

use aide::OperationOutput;
use axum::{http::StatusCode, response::IntoResponse, Json};
use schemars::JsonSchema;
use serde_json::{json, Value};

use crate::sunat::SunatError;

/// Represent errors in the application
///
/// All `ServiceError`s can be transformed to http errors.
#[derive(Debug, Clone, JsonSchema)]
pub enum ServiceError {
    InternalServerError(String),
    BadRequest(String),
    /// 400 with an explanation and additional context merged into the body
    BadRequestWith(String, Value),
    InvalidFields(FieldErrors),
    Unauthorized(&'static str),
    NotFound,
    /// 404 with an explanation and additional context merged into the body
    NotFoundWith(String, Value),
    Conflict(String),
    BadGateway(String),
}

/// Per field validation messages, rendered as `{"field": ["message"]}`.
#[derive(Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Turns collected messages into an error, or `Ok` if nothing was collected.
    pub fn into_result(self) -> ServiceResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::InvalidFields(self))
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for ServiceError {}

/// Helper for `ServiceError` result
pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<sqlx::Error> for ServiceError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_error) = value {
            // foreign key violation, the row is still referenced
            if db_error.code().as_deref() == Some("23503") {
                return ServiceError::Conflict(
                    "The object is still referenced by other objects".to_owned(),
                );
            }
        }
        ServiceError::InternalServerError(value.to_string())
    }
}

impl From<SunatError> for ServiceError {
    fn from(value: SunatError) -> Self {
        match value {
            SunatError::MissingCredentials => {
                ServiceError::InternalServerError(value.to_string())
            }
            SunatError::Rejected(ref details) => ServiceError::BadRequestWith(
                value.to_string(),
                json!({ "details": details }),
            ),
            _ => ServiceError::BadGateway(value.to_string()),
        }
    }
}

fn with_context(cause: &str, context: &Value) -> Value {
    let mut body = json!({ "error": cause });
    if let (Some(body), Value::Object(context)) = (body.as_object_mut(), context) {
        for (key, value) in context {
            body.insert(key.to_owned(), value.to_owned());
        }
    }
    body
}

impl OperationOutput for ServiceError {
    type Inner = String;
}
impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ServiceError::InternalServerError(ref cause) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": cause })),
            ),
            ServiceError::BadRequest(ref cause) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": cause })))
            }
            ServiceError::BadRequestWith(ref cause, ref context) => {
                (StatusCode::BAD_REQUEST, Json(with_context(cause, context)))
            }
            ServiceError::InvalidFields(ref fields) => {
                (StatusCode::BAD_REQUEST, Json(json!(fields.0)))
            }
            ServiceError::Unauthorized(cause) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "detail": cause })))
            }
            ServiceError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": "Not found",
                })),
            ),
            ServiceError::NotFoundWith(ref cause, ref context) => {
                (StatusCode::NOT_FOUND, Json(with_context(cause, context)))
            }
            ServiceError::Conflict(ref cause) => {
                (StatusCode::CONFLICT, Json(json!({ "error": cause })))
            }
            ServiceError::BadGateway(ref cause) => {
                (StatusCode::BAD_GATEWAY, Json(json!({ "error": cause })))
            }
        }
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_collect() {
        let mut errors = FieldErrors::default();
        assert!(errors.clone().into_result().is_ok());

        errors.add("name", "This field may not be blank.");
        errors.add("name", "Ensure this field has no more than 255 characters.");
        errors.add("price", "A valid number is required.");

        assert_eq!(errors.0["name"].len(), 2);
        assert!(matches!(
            errors.into_result(),
            Err(ServiceError::InvalidFields(_))
        ));
    }

    #[test]
    fn test_status_codes() {
        let cases = vec![
            (ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized("x"), StatusCode::UNAUTHORIZED),
            (ServiceError::NotFound, StatusCode::NOT_FOUND),
            (
                ServiceError::NotFoundWith("x".into(), json!({"document": null})),
                StatusCode::NOT_FOUND,
            ),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (ServiceError::BadGateway("x".into()), StatusCode::BAD_GATEWAY),
            (
                ServiceError::InternalServerError("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_sunat_error_mapping() {
        assert!(matches!(
            ServiceError::from(SunatError::MissingCredentials),
            ServiceError::InternalServerError(_)
        ));
        assert!(matches!(
            ServiceError::from(SunatError::InvalidResponse("x".into())),
            ServiceError::BadGateway(_)
        ));

        let error = ServiceError::from(SunatError::Rejected(json!({"message": "bad ruc"})));
        let ServiceError::BadRequestWith(cause, context) = error else {
            panic!("expected a bad request");
        };
        assert_eq!(cause, "Sunat API returned an error");
        assert_eq!(with_context(&cause, &context)["details"]["message"], "bad ruc");
    }
}
