use aide::gen::GenContext;
use aide::openapi::{Operation, Response as ApiResponse};
use aide::{OperationInput, OperationOutput};
use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FieldErrors, ServiceError, ServiceResult};

/// Json body whose rejections are reported as `400 {"error": ...}`.
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Payload(value)),
            Err(rejection) => Err(ServiceError::BadRequest(rejection.body_text())),
        }
    }
}

impl<T: JsonSchema> OperationInput for Payload<T> {
    fn operation_input(ctx: &mut GenContext, operation: &mut Operation) {
        Json::<T>::operation_input(ctx, operation);
    }
}

/// Json response with status `201 Created`.
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self.0)).into_response()
    }
}

impl<T: JsonSchema> OperationOutput for Created<T> {
    type Inner = T;

    fn operation_response(ctx: &mut GenContext, operation: &mut Operation) -> Option<ApiResponse> {
        Json::<T>::operation_response(ctx, operation)
    }

    fn inferred_responses(
        ctx: &mut GenContext,
        operation: &mut Operation,
    ) -> Vec<(Option<u16>, ApiResponse)> {
        Self::operation_response(ctx, operation)
            .map(|response| vec![(Some(201), response)])
            .unwrap_or_default()
    }
}

/// Empty response with status `204 No Content`.
pub struct NoContent;

impl IntoResponse for NoContent {
    fn into_response(self) -> Response {
        StatusCode::NO_CONTENT.into_response()
    }
}

impl OperationOutput for NoContent {
    type Inner = ();
}

/// Raw file contents like images and pdfs.
pub struct FileResponse {
    pub content_type: String,
    pub disposition: Option<String>,
    pub data: Vec<u8>,
}

impl FileResponse {
    pub fn pdf(file_name: &str, data: Vec<u8>) -> Self {
        Self {
            content_type: "application/pdf".to_owned(),
            disposition: Some(format!("inline; filename=\"{file_name}\"")),
            data,
        }
    }
}

impl IntoResponse for FileResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(content_type) = HeaderValue::from_str(&self.content_type) {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        if let Some(disposition) = self.disposition {
            if let Ok(disposition) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, disposition);
            }
        }
        (StatusCode::OK, headers, self.data).into_response()
    }
}

impl OperationOutput for FileResponse {
    type Inner = Vec<u8>;
}

/// Value of a required query parameter, `{name} parameter is required` if missing or empty.
pub fn required_param<'a>(value: &'a Option<String>, name: &str) -> ServiceResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ServiceError::BadRequest(format!(
            "{name} parameter is required"
        ))),
    }
}

pub fn parse_date(value: &str) -> ServiceResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ServiceError::BadRequest("Invalid date format. Use YYYY-MM-DD".to_owned()))
}

/// Collects validation messages for incoming forms.
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn required_text(&mut self, field: &str, value: &str, max_length: usize) {
        if value.trim().is_empty() {
            self.errors.add(field, "This field may not be blank.");
        } else if value.chars().count() > max_length {
            self.errors.add(
                field,
                format!("Ensure this field has no more than {max_length} characters."),
            );
        }
    }

    pub fn max_length(&mut self, field: &str, value: &str, max_length: usize) {
        if value.chars().count() > max_length {
            self.errors.add(
                field,
                format!("Ensure this field has no more than {max_length} characters."),
            );
        }
    }

    /// Checks that `value` fits a `NUMERIC(digits, 2)` column and is not below `min`.
    pub fn amount(&mut self, field: &str, value: Decimal, digits: u32, min: Decimal, inclusive: bool) {
        if value.normalize().scale() > 2 {
            self.errors
                .add(field, "Ensure that there are no more than 2 decimal places.");
        }
        let integer_digits = value.abs().trunc().normalize().to_string().len() as u32;
        if value.abs() >= Decimal::ONE && integer_digits > digits - 2 {
            self.errors.add(
                field,
                format!("Ensure that there are no more than {digits} digits in total."),
            );
        }
        if (inclusive && value < min) || (!inclusive && value <= min) {
            let comparison = if inclusive { "greater than or equal to" } else { "greater than" };
            self.errors.add(
                field,
                format!("Ensure this value is {comparison} {min}."),
            );
        }
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    pub fn finish(self) -> ServiceResult<()> {
        self.errors.into_result()
    }
}
