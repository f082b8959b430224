use aide::OperationInput;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    RequestPartsExt,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};

use crate::{
    database::{AppState, DatabaseConnection},
    error::{ServiceError, ServiceResult},
    models::Session,
};

/// Per request database connection together with the session of the `Bearer` token, if any.
pub struct RequestState {
    pub db: DatabaseConnection,
    pub session: Option<Session>,
    pub app_state: AppState,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestState
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let mut db = app_state.connection().await?;

        let session = if let Ok(TypedHeader(Authorization(bearer))) =
            parts.extract::<TypedHeader<Authorization<Bearer>>>().await
        {
            db.get_session_by_token(bearer.token()).await?
        } else {
            None
        };

        Ok(Self {
            db,
            session,
            app_state,
        })
    }
}

impl RequestState {
    pub fn session_require(&self) -> ServiceResult<&Session> {
        self.session.as_ref().ok_or(ServiceError::Unauthorized(
            "Authentication credentials were not provided.",
        ))
    }
}

impl OperationInput for RequestState {}
