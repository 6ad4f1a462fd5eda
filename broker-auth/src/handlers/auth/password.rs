use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{PasswordResetConfirm, PasswordResetRequest},
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset link. Always acknowledged.
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.request_password_reset(req).await?;
    Ok((StatusCode::OK, Json(res)))
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.confirm_password_reset(req).await?;
    Ok((StatusCode::OK, Json(res)))
}
