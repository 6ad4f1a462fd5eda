use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, RefreshRequest},
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password. Clients also send their public key.
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.login(req).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Exchange a refresh token for a new pair. The old refresh token is revoked.
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.refresh(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(res)))
}

pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.logout(&req.refresh_token).await?;
    Ok((StatusCode::OK, Json(res)))
}
