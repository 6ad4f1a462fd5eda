use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{RegisterBrokerRequest, RegisterClientRequest, VerifyEmailRequest},
    utils::ValidatedJson,
    AppState,
};

/// Register a broker. The response is the same whether the email was new or
/// belonged to an unconfirmed account.
pub async fn register_broker(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterBrokerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register_broker(req).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Register a client under the broker that issued the invite token.
pub async fn register_client(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.register_client(req).await?;
    Ok((StatusCode::OK, Json(res)))
}

/// Activate the account an email token was sent to.
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.verify_email(&req.email_token).await?;
    Ok((StatusCode::OK, Json(res)))
}
