use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{middleware::CurrentBroker, AppState};

/// Issue an invite link clients register through.
pub async fn invite_client(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
) -> Result<impl IntoResponse, AppError> {
    let res = state.auth.invite_client(&broker.identity)?;
    Ok((StatusCode::OK, Json(res)))
}

/// The broker's clients with their permission rows.
pub async fn list_clients(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
) -> Result<impl IntoResponse, AppError> {
    let clients = state.accounts.list_clients(&broker.identity).await?;
    Ok((StatusCode::OK, Json(clients)))
}
