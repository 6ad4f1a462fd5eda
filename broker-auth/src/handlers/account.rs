use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        account::{AccountCredentialsRequest, SetPermissionRequest},
        MessageResponse,
    },
    middleware::{CurrentBroker, CurrentIdentity},
    utils::ValidatedJson,
    AppState,
};

/// Open a service account. Every existing client gets a disabled permission.
pub async fn create_account(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
    Path(service_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AccountCredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .accounts
        .create(&broker.identity, service_id, req)
        .await?;
    Ok((StatusCode::OK, Json(account)))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    CurrentIdentity(principal): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    let accounts = state.accounts.list(&principal).await?;
    Ok((StatusCode::OK, Json(accounts)))
}

pub async fn get_account(
    State(state): State<AppState>,
    CurrentIdentity(principal): CurrentIdentity,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.accounts.get(&principal, account_id).await?;
    Ok((StatusCode::OK, Json(account)))
}

/// Replace the account's credentials. Owner only.
pub async fn update_account(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
    Path(account_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AccountCredentialsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .accounts
        .update(&broker.identity, account_id, req)
        .await?;
    Ok((StatusCode::OK, Json(account)))
}

pub async fn delete_account(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
    Path(account_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.accounts.delete(&broker.identity, account_id).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Service account deleted"))))
}

/// Enable or disable trading for one client on one of the broker's accounts.
pub async fn set_permission(
    State(state): State<AppState>,
    CurrentBroker(broker): CurrentBroker,
    Path((account_id, client_id)): Path<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<SetPermissionRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .permissions
        .set_can_trade(broker.identity.id, account_id, client_id, req.can_trade)
        .await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Permission updated"))))
}
