use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use service_core::error::AppError;

use crate::services::{Audience, Principal, ServiceError};
use crate::AppState;

/// Runs the full bearer check for `audience` against the request headers.
async fn authorize(
    parts: &Parts,
    state: &AppState,
    audience: Audience,
) -> Result<Principal, AppError> {
    let authorization = match parts.headers.get(header::AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::from(ServiceError::MalformedCredential))?,
        ),
        None => None,
    };

    Ok(state.authorizer.authorize(authorization, audience).await?)
}

/// A verified broker.
pub struct CurrentBroker(pub Principal);

/// A verified broker or client.
pub struct CurrentIdentity(pub Principal);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentBroker {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authorize(parts, state, Audience::Broker).await.map(Self)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authorize(parts, state, Audience::BrokerOrClient)
            .await
            .map(Self)
    }
}
