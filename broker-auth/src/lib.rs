pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, patch, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    handle_timeout_error, metrics_middleware, request_id_middleware, REQUEST_ID_HEADER,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AuthConfig;
use crate::db::Store;
use crate::services::{
    AccountService, AuthService, Authorizer, EmailProvider, Linker, PermissionEngine,
    RevocationStore, TokenSigner,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn Store>,
    pub revocations: Arc<dyn RevocationStore>,
    pub authorizer: Authorizer,
    pub auth: AuthService,
    pub permissions: PermissionEngine,
    pub accounts: AccountService,
}

impl AppState {
    /// Wires the services on top of the three external collaborators.
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn Store>,
        revocations: Arc<dyn RevocationStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Self {
        let signer = TokenSigner::new(&config.jwt);
        let authorizer = Authorizer::new(signer.clone(), revocations.clone(), store.clone());
        let permissions = PermissionEngine::new(store.clone());
        let accounts = AccountService::new(store.clone(), permissions.clone());
        let auth = AuthService::new(
            store.clone(),
            signer,
            authorizer.clone(),
            revocations.clone(),
            email,
            Linker::new(&config.frontend.base_url),
            config.redis.cache_ttl_seconds,
        );

        Self {
            config,
            store,
            revocations,
            authorizer,
            auth,
            permissions,
            accounts,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/brokers/register", post(handlers::register_broker))
        .route("/users/register", post(handlers::register_client))
        .route("/verify-email", patch(handlers::verify_email))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/logout", post(handlers::logout))
        .route("/reset-password", post(handlers::request_password_reset))
        .route(
            "/reset-password/confirm",
            patch(handlers::confirm_password_reset),
        );

    let broker_routes = Router::new()
        .route("/users/invite", post(handlers::invite_client))
        .route("/users", get(handlers::list_clients))
        .route(
            "/services/:service_id/accounts",
            post(handlers::create_account),
        )
        .route("/accounts", get(handlers::list_accounts))
        .route(
            "/accounts/:account_id",
            get(handlers::get_account)
                .patch(handlers::update_account)
                .delete(handlers::delete_account),
        )
        .route(
            "/accounts/:account_id/permissions/:client_id",
            patch(handlers::set_permission),
        );

    let timeout = Duration::from_secs(state.config.security.request_timeout_seconds);
    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(broker_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(timeout),
        )
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

/// `*` opens CORS to any origin.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}

/// Checks the relational store and the revocation store.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::DatabaseError(anyhow::anyhow!(e))
    })?;

    state.revocations.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Revocation store health check failed");
        AppError::InternalError(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "revocations": "up"
        }
    })))
}
