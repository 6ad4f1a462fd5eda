use broker_auth::{
    build_router,
    config::{AuthConfig, Environment},
    db::{create_pool, run_migrations, PgStore},
    services::{RedisRevocationStore, SmtpEmailService},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_tracing, LogFormat};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    let log_format = match config.environment {
        Environment::Prod => LogFormat::Json,
        Environment::Dev => LogFormat::Pretty,
    };
    init_tracing(&config.service_name, &config.log_level, log_format)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to init tracing: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting broker auth service"
    );

    tracing::info!("Initializing database connections");
    let pool = create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    let store = PgStore::new(
        pool,
        Duration::from_secs(config.database.connect_retry_seconds),
    );
    tracing::info!("Database initialized successfully");

    let revocations = RedisRevocationStore::new(&config.redis)
        .await
        .map_err(AppError::InternalError)?;
    tracing::info!("Revocation store initialized");

    let email = SmtpEmailService::new(&config.smtp)?;
    tracing::info!("Email service initialized");

    let state = AppState::new(
        config.clone(),
        Arc::new(store),
        Arc::new(revocations),
        Arc::new(email),
    );
    let app = build_router(state);

    let addr = SocketAddr::new(config.common.host, config.common.port);
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let grace = Duration::from_secs(config.common.shutdown_grace_seconds);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(grace))
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Load balancers get the grace period to stop routing here before draining
    tokio::time::sleep(grace).await;
}
