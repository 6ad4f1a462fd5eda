use axum::BoxError;

use crate::error::AppError;

/// Error handler for `tower::timeout` placed behind `HandleErrorLayer`.
pub async fn handle_timeout_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("Request exceeded its deadline");
        AppError::Timeout
    } else {
        AppError::InternalError(anyhow::anyhow!("Unhandled middleware error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn elapsed_becomes_timeout() {
        let err: BoxError = Box::new(tower::timeout::error::Elapsed::new());
        let app_err = handle_timeout_error(err).await;
        assert_eq!(app_err.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn other_errors_are_internal() {
        let err: BoxError = "boom".into();
        let app_err = handle_timeout_error(err).await;
        assert_eq!(app_err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
