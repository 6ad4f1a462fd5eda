use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

use crate::db::StoreError;
use crate::models::TokenType;

/// Stable, client-visible error names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingCredential,
    MalformedCredential,
    InvalidCredential,
    WrongTokenType,
    CredentialRevoked,
    InsufficientPermission,
    OwnerNotFound,
    DuplicateIdentity,
    DuplicateAccount,
    EmailTaken,
    InvalidCredentials,
    AccountNotActive,
    NotFound,
    ValidationError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => "MissingCredential",
            ErrorKind::MalformedCredential => "MalformedCredential",
            ErrorKind::InvalidCredential => "InvalidCredential",
            ErrorKind::WrongTokenType => "WrongTokenType",
            ErrorKind::CredentialRevoked => "CredentialRevoked",
            ErrorKind::InsufficientPermission => "InsufficientPermission",
            ErrorKind::OwnerNotFound => "OwnerNotFound",
            ErrorKind::DuplicateIdentity => "DuplicateIdentity",
            ErrorKind::DuplicateAccount => "DuplicateAccount",
            ErrorKind::EmailTaken => "EmailTaken",
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::AccountNotActive => "AccountNotActive",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::InternalError => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::MissingCredential | ErrorKind::MalformedCredential => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidCredential
            | ErrorKind::WrongTokenType
            | ErrorKind::CredentialRevoked
            | ErrorKind::InsufficientPermission
            | ErrorKind::OwnerNotFound => StatusCode::FORBIDDEN,
            ErrorKind::DuplicateIdentity
            | ErrorKind::EmailTaken
            | ErrorKind::InvalidCredentials
            | ErrorKind::AccountNotActive => StatusCode::UNAUTHORIZED,
            ErrorKind::DuplicateAccount => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Authorization header is missing")]
    MissingCredential,

    #[error("Authorization header must use the Bearer scheme")]
    MalformedCredential,

    #[error("Token is invalid or expired")]
    InvalidCredential,

    #[error("Expected a token of type {expected}")]
    WrongTokenType { expected: TokenType },

    #[error("Token has been revoked")]
    CredentialRevoked,

    #[error("Insufficient permission")]
    InsufficientPermission,

    #[error("Token owner no longer exists")]
    OwnerNotFound,

    #[error("An identity with this {field} already exists")]
    DuplicateIdentity { field: String },

    #[error("A service account for this service already exists")]
    DuplicateAccount,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Email or password is incorrect")]
    InvalidCredentials,

    #[error("Account is not activated")]
    AccountNotActive,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Revocation store error: {0}")]
    Cache(anyhow::Error),

    #[error("Email delivery failed: {0}")]
    Mail(AppError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::MissingCredential => ErrorKind::MissingCredential,
            ServiceError::MalformedCredential => ErrorKind::MalformedCredential,
            ServiceError::InvalidCredential => ErrorKind::InvalidCredential,
            ServiceError::WrongTokenType { .. } => ErrorKind::WrongTokenType,
            ServiceError::CredentialRevoked => ErrorKind::CredentialRevoked,
            ServiceError::InsufficientPermission => ErrorKind::InsufficientPermission,
            ServiceError::OwnerNotFound => ErrorKind::OwnerNotFound,
            ServiceError::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
            ServiceError::DuplicateAccount => ErrorKind::DuplicateAccount,
            ServiceError::EmailTaken => ErrorKind::EmailTaken,
            ServiceError::InvalidCredentials => ErrorKind::InvalidCredentials,
            ServiceError::AccountNotActive => ErrorKind::AccountNotActive,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Validation(_) => ErrorKind::ValidationError,
            ServiceError::Store(_)
            | ServiceError::Cache(_)
            | ServiceError::Mail(_)
            | ServiceError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Unique violations on identity inserts keep the offending field.
    pub fn from_identity_insert(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { field } => ServiceError::DuplicateIdentity { field },
            other => ServiceError::Store(other),
        }
    }

    pub fn from_account_insert(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { .. } => ServiceError::DuplicateAccount,
            other => ServiceError::Store(other),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Cache(e) => AppError::InternalError(e.context("revocation store")),
            ServiceError::Mail(e) => e,
            ServiceError::Internal(e) => AppError::InternalError(e),
            other => {
                let kind = other.kind();
                AppError::rejected(kind.status(), kind.as_str(), other.to_string())
            }
        }
    }
}
