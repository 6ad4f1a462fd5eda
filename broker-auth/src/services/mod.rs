//! Services layer for broker-auth.
//!
//! Token signing and verification, the revocation store, authorization,
//! the permission graph and the multi-step auth flows built on top of them.

mod account;
mod auth;
pub mod authz;
mod email;
pub mod error;
pub mod jwt;
mod linker;
pub mod metrics;
mod permission;
pub mod redis;

pub use account::AccountService;
pub use auth::{AuthService, PASSWORD_RESET_ACK, REGISTRATION_ACK};
pub use authz::{bearer_token, Audience, Authorizer, Principal};
pub use email::{EmailKind, EmailProvider, MockEmailService, SentEmail, SmtpEmailService};
pub use error::{ErrorKind, ServiceError};
pub use jwt::{Claims, TokenError, TokenPair, TokenSigner};
pub use linker::Linker;
pub use permission::PermissionEngine;
pub use redis::{MemoryRevocationStore, RedisRevocationStore, RevocationStore};
