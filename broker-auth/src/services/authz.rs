//! Per-request authorization: bearer token in, stored identity out.
//!
//! Every rejection has its own error kind so clients can tell a malformed
//! header from a revoked token from a role mismatch.

use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::jwt::{Claims, TokenSigner};
use super::redis::RevocationStore;
use crate::db::Store;
use crate::models::{Identity, IdentityScope, Role, TokenType};

const BEARER_PREFIX: &str = "Bearer ";

/// Which roles an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Broker,
    Client,
    Admin,
    BrokerOrClient,
    Any,
}

impl Audience {
    pub fn admits(&self, role: Role) -> bool {
        match (self, role) {
            (Audience::Any, _) => true,
            (Audience::Broker, Role::Broker) => true,
            (Audience::Client, Role::User) => true,
            (Audience::Admin, Role::Admin) => true,
            (Audience::BrokerOrClient, Role::Broker | Role::User) => true,
            (Audience::Broker | Audience::Client | Audience::Admin | Audience::BrokerOrClient, _) => {
                false
            }
        }
    }
}

/// An accepted request: the verified claims and the identity they resolve to.
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: Identity,
    pub claims: Claims,
}

/// Splits `Bearer <token>` out of an Authorization header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, ServiceError> {
    let value = header.ok_or(ServiceError::MissingCredential)?;
    match value.strip_prefix(BEARER_PREFIX).map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ServiceError::MalformedCredential),
    }
}

#[derive(Clone)]
pub struct Authorizer {
    signer: TokenSigner,
    revocations: Arc<dyn RevocationStore>,
    store: Arc<dyn Store>,
}

impl Authorizer {
    pub fn new(
        signer: TokenSigner,
        revocations: Arc<dyn RevocationStore>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            signer,
            revocations,
            store,
        }
    }

    /// Full check of an Authorization header for an endpoint open to `audience`.
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        audience: Audience,
    ) -> Result<Principal, ServiceError> {
        let token = bearer_token(authorization)?;
        let claims = self.verify_live(token, TokenType::Access).await?;

        let role = claims.user_type.ok_or(ServiceError::InsufficientPermission)?;
        if !audience.admits(role) {
            tracing::warn!(sub = %claims.sub, role = %role, ?audience, "Role not admitted");
            return Err(ServiceError::InsufficientPermission);
        }

        let identity = self.resolve_owner(&claims).await?;
        if identity.role != role {
            tracing::warn!(sub = %claims.sub, claimed = %role, stored = %identity.role, "Token role does not match identity");
            return Err(ServiceError::InsufficientPermission);
        }

        Ok(Principal { identity, claims })
    }

    /// Signature, expiry, type and revocation checks for a token of any type.
    pub async fn verify_live(
        &self,
        token: &str,
        expected: TokenType,
    ) -> Result<Claims, ServiceError> {
        let claims = self.signer.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "Token verification failed");
            ServiceError::InvalidCredential
        })?;

        if claims.token_type != expected {
            tracing::debug!(jti = %claims.jti, got = %claims.token_type, expected = %expected, "Wrong token type");
            return Err(ServiceError::WrongTokenType { expected });
        }

        let revoked = self
            .revocations
            .is_revoked(&claims.jti)
            .await
            .map_err(ServiceError::Cache)?;
        if revoked {
            tracing::debug!(jti = %claims.jti, "Token revoked");
            return Err(ServiceError::CredentialRevoked);
        }

        Ok(claims)
    }

    /// Looks the subject up in the repository its `user_type` points at.
    /// Tokens without a `user_type` are searched in both.
    pub async fn resolve_owner(&self, claims: &Claims) -> Result<Identity, ServiceError> {
        let scopes: &[IdentityScope] = match claims.user_type {
            Some(role) => match role.scope() {
                IdentityScope::Brokers => &[IdentityScope::Brokers],
                IdentityScope::Clients => &[IdentityScope::Clients],
            },
            None => &[IdentityScope::Brokers, IdentityScope::Clients],
        };

        let found = self.find_identity(claims.sub, scopes).await?;
        found.ok_or_else(|| {
            tracing::debug!(sub = %claims.sub, "Token owner not found");
            ServiceError::OwnerNotFound
        })
    }

    async fn find_identity(
        &self,
        id: Uuid,
        scopes: &[IdentityScope],
    ) -> Result<Option<Identity>, ServiceError> {
        let mut uow = self.store.begin().await?;
        let mut found = None;
        for scope in scopes {
            found = uow.identities(*scope).find_by_id(id).await?;
            if found.is_some() {
                break;
            }
        }
        uow.rollback().await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_parsing() {
        assert!(matches!(bearer_token(None), Err(ServiceError::MissingCredential)));
        assert!(matches!(
            bearer_token(Some("Basic abc")),
            Err(ServiceError::MalformedCredential)
        ));
        assert!(matches!(
            bearer_token(Some("Bearer ")),
            Err(ServiceError::MalformedCredential)
        ));
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn audiences_admit_expected_roles() {
        assert!(Audience::Broker.admits(Role::Broker));
        assert!(!Audience::Broker.admits(Role::User));
        assert!(!Audience::Broker.admits(Role::Admin));
        assert!(Audience::Client.admits(Role::User));
        assert!(Audience::Admin.admits(Role::Admin));
        assert!(Audience::BrokerOrClient.admits(Role::User));
        assert!(!Audience::BrokerOrClient.admits(Role::Admin));
        assert!(Audience::Any.admits(Role::Admin));
    }
}
