//! Registration, email verification, login, token rotation and password reset.
//!
//! Identity lifecycle: unregistered -> pending verification -> active. A
//! password reset never changes activation state.

use std::sync::Arc;

use super::authz::Authorizer;
use super::email::EmailProvider;
use super::error::ServiceError;
use super::jwt::{Claims, TokenSigner};
use super::linker::Linker;
use super::metrics::{record_login, record_revocation, LoginOutcome};
use super::permission::PermissionEngine;
use super::redis::RevocationStore;
use crate::db::Store;
use crate::dtos::auth::{
    InviteResponse, LoginRequest, PasswordResetConfirm, PasswordResetRequest,
    RegisterBrokerRequest, RegisterClientRequest, TokenPairResponse,
};
use crate::dtos::MessageResponse;
use crate::models::{Identity, IdentityProfile, IdentityScope, Role, TokenType};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

pub const REGISTRATION_ACK: &str = "Confirm your email";
pub const PASSWORD_RESET_ACK: &str =
    "If an account with this email exists, we sent a password reset link.";

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    signer: TokenSigner,
    authorizer: Authorizer,
    revocations: Arc<dyn RevocationStore>,
    email: Arc<dyn EmailProvider>,
    linker: Linker,
    /// Public key lifetime when refresh tokens never expire.
    cache_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        signer: TokenSigner,
        authorizer: Authorizer,
        revocations: Arc<dyn RevocationStore>,
        email: Arc<dyn EmailProvider>,
        linker: Linker,
        cache_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            signer,
            authorizer,
            revocations,
            email,
            linker,
            cache_ttl_seconds,
        }
    }

    pub async fn register_broker(
        &self,
        req: RegisterBrokerRequest,
    ) -> Result<MessageResponse, ServiceError> {
        let password_hash = hash_password(Password::new(req.password.clone())).await?;
        let identity = self
            .create_or_reuse(Role::Broker, None, req.profile(), password_hash)
            .await?;

        self.send_verification(&identity).await?;
        Ok(MessageResponse::new(REGISTRATION_ACK))
    }

    pub async fn register_client(
        &self,
        req: RegisterClientRequest,
    ) -> Result<MessageResponse, ServiceError> {
        let invite = self
            .authorizer
            .verify_live(&req.invite_token, TokenType::Invite)
            .await?;
        let broker_id = invite.sub;

        let password_hash = hash_password(Password::new(req.identity.password.clone())).await?;
        let identity = self
            .create_or_reuse(
                Role::User,
                Some(broker_id),
                req.identity.profile(),
                password_hash,
            )
            .await?;

        self.send_verification(&identity).await?;
        Ok(MessageResponse::new(REGISTRATION_ACK))
    }

    /// One transaction: an active identity with this email is rejected, an
    /// inactive one is reused with the new password, otherwise a fresh
    /// inactive identity is inserted. New clients get their permission rows
    /// in the same transaction.
    async fn create_or_reuse(
        &self,
        role: Role,
        parent_id: Option<uuid::Uuid>,
        profile: IdentityProfile,
        password_hash: PasswordHashString,
    ) -> Result<Identity, ServiceError> {
        let scope = role.scope();
        let mut uow = self.store.begin().await?;

        if let Some(broker_id) = parent_id {
            let broker = uow.brokers().find_by_id(broker_id).await?;
            if !broker.is_some_and(|b| b.role == Role::Broker) {
                tracing::warn!(broker_id = %broker_id, "Invite issuer no longer exists");
                return Err(ServiceError::OwnerNotFound);
            }
        }

        let existing = uow.identities(scope).find_by_email(&profile.email).await?;
        let identity = match existing {
            Some(identity) if identity.is_active => {
                tracing::debug!(identity_id = %identity.id, "Registration for active email rejected");
                return Err(ServiceError::EmailTaken);
            }
            Some(mut identity) => {
                uow.identities(scope)
                    .update_password_hash(identity.id, password_hash.as_str())
                    .await?;
                identity.password_hash = password_hash.into_string();
                tracing::info!(identity_id = %identity.id, "Re-registration of unconfirmed identity");
                identity
            }
            None => {
                let identity = Identity::new(role, parent_id, profile, password_hash.into_string());
                uow.identities(scope)
                    .insert(&identity)
                    .await
                    .map_err(ServiceError::from_identity_insert)?;

                if let Some(broker_id) = parent_id {
                    PermissionEngine::materialize_on_client_registration(
                        uow.as_mut(),
                        identity.id,
                        broker_id,
                    )
                    .await?;
                }
                tracing::info!(identity_id = %identity.id, role = %role, "Identity registered");
                identity
            }
        };

        uow.commit().await?;
        Ok(identity)
    }

    /// Burns the token, then activates its owner. A missing or already
    /// active owner is not an error.
    pub async fn verify_email(&self, email_token: &str) -> Result<MessageResponse, ServiceError> {
        let claims = self
            .authorizer
            .verify_live(email_token, TokenType::Email)
            .await?;
        self.claim(&claims).await?;

        let scopes: &[IdentityScope] = match claims.user_type {
            Some(role) if role.scope() == IdentityScope::Clients => &[IdentityScope::Clients],
            Some(_) => &[IdentityScope::Brokers],
            None => &[IdentityScope::Brokers, IdentityScope::Clients],
        };

        let mut uow = self.store.begin().await?;
        let mut activated = false;
        for scope in scopes {
            if uow.identities(*scope).activate(claims.sub).await? {
                activated = true;
                break;
            }
        }
        uow.commit().await?;

        if activated {
            tracing::info!(identity_id = %claims.sub, "Identity activated");
        } else {
            tracing::debug!(identity_id = %claims.sub, "Email token owner not found, nothing to activate");
        }

        Ok(MessageResponse::new("Account is activated"))
    }

    /// Unknown email and wrong password are indistinguishable. The presence
    /// of `public_key` selects the client variant.
    pub async fn login(&self, req: LoginRequest) -> Result<TokenPairResponse, ServiceError> {
        let scope = if req.public_key.is_some() {
            IdentityScope::Clients
        } else {
            IdentityScope::Brokers
        };

        let mut uow = self.store.begin().await?;
        let identity = uow.identities(scope).find_by_email(&req.email).await?;
        uow.rollback().await?;

        let stored_hash = identity
            .as_ref()
            .map(|i| PasswordHashString::new(i.password_hash.clone()));
        let matches = verify_password(Password::new(req.password), stored_hash).await?;

        let identity = match identity {
            Some(identity) if matches => identity,
            _ => {
                record_login(LoginOutcome::InvalidCredentials);
                return Err(ServiceError::InvalidCredentials);
            }
        };

        if !identity.is_active {
            record_login(LoginOutcome::Inactive);
            return Err(ServiceError::AccountNotActive);
        }

        let pair = self
            .signer
            .issue_pair(identity.id, identity.role)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        if let Some(public_key) = req.public_key.as_deref() {
            let ttl = self
                .signer
                .ttl(TokenType::Refresh)
                .as_seconds()
                .unwrap_or(self.cache_ttl_seconds);
            self.revocations
                .store_public_key(&identity.id, public_key, ttl)
                .await
                .map_err(ServiceError::Cache)?;
        }

        record_login(LoginOutcome::Success);
        tracing::info!(identity_id = %identity.id, role = %identity.role, "Login succeeded");

        Ok(TokenPairResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user_role: identity.role,
        })
    }

    /// Refresh tokens are single-use: the presented one is claimed before a
    /// new pair is issued, so concurrent replays get one pair between them.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPairResponse, ServiceError> {
        let claims = self
            .authorizer
            .verify_live(refresh_token, TokenType::Refresh)
            .await?;
        let owner = self.authorizer.resolve_owner(&claims).await?;
        self.claim(&claims).await?;

        let pair = self
            .signer
            .issue_pair(owner.id, owner.role)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        tracing::info!(identity_id = %owner.id, "Tokens refreshed");
        Ok(TokenPairResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user_role: owner.role,
        })
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<MessageResponse, ServiceError> {
        let claims = self
            .authorizer
            .verify_live(refresh_token, TokenType::Refresh)
            .await?;
        let owner = self.authorizer.resolve_owner(&claims).await?;
        // A concurrent logout with the same token already did the work.
        self.revoke(&claims).await?;

        tracing::info!(identity_id = %owner.id, "Logged out");
        Ok(MessageResponse::new("Logged out"))
    }

    /// Always answers with the same acknowledgement. A link is only mailed
    /// to an existing, active identity.
    pub async fn request_password_reset(
        &self,
        req: PasswordResetRequest,
    ) -> Result<MessageResponse, ServiceError> {
        let mut uow = self.store.begin().await?;
        let mut identity = uow.brokers().find_by_email(&req.email).await?;
        if identity.is_none() {
            identity = uow.clients().find_by_email(&req.email).await?;
        }
        uow.rollback().await?;

        match identity {
            Some(identity) if identity.is_active => {
                let token = self
                    .signer
                    .issue_typed(TokenType::Email, identity.id, Some(identity.role))
                    .map_err(|e| ServiceError::Internal(e.into()))?;
                let link = self.linker.reset_password(&token);
                if let Err(e) = self.email.send_password_reset_email(&identity.email, &link).await {
                    tracing::error!(identity_id = %identity.id, error = %e, "Failed to send password reset email");
                }
            }
            Some(identity) => {
                tracing::debug!(identity_id = %identity.id, "Password reset for inactive identity ignored");
            }
            None => tracing::debug!("Password reset for unknown email ignored"),
        }

        Ok(MessageResponse::new(PASSWORD_RESET_ACK))
    }

    pub async fn confirm_password_reset(
        &self,
        req: PasswordResetConfirm,
    ) -> Result<MessageResponse, ServiceError> {
        let claims = self
            .authorizer
            .verify_live(&req.email_token, TokenType::Email)
            .await?;
        let owner = self.authorizer.resolve_owner(&claims).await?;

        let password_hash = hash_password(Password::new(req.password)).await?;
        self.claim(&claims).await?;

        let mut uow = self.store.begin().await?;
        let updated = uow
            .identities(owner.role.scope())
            .update_password_hash(owner.id, password_hash.as_str())
            .await?;
        if !updated {
            return Err(ServiceError::OwnerNotFound);
        }
        uow.commit().await?;

        tracing::info!(identity_id = %owner.id, "Password updated");
        Ok(MessageResponse::new("Password updated"))
    }

    pub fn invite_client(&self, broker: &Identity) -> Result<InviteResponse, ServiceError> {
        let token = self
            .signer
            .issue_typed(TokenType::Invite, broker.id, None)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        tracing::info!(broker_id = %broker.id, "Invite link issued");
        Ok(InviteResponse {
            link: self.linker.invite(&token),
        })
    }

    async fn send_verification(&self, identity: &Identity) -> Result<(), ServiceError> {
        let token = self
            .signer
            .issue_typed(TokenType::Email, identity.id, Some(identity.role))
            .map_err(|e| ServiceError::Internal(e.into()))?;
        let link = self.linker.verify_email(&token);

        self.email
            .send_verification_email(&identity.email, &link)
            .await
            .map_err(ServiceError::Mail)
    }

    /// Marks the token's `jti` revoked for the rest of its lifetime. `false`
    /// when another request revoked it first.
    async fn revoke(&self, claims: &Claims) -> Result<bool, ServiceError> {
        let claimed = self
            .revocations
            .revoke(&claims.jti, claims.remaining_lifetime())
            .await
            .map_err(ServiceError::Cache)?;
        if claimed {
            record_revocation(claims.token_type);
            tracing::debug!(jti = %claims.jti, token_type = %claims.token_type, "Token revoked");
        }
        Ok(claimed)
    }

    /// Spends a single-use token. Losing the race to another request is
    /// the same as presenting a revoked token.
    async fn claim(&self, claims: &Claims) -> Result<(), ServiceError> {
        if self.revoke(claims).await? {
            return Ok(());
        }
        tracing::warn!(jti = %claims.jti, token_type = %claims.token_type, "Single-use token replayed concurrently");
        Err(ServiceError::CredentialRevoked)
    }
}
