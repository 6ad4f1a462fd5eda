use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{JwtConfig, TokenTtl};
use crate::models::{Role, TokenType};

/// Claim names the signer owns; callers cannot override them through extras.
const RESERVED_CLAIMS: [&str; 6] = ["sub", "token_type", "user_type", "jti", "exp", "iat"];

#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, malformed token or `exp` in the past.
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Claims carried by every token this service signs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id.
    pub sub: Uuid,
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<Role>,
    /// Fresh per issuance; the revocation key.
    pub jti: Uuid,
    /// Absent for tokens that never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub iat: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Seconds until `exp`; `None` when the token never expires.
    pub fn remaining_lifetime(&self) -> Option<i64> {
        self.exp.map(|exp| exp - Utc::now().timestamp())
    }
}

/// Access/refresh pair handed out on login and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies typed tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    access_ttl: TokenTtl,
    refresh_ttl: TokenTtl,
    email_ttl: TokenTtl,
    invite_ttl: TokenTtl,
}

impl TokenSigner {
    pub fn new(config: &JwtConfig) -> Self {
        tracing::info!(algorithm = ?config.algorithm, "Token signer initialized");

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            algorithm: config.algorithm,
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            email_ttl: config.email_token_ttl,
            invite_ttl: config.invite_token_ttl,
        }
    }

    /// Configured lifetime for a token type.
    pub fn ttl(&self, token_type: TokenType) -> TokenTtl {
        match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
            TokenType::Email => self.email_ttl,
            TokenType::Invite => self.invite_ttl,
        }
    }

    /// Sign a token. `ttl_seconds = None` omits `exp` entirely.
    pub fn issue(
        &self,
        token_type: TokenType,
        subject: Uuid,
        ttl_seconds: Option<i64>,
        user_type: Option<Role>,
        mut extra: Map<String, Value>,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        extra.retain(|key, _| !RESERVED_CLAIMS.contains(&key.as_str()));

        let claims = Claims {
            sub: subject,
            token_type,
            user_type,
            jti: Uuid::new_v4(),
            exp: ttl_seconds.map(|ttl| now + ttl),
            iat: now,
            extra,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Sign a token of `token_type` with its configured lifetime.
    pub fn issue_typed(
        &self,
        token_type: TokenType,
        subject: Uuid,
        user_type: Option<Role>,
    ) -> Result<String, TokenError> {
        self.issue(
            token_type,
            subject,
            self.ttl(token_type).as_seconds(),
            user_type,
            Map::new(),
        )
    }

    pub fn issue_pair(&self, subject: Uuid, user_type: Role) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_typed(TokenType::Access, subject, Some(user_type))?,
            refresh_token: self.issue_typed(TokenType::Refresh, subject, Some(user_type))?,
        })
    }

    /// Check signature and expiry. Type and revocation are the caller's job.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.required_spec_claims = HashSet::new();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Decode without checking the signature or expiry. Never use the result
    /// to grant access.
    pub fn peek_unverified(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }
}
