//! Test helper module for broker-auth integration tests.
//!
//! Wires the router over the in-memory store, revocation store and mailbox,
//! so tests need neither Postgres, Redis nor SMTP.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use broker_auth::{
    build_router,
    config::{
        AuthConfig, DatabaseConfig, Environment, FrontendConfig, JwtConfig, RedisConfig,
        SecurityConfig, SmtpConfig, TokenTtl,
    },
    db::{MemoryStore, Store},
    models::{Permission, TokenType},
    services::{EmailKind, MemoryRevocationStore, MockEmailService, RevocationStore},
    AppState,
};
use async_trait::async_trait;
use http_body_util::BodyExt;
use jsonwebtoken::Algorithm;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";
pub const FRONTEND: &str = "http://frontend.test";

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "broker-auth-test".to_string(),
        log_level: "debug".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 0,
            connect_retry_seconds: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
            cache_ttl_seconds: 3600,
        },
        jwt: JwtConfig {
            secret: "integration-test-secret-of-32-bytes!".to_string(),
            algorithm: Algorithm::HS256,
            access_token_ttl: TokenTtl::Seconds(900),
            refresh_token_ttl: TokenTtl::Seconds(604800),
            email_token_ttl: TokenTtl::Seconds(86400),
            invite_token_ttl: TokenTtl::Seconds(2592000),
        },
        frontend: FrontendConfig {
            base_url: FRONTEND.to_string(),
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: String::new(),
            password: String::new(),
            sender_name: "Broker Auth".to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec![FRONTEND.to_string()],
            request_timeout_seconds: 30,
        },
    }
}

/// Token pair returned by a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: MemoryStore,
    pub revocations: Arc<MemoryRevocationStore>,
    pub mailbox: Arc<MockEmailService>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        Self::build(config, None)
    }

    /// Every revocation store call takes `latency`, like a Redis round trip.
    pub fn with_revocation_latency(latency: Duration) -> Self {
        Self::build(test_config(), Some(latency))
    }

    fn build(config: AuthConfig, latency: Option<Duration>) -> Self {
        let store = MemoryStore::new();
        let revocations = Arc::new(MemoryRevocationStore::new());
        let mailbox = Arc::new(MockEmailService::new());

        let revocation_store: Arc<dyn RevocationStore> = match latency {
            Some(latency) => Arc::new(SlowRevocations {
                inner: revocations.clone(),
                latency,
            }),
            None => revocations.clone(),
        };
        let state = AppState::new(
            config,
            Arc::new(store.clone()),
            revocation_store,
            mailbox.clone(),
        );

        Self {
            router: build_router(state.clone()),
            state,
            store,
            revocations,
            mailbox,
        }
    }

    /// Sends one request and returns the status with the JSON body
    /// (`Value::Null` when the body is empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn post(&self, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, bearer, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, bearer, Some(body)).await
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, bearer, None).await
    }

    pub async fn delete(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, bearer, None).await
    }

    /// Token carried by the newest link of `kind` mailed to `email`.
    pub fn mailed_token(&self, email: &str, kind: EmailKind) -> String {
        let link = self
            .mailbox
            .last_link(email, kind)
            .unwrap_or_else(|| panic!("no {:?} mail for {}", kind, email));
        token_from_link(&link)
    }

    pub async fn register_broker(&self, email: &str) -> (StatusCode, Value) {
        self.post(
            "/brokers/register",
            None,
            json!({
                "email": email,
                "password": PASSWORD,
                "firstName": "Bro",
                "lastName": "Ker",
            }),
        )
        .await
    }

    pub async fn verify_email(&self, email: &str) -> (StatusCode, Value) {
        let token = self.mailed_token(email, EmailKind::Verification);
        self.patch("/verify-email", None, json!({ "emailToken": token }))
            .await
    }

    pub async fn login(&self, email: &str, password: &str, public_key: Option<&str>) -> (StatusCode, Value) {
        let mut body = json!({ "email": email, "password": password });
        if let Some(key) = public_key {
            body["publicKey"] = json!(key);
        }
        self.post("/login", None, body).await
    }

    /// Registered, verified and logged-in broker.
    pub async fn active_broker(&self, email: &str) -> Session {
        let (status, _) = self.register_broker(email).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = self.verify_email(email).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self.login(email, PASSWORD, None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        self.session(body).await
    }

    pub async fn invite_token(&self, broker: &Session) -> String {
        let (status, body) = self
            .request(Method::POST, "/users/invite", Some(&broker.access_token), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        token_from_link(body["link"].as_str().unwrap())
    }

    pub async fn register_client(&self, invite_token: &str, email: &str) -> (StatusCode, Value) {
        self.post(
            "/users/register",
            None,
            json!({
                "email": email,
                "password": PASSWORD,
                "firstName": "Cli",
                "lastName": "Ent",
                "inviteToken": invite_token,
            }),
        )
        .await
    }

    /// Invited, registered, verified and logged-in client of `broker`.
    pub async fn active_client(&self, broker: &Session, email: &str) -> Session {
        let invite = self.invite_token(broker).await;
        let (status, body) = self.register_client(&invite, email).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let (status, _) = self.verify_email(email).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self.login(email, PASSWORD, Some("client-public-key")).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        self.session(body).await
    }

    pub async fn open_account(&self, broker: &Session) -> Uuid {
        let uri = format!("/services/{}/accounts", Uuid::new_v4());
        let (status, body) = self
            .post(
                &uri,
                Some(&broker.access_token),
                json!({ "login": "trader", "secret": "s3cret" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
    }

    pub async fn permission_rows(&self, account_id: Uuid) -> Vec<Permission> {
        let mut uow = self.store.begin().await.unwrap();
        let rows = uow.permissions().list_for_account(account_id).await.unwrap();
        uow.rollback().await.unwrap();
        rows
    }

    async fn session(&self, body: Value) -> Session {
        let access_token = body["accessToken"].as_str().unwrap().to_string();
        let refresh_token = body["refreshToken"].as_str().unwrap().to_string();
        let claims = self
            .state
            .authorizer
            .verify_live(&access_token, TokenType::Access)
            .await
            .unwrap();
        Session {
            id: claims.sub,
            access_token,
            refresh_token,
        }
    }
}

struct SlowRevocations {
    inner: Arc<MemoryRevocationStore>,
    latency: Duration,
}

#[async_trait]
impl RevocationStore for SlowRevocations {
    async fn revoke(&self, jti: &Uuid, ttl_seconds: Option<i64>) -> Result<bool, anyhow::Error> {
        tokio::time::sleep(self.latency).await;
        self.inner.revoke(jti, ttl_seconds).await
    }

    async fn is_revoked(&self, jti: &Uuid) -> Result<bool, anyhow::Error> {
        tokio::time::sleep(self.latency).await;
        self.inner.is_revoked(jti).await
    }

    async fn store_public_key(
        &self,
        identity_id: &Uuid,
        public_key: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        tokio::time::sleep(self.latency).await;
        self.inner
            .store_public_key(identity_id, public_key, ttl_seconds)
            .await
    }

    async fn public_key(&self, identity_id: &Uuid) -> Result<Option<String>, anyhow::Error> {
        tokio::time::sleep(self.latency).await;
        self.inner.public_key(identity_id).await
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.inner.health_check().await
    }
}

/// The token is the value of the link's single query parameter.
pub fn token_from_link(link: &str) -> String {
    link.split_once('=')
        .map(|(_, token)| token.to_string())
        .unwrap_or_else(|| panic!("link without token: {}", link))
}
