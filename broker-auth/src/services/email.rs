use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_email(&self, to_email: &str, link: &str) -> Result<(), AppError>;

    async fn send_password_reset_email(&self, to_email: &str, link: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpEmailService {
    mailer: SmtpTransport,
    from: Mailbox,
}

impl SmtpEmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let mailer = if config.user.is_empty() {
            // Unauthenticated relay, e.g. a local catch-all SMTP server.
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        } else {
            SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?
                .credentials(Credentials::new(
                    config.user.clone(),
                    config.password.clone(),
                ))
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build()
        };

        let address = if config.user.contains('@') {
            config.user.clone()
        } else {
            "no-reply@localhost".to_string()
        };
        let from: Mailbox = format!("{} <{}>", config.sender_name, address)
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::ConfigError(e.into()))?;

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self { mailer, from })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailService {
    async fn send_verification_email(&self, to_email: &str, link: &str) -> Result<(), AppError> {
        let html_body = format!(
            r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Confirm your email</h2>
        <p>Follow the link below to activate your account:</p>
        <p><a href="{link}">Activate account</a></p>
        <p style="color: #666; font-size: 12px;">If you did not register, ignore this email.</p>
    </body>
</html>"#
        );
        let plain_body = format!(
            "Confirm your email\n\nFollow the link below to activate your account:\n\n{link}\n\nIf you did not register, ignore this email."
        );

        self.send_email(to_email, "Confirm your email", plain_body, html_body)
            .await
    }

    async fn send_password_reset_email(&self, to_email: &str, link: &str) -> Result<(), AppError> {
        let html_body = format!(
            r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Password reset</h2>
        <p>Follow the link below to choose a new password:</p>
        <p><a href="{link}">Reset password</a></p>
        <p style="color: #666; font-size: 12px;">If you did not ask for this, ignore this email.</p>
    </body>
</html>"#
        );
        let plain_body = format!(
            "Password reset\n\nFollow the link below to choose a new password:\n\n{link}\n\nIf you did not ask for this, ignore this email."
        );

        self.send_email(to_email, "Reset your password", plain_body, html_body)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub kind: EmailKind,
    pub to: String,
    pub link: String,
}

/// Records outgoing mail instead of sending it.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent link mailed to `to` with the given kind.
    pub fn last_link(&self, to: &str, kind: EmailKind) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.to.eq_ignore_ascii_case(to))
            .map(|m| m.link)
    }

    fn record(&self, kind: EmailKind, to: &str, link: &str) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock mailbox poisoned: {}", e)))?
            .push(SentEmail {
                kind,
                to: to.to_string(),
                link: link.to_string(),
            });
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification_email(&self, to_email: &str, link: &str) -> Result<(), AppError> {
        self.record(EmailKind::Verification, to_email, link)
    }

    async fn send_password_reset_email(&self, to_email: &str, link: &str) -> Result<(), AppError> {
        self.record(EmailKind::PasswordReset, to_email, link)
    }
}
