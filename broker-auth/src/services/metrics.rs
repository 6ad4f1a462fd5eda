//! Domain counters, recorded through the `metrics` facade.

use metrics::counter;

use crate::models::TokenType;

#[derive(Debug, Clone, Copy)]
pub enum LoginOutcome {
    Success,
    InvalidCredentials,
    Inactive,
}

impl LoginOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::InvalidCredentials => "invalid_credentials",
            LoginOutcome::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum MaterializeTrigger {
    ClientRegistered,
    AccountOpened,
}

impl MaterializeTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            MaterializeTrigger::ClientRegistered => "client_registered",
            MaterializeTrigger::AccountOpened => "account_opened",
        }
    }
}

pub fn record_login(outcome: LoginOutcome) {
    counter!("auth_logins_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_revocation(token_type: TokenType) {
    counter!("auth_tokens_revoked_total", "token_type" => token_type.as_str()).increment(1);
}

pub fn record_materialized(trigger: MaterializeTrigger, rows: u64) {
    counter!("auth_permissions_materialized_total", "trigger" => trigger.as_str()).increment(rows);
}
