//! Permission model - whether a client may trade through a broker's account.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::identity::Identity;

/// Unique per `(service_account_id, client_id)`; created disabled.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub service_account_id: Uuid,
    pub client_id: Uuid,
    pub can_trade: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn disabled(service_account_id: Uuid, client_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            service_account_id,
            client_id,
            can_trade: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub service_account_id: Uuid,
    pub can_trade: bool,
}

/// A broker's client together with every permission row they hold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPermissions {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub permissions: Vec<PermissionEntry>,
}

impl ClientPermissions {
    pub fn new(client: &Identity, permissions: &[Permission]) -> Self {
        Self {
            id: client.id,
            first_name: client.first_name.clone(),
            last_name: client.last_name.clone(),
            email: client.email.clone(),
            phone: client.phone.clone(),
            is_active: client.is_active,
            created_at: client.created_at,
            permissions: permissions
                .iter()
                .map(|p| PermissionEntry {
                    service_account_id: p.service_account_id,
                    can_trade: p.can_trade,
                })
                .collect(),
        }
    }
}
