//! Service account model - a broker's credentials for one external service.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// At most one per `(broker_id, service_id)`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ServiceAccount {
    pub id: Uuid,
    pub broker_id: Uuid,
    pub service_id: Uuid,
    pub login: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceAccount {
    pub fn new(broker_id: Uuid, service_id: Uuid, login: String, secret: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            broker_id,
            service_id,
            login,
            secret,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ServiceAccountRef {
        ServiceAccountRef {
            id: self.id,
            service_id: self.service_id,
        }
    }
}

/// What clients and brokers get to see of an account. Credentials never leave
/// the service in clear text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    pub id: Uuid,
    pub service_id: Uuid,
}
