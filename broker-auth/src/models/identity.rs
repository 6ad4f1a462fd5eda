//! Identity model - brokers, their clients and admins share one table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role tag stored on every identity. Also carried in tokens as `user_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// A client invited by a broker.
    User,
    Broker,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Broker => "BROKER",
            Role::Admin => "ADMIN",
        }
    }

    /// Which identity repository owns rows with this role.
    pub fn scope(&self) -> IdentityScope {
        match self {
            Role::User => IdentityScope::Clients,
            Role::Broker | Role::Admin => IdentityScope::Brokers,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "BROKER" => Ok(Role::Broker),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("Unknown role code: {}", other)),
        }
    }
}

/// The two identity repositories: broker-side (brokers and admins) and clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScope {
    Brokers,
    Clients,
}

impl IdentityScope {
    pub fn roles(&self) -> &'static [Role] {
        match self {
            IdentityScope::Brokers => &[Role::Broker, Role::Admin],
            IdentityScope::Clients => &[Role::User],
        }
    }

    pub fn admits(&self, role: Role) -> bool {
        self.roles().contains(&role)
    }
}

/// Identity entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: Uuid,
    /// Broker that invited this client; `None` for brokers and admins.
    pub parent_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    /// Always stored lower-cased.
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Build a fresh, not yet activated identity.
    pub fn new(
        role: Role,
        parent_id: Option<Uuid>,
        profile: IdentityProfile,
        password_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: normalize_email(&profile.email),
            phone: profile.phone.filter(|p| !p.trim().is_empty()),
            password_hash,
            is_active: false,
            role,
            created_at: now,
            updated_at: now,
        }
    }
}

/// User-supplied profile fields of a registration.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Email comparison is case-insensitive everywhere; storage is lower-case.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Raw row as read by sqlx; the role is validated on conversion.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = String;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: row.role.parse()?,
            id: row.id,
            parent_id: row.parent_id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            password_hash: row.password_hash,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(email: &str) -> IdentityProfile {
        IdentityProfile {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            phone: Some("".to_string()),
        }
    }

    #[test]
    fn new_identity_is_inactive_with_normalized_email() {
        let identity = Identity::new(Role::Broker, None, profile("  Ada@Example.COM "), "h".into());
        assert!(!identity.is_active);
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.phone, None);
    }

    #[test]
    fn role_codes_round_trip_and_reject_unknown() {
        for role in [Role::User, Role::Broker, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("user".parse::<Role>().is_err());
    }

    #[test]
    fn scopes_partition_roles() {
        assert!(IdentityScope::Brokers.admits(Role::Admin));
        assert!(IdentityScope::Brokers.admits(Role::Broker));
        assert!(!IdentityScope::Brokers.admits(Role::User));
        assert_eq!(Role::User.scope(), IdentityScope::Clients);
    }

    #[test]
    fn row_with_unknown_role_is_rejected() {
        let row = IdentityRow {
            id: Uuid::new_v4(),
            parent_id: None,
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@b.c".into(),
            phone: None,
            password_hash: "h".into(),
            is_active: true,
            role: "ROOT".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(Identity::try_from(row).is_err());
    }
}
