//! PostgreSQL store backed by sqlx.

use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use sqlx::postgres::{PgConnection, PgDatabaseError, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{
    IdentityRepository, PermissionRepository, ServiceAccountRepository, Store, StoreError,
    UnitOfWork,
};
use crate::config::DatabaseConfig;
use crate::models::{
    Identity, IdentityRow, IdentityScope, Permission, ServiceAccount, ServiceAccountRef,
};

const IDENTITY_COLUMNS: &str = "id, parent_id, first_name, last_name, email, phone, \
     password_hash, is_active, role, created_at, updated_at";

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let field = db_err
                        .constraint()
                        .and_then(field_for_constraint)
                        .map(str::to_string)
                        .or_else(|| {
                            db_err
                                .try_downcast_ref::<PgDatabaseError>()
                                .and_then(|pg| pg.detail())
                                .and_then(field_from_detail)
                        })
                        .unwrap_or_else(|| "unknown".to_string());
                    StoreError::UniqueViolation { field }
                } else if db_err.is_foreign_key_violation() {
                    StoreError::ForeignKeyViolation(db_err.message().to_string())
                } else {
                    StoreError::Query(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::RowNotFound | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::InvalidData(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

fn field_for_constraint(constraint: &str) -> Option<&'static str> {
    match constraint {
        "identities_email_key" => Some("email"),
        "identities_phone_key" => Some("phone"),
        "identities_pkey" => Some("id"),
        "service_accounts_broker_service_key" => Some("service_id"),
        "permissions_account_client_key" => Some("client_id"),
        _ => None,
    }
}

/// Extracts `email` from a detail like `Key (lower(email))=(a@b.c) already exists.`
fn field_from_detail(detail: &str) -> Option<String> {
    let start = detail.find("Key (")? + "Key (".len();
    let rest = &detail[start..];
    let end = rest.find(")=")?;
    let key = rest[..end]
        .trim_start_matches("lower(")
        .trim_end_matches(')')
        .split("::")
        .next()?;
    Some(key.to_string())
}

fn into_identity(row: IdentityRow) -> Result<Identity, StoreError> {
    Identity::try_from(row).map_err(StoreError::InvalidData)
}

fn role_codes(scope: IdentityScope) -> Vec<String> {
    scope.roles().iter().map(|r| r.as_str().to_string()).collect()
}

/// Store handing out one database transaction per unit of work.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    connect_retry: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, connect_retry: Duration) -> Self {
        Self {
            pool,
            connect_retry,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(self.connect_retry),
            ..Default::default()
        };

        let tx = retry_notify(
            policy,
            || async {
                self.pool.begin().await.map_err(|e| match StoreError::from(e) {
                    err @ StoreError::Unavailable(_) => backoff::Error::transient(err),
                    err => backoff::Error::permanent(err),
                })
            },
            |err: StoreError, wait: Duration| {
                tracing::warn!(error = %err, retry_in_ms = wait.as_millis() as u64, "Database unavailable, retrying");
            },
        )
        .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn identities(&mut self, scope: IdentityScope) -> Box<dyn IdentityRepository + '_> {
        Box::new(PgIdentities {
            conn: &mut *self.tx,
            scope,
        })
    }

    fn accounts(&mut self) -> Box<dyn ServiceAccountRepository + '_> {
        Box::new(PgServiceAccounts { conn: &mut *self.tx })
    }

    fn permissions(&mut self) -> Box<dyn PermissionRepository + '_> {
        Box::new(PgPermissions { conn: &mut *self.tx })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

struct PgIdentities<'a> {
    conn: &'a mut PgConnection,
    scope: IdentityScope,
}

#[async_trait]
impl IdentityRepository for PgIdentities<'_> {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM identities WHERE id = $1 AND role = ANY($2)",
            IDENTITY_COLUMNS
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(id)
            .bind(role_codes(self.scope))
            .fetch_optional(&mut *self.conn)
            .await?
            .map(into_identity)
            .transpose()
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<Identity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM identities WHERE LOWER(email) = LOWER($1) AND role = ANY($2)",
            IDENTITY_COLUMNS
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(email.trim())
            .bind(role_codes(self.scope))
            .fetch_optional(&mut *self.conn)
            .await?
            .map(into_identity)
            .transpose()
    }

    async fn insert(&mut self, identity: &Identity) -> Result<(), StoreError> {
        if !self.scope.admits(identity.role) {
            return Err(StoreError::InvalidData(format!(
                "role {} does not belong in this repository",
                identity.role
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO identities (id, parent_id, first_name, last_name, email, phone,
                                    password_hash, is_active, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(identity.id)
        .bind(identity.parent_id)
        .bind(&identity.first_name)
        .bind(&identity.last_name)
        .bind(&identity.email)
        .bind(&identity.phone)
        .bind(&identity.password_hash)
        .bind(identity.is_active)
        .bind(identity.role.as_str())
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn activate(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE identities SET is_active = TRUE, updated_at = NOW() WHERE id = $1 AND role = ANY($2)",
        )
        .bind(id)
        .bind(role_codes(self.scope))
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(&mut self, id: Uuid, hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE identities SET password_hash = $2, updated_at = NOW() WHERE id = $1 AND role = ANY($3)",
        )
        .bind(id)
        .bind(hash)
        .bind(role_codes(self.scope))
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Identity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM identities WHERE parent_id = $1 AND role = ANY($2) ORDER BY created_at",
            IDENTITY_COLUMNS
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(parent_id)
            .bind(role_codes(self.scope))
            .fetch_all(&mut *self.conn)
            .await?
            .into_iter()
            .map(into_identity)
            .collect()
    }
}

struct PgServiceAccounts<'a> {
    conn: &'a mut PgConnection,
}

#[async_trait]
impl ServiceAccountRepository for PgServiceAccounts<'_> {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ServiceAccount>, StoreError> {
        let account = sqlx::query_as::<_, ServiceAccount>("SELECT * FROM service_accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(account)
    }

    async fn insert(&mut self, account: &ServiceAccount) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO service_accounts (id, broker_id, service_id, login, secret, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(account.broker_id)
        .bind(account.service_id)
        .bind(&account.login)
        .bind(&account.secret)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    async fn list_by_broker(&mut self, broker_id: Uuid) -> Result<Vec<ServiceAccount>, StoreError> {
        let accounts = sqlx::query_as::<_, ServiceAccount>(
            "SELECT * FROM service_accounts WHERE broker_id = $1 ORDER BY created_at",
        )
        .bind(broker_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(accounts)
    }

    async fn update_credentials(
        &mut self,
        id: Uuid,
        broker_id: Uuid,
        login: &str,
        secret: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE service_accounts SET login = $3, secret = $4, updated_at = NOW()
            WHERE id = $1 AND broker_id = $2
            "#,
        )
        .bind(id)
        .bind(broker_id)
        .bind(login)
        .bind(secret)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, id: Uuid, broker_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM service_accounts WHERE id = $1 AND broker_id = $2")
            .bind(id)
            .bind(broker_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tradable(&mut self, client_id: Uuid) -> Result<Vec<ServiceAccountRef>, StoreError> {
        let accounts = sqlx::query_as::<_, ServiceAccountRef>(
            r#"
            SELECT sa.id, sa.service_id
            FROM service_accounts sa
            JOIN permissions p ON p.service_account_id = sa.id
            WHERE p.client_id = $1 AND p.can_trade
            ORDER BY sa.created_at
            "#,
        )
        .bind(client_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(accounts)
    }
}

struct PgPermissions<'a> {
    conn: &'a mut PgConnection,
}

#[async_trait]
impl PermissionRepository for PgPermissions<'_> {
    async fn materialize_for_client(
        &mut self,
        client_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO permissions (id, service_account_id, client_id, can_trade, created_at, updated_at)
            SELECT gen_random_uuid(), sa.id, $1, FALSE, NOW(), NOW()
            FROM service_accounts sa
            WHERE sa.broker_id = $2
            ON CONFLICT (service_account_id, client_id) DO NOTHING
            "#,
        )
        .bind(client_id)
        .bind(broker_id)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn materialize_for_account(
        &mut self,
        service_account_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO permissions (id, service_account_id, client_id, can_trade, created_at, updated_at)
            SELECT gen_random_uuid(), $1, i.id, FALSE, NOW(), NOW()
            FROM identities i
            WHERE i.parent_id = $2 AND i.role = 'USER'
            ON CONFLICT (service_account_id, client_id) DO NOTHING
            "#,
        )
        .bind(service_account_id)
        .bind(broker_id)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_can_trade(
        &mut self,
        broker_id: Uuid,
        service_account_id: Uuid,
        client_id: Uuid,
        can_trade: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE permissions p SET can_trade = $4, updated_at = NOW()
            FROM service_accounts sa, identities c
            WHERE p.service_account_id = sa.id
              AND p.client_id = c.id
              AND sa.id = $2
              AND sa.broker_id = $1
              AND c.id = $3
              AND c.parent_id = $1
            "#,
        )
        .bind(broker_id)
        .bind(service_account_id)
        .bind(client_id)
        .bind(can_trade)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn can_trade(
        &mut self,
        service_account_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<bool>, StoreError> {
        let flag = sqlx::query_scalar::<_, bool>(
            "SELECT can_trade FROM permissions WHERE service_account_id = $1 AND client_id = $2",
        )
        .bind(service_account_id)
        .bind(client_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(flag)
    }

    async fn list_for_account(
        &mut self,
        service_account_id: Uuid,
    ) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE service_account_id = $1 ORDER BY created_at",
        )
        .bind(service_account_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    async fn list_for_broker(&mut self, broker_id: Uuid) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.*
            FROM permissions p
            JOIN service_accounts sa ON sa.id = p.service_account_id
            WHERE sa.broker_id = $1
            ORDER BY p.created_at
            "#,
        )
        .bind(broker_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_yields_plain_and_lowered_keys() {
        assert_eq!(
            field_from_detail("Key (phone)=(+100) already exists.").as_deref(),
            Some("phone")
        );
        assert_eq!(
            field_from_detail("Key (lower(email))=(a@b.c) already exists.").as_deref(),
            Some("email")
        );
        assert_eq!(field_from_detail("no key here"), None);
    }

    #[test]
    fn known_constraints_map_to_fields() {
        assert_eq!(field_for_constraint("identities_email_key"), Some("email"));
        assert_eq!(
            field_for_constraint("service_accounts_broker_service_key"),
            Some("service_id")
        );
        assert_eq!(field_for_constraint("something_else"), None);
    }

    #[test]
    fn pool_timeouts_are_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_create_pool() {
        let config = DatabaseConfig {
            url: "postgres://localhost/broker_auth_test".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_retry_seconds: 1,
        };

        let result = create_pool(&config).await;
        assert!(result.is_ok());
    }
}
