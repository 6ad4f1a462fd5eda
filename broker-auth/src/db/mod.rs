//! Persistence layer: per-request units of work over the identity, service
//! account and permission tables.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identity, IdentityScope, Permission, ServiceAccount, ServiceAccountRef};

pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated on {field}")]
    UniqueViolation { field: String },

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// One of the two identity repositories. All lookups are restricted to the
/// roles of its scope; email lookups are case-insensitive.
#[async_trait]
pub trait IdentityRepository: Send {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn find_by_email(&mut self, email: &str) -> Result<Option<Identity>, StoreError>;

    async fn insert(&mut self, identity: &Identity) -> Result<(), StoreError>;

    /// Returns false when no identity of this scope has the id.
    async fn activate(&mut self, id: Uuid) -> Result<bool, StoreError>;

    async fn update_password_hash(&mut self, id: Uuid, hash: &str) -> Result<bool, StoreError>;

    /// Identities whose `parent_id` is `parent_id`, oldest first.
    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Identity>, StoreError>;
}

#[async_trait]
pub trait ServiceAccountRepository: Send {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ServiceAccount>, StoreError>;

    async fn insert(&mut self, account: &ServiceAccount) -> Result<(), StoreError>;

    async fn list_by_broker(&mut self, broker_id: Uuid) -> Result<Vec<ServiceAccount>, StoreError>;

    /// Only touches the row when it belongs to `broker_id`.
    async fn update_credentials(
        &mut self,
        id: Uuid,
        broker_id: Uuid,
        login: &str,
        secret: &str,
    ) -> Result<bool, StoreError>;

    /// Only deletes the row when it belongs to `broker_id`. Permissions cascade.
    async fn delete(&mut self, id: Uuid, broker_id: Uuid) -> Result<bool, StoreError>;

    /// Accounts the client may trade through.
    async fn list_tradable(&mut self, client_id: Uuid) -> Result<Vec<ServiceAccountRef>, StoreError>;
}

#[async_trait]
pub trait PermissionRepository: Send {
    /// Inserts a disabled row for every account of `broker_id` that the client
    /// does not have a row for yet. Returns the number of rows created.
    async fn materialize_for_client(
        &mut self,
        client_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Inserts a disabled row for every client of `broker_id` missing one on
    /// this account. Returns the number of rows created.
    async fn materialize_for_account(
        &mut self,
        service_account_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Single conditional update: the account must belong to `broker_id`, and
    /// the client must be one of its children. Returns false if nothing matched.
    async fn set_can_trade(
        &mut self,
        broker_id: Uuid,
        service_account_id: Uuid,
        client_id: Uuid,
        can_trade: bool,
    ) -> Result<bool, StoreError>;

    /// `None` when no permission row exists for the pair.
    async fn can_trade(
        &mut self,
        service_account_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<bool>, StoreError>;

    async fn list_for_account(
        &mut self,
        service_account_id: Uuid,
    ) -> Result<Vec<Permission>, StoreError>;

    /// Every permission row on accounts owned by `broker_id`.
    async fn list_for_broker(&mut self, broker_id: Uuid) -> Result<Vec<Permission>, StoreError>;
}

/// An open transaction with named repository handles. Dropping it without
/// `commit` discards every write made through it.
#[async_trait]
pub trait UnitOfWork: Send {
    fn identities(&mut self, scope: IdentityScope) -> Box<dyn IdentityRepository + '_>;

    fn accounts(&mut self) -> Box<dyn ServiceAccountRepository + '_>;

    fn permissions(&mut self) -> Box<dyn PermissionRepository + '_>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;

    fn brokers(&mut self) -> Box<dyn IdentityRepository + '_> {
        self.identities(IdentityScope::Brokers)
    }

    fn clients(&mut self) -> Box<dyn IdentityRepository + '_> {
        self.identities(IdentityScope::Clients)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
