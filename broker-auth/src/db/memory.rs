//! In-process store with the same constraints as the Postgres schema.
//!
//! Transactions are serialised: a unit of work holds the store lock for its
//! whole lifetime and restores a snapshot unless it commits.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    IdentityRepository, PermissionRepository, ServiceAccountRepository, Store, StoreError,
    UnitOfWork,
};
use crate::models::{
    normalize_email, Identity, IdentityScope, Permission, Role, ServiceAccount, ServiceAccountRef,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    identities: HashMap<Uuid, Identity>,
    accounts: HashMap<Uuid, ServiceAccount>,
    permissions: HashMap<Uuid, Permission>,
}

impl MemoryState {
    fn permission_exists(&self, service_account_id: Uuid, client_id: Uuid) -> bool {
        self.permissions
            .values()
            .any(|p| p.service_account_id == service_account_id && p.client_id == client_id)
    }

    fn grant(&mut self, service_account_id: Uuid, client_id: Uuid) -> bool {
        if self.permission_exists(service_account_id, client_id) {
            return false;
        }
        let permission = Permission::disabled(service_account_id, client_id);
        self.permissions.insert(permission.id, permission);
        true
    }

    fn children_of(&self, broker_id: Uuid) -> Vec<Uuid> {
        self.identities
            .values()
            .filter(|i| i.role == Role::User && i.parent_id == Some(broker_id))
            .map(|i| i.id)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    /// State at `begin`; `None` once committed.
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn identities(&mut self, scope: IdentityScope) -> Box<dyn IdentityRepository + '_> {
        Box::new(MemoryIdentities {
            state: &mut *self.guard,
            scope,
        })
    }

    fn accounts(&mut self) -> Box<dyn ServiceAccountRepository + '_> {
        Box::new(MemoryServiceAccounts {
            state: &mut *self.guard,
        })
    }

    fn permissions(&mut self) -> Box<dyn PermissionRepository + '_> {
        Box::new(MemoryPermissions {
            state: &mut *self.guard,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Drop restores the snapshot.
        Ok(())
    }
}

struct MemoryIdentities<'a> {
    state: &'a mut MemoryState,
    scope: IdentityScope,
}

impl MemoryIdentities<'_> {
    fn in_scope(&self, id: Uuid) -> Option<&Identity> {
        self.state
            .identities
            .get(&id)
            .filter(|i| self.scope.admits(i.role))
    }
}

#[async_trait]
impl IdentityRepository for MemoryIdentities<'_> {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.in_scope(id).cloned())
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .state
            .identities
            .values()
            .find(|i| self.scope.admits(i.role) && i.email == email)
            .cloned())
    }

    async fn insert(&mut self, identity: &Identity) -> Result<(), StoreError> {
        if !self.scope.admits(identity.role) {
            return Err(StoreError::InvalidData(format!(
                "role {} does not belong in this repository",
                identity.role
            )));
        }
        if (identity.role == Role::User) != identity.parent_id.is_some() {
            return Err(StoreError::Query(
                "only clients carry a parent".to_string(),
            ));
        }

        let identities = &self.state.identities;
        if identities.contains_key(&identity.id) {
            return Err(StoreError::UniqueViolation { field: "id".into() });
        }
        let email = normalize_email(&identity.email);
        if identities.values().any(|i| i.email == email) {
            return Err(StoreError::UniqueViolation {
                field: "email".into(),
            });
        }
        if let Some(phone) = &identity.phone {
            if identities.values().any(|i| i.phone.as_ref() == Some(phone)) {
                return Err(StoreError::UniqueViolation {
                    field: "phone".into(),
                });
            }
        }
        if let Some(parent_id) = identity.parent_id {
            let parent_is_broker = identities
                .get(&parent_id)
                .is_some_and(|p| p.role == Role::Broker);
            if !parent_is_broker {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "parent {} is not a broker",
                    parent_id
                )));
            }
        }

        let mut stored = identity.clone();
        stored.email = email;
        self.state.identities.insert(stored.id, stored);
        Ok(())
    }

    async fn activate(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let scope = self.scope;
        match self.state.identities.get_mut(&id) {
            Some(identity) if scope.admits(identity.role) => {
                identity.is_active = true;
                identity.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_password_hash(&mut self, id: Uuid, hash: &str) -> Result<bool, StoreError> {
        let scope = self.scope;
        match self.state.identities.get_mut(&id) {
            Some(identity) if scope.admits(identity.role) => {
                identity.password_hash = hash.to_string();
                identity.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Identity>, StoreError> {
        let mut children: Vec<Identity> = self
            .state
            .identities
            .values()
            .filter(|i| self.scope.admits(i.role) && i.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|i| i.created_at);
        Ok(children)
    }
}

struct MemoryServiceAccounts<'a> {
    state: &'a mut MemoryState,
}

#[async_trait]
impl ServiceAccountRepository for MemoryServiceAccounts<'_> {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ServiceAccount>, StoreError> {
        Ok(self.state.accounts.get(&id).cloned())
    }

    async fn insert(&mut self, account: &ServiceAccount) -> Result<(), StoreError> {
        if !self.state.identities.contains_key(&account.broker_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "broker {} does not exist",
                account.broker_id
            )));
        }
        if self.state.accounts.values().any(|a| {
            a.broker_id == account.broker_id && a.service_id == account.service_id
        }) {
            return Err(StoreError::UniqueViolation {
                field: "service_id".into(),
            });
        }
        self.state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn list_by_broker(&mut self, broker_id: Uuid) -> Result<Vec<ServiceAccount>, StoreError> {
        let mut accounts: Vec<ServiceAccount> = self
            .state
            .accounts
            .values()
            .filter(|a| a.broker_id == broker_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn update_credentials(
        &mut self,
        id: Uuid,
        broker_id: Uuid,
        login: &str,
        secret: &str,
    ) -> Result<bool, StoreError> {
        match self.state.accounts.get_mut(&id) {
            Some(account) if account.broker_id == broker_id => {
                account.login = login.to_string();
                account.secret = secret.to_string();
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&mut self, id: Uuid, broker_id: Uuid) -> Result<bool, StoreError> {
        let owned = self
            .state
            .accounts
            .get(&id)
            .is_some_and(|a| a.broker_id == broker_id);
        if !owned {
            return Ok(false);
        }
        self.state.accounts.remove(&id);
        self.state
            .permissions
            .retain(|_, p| p.service_account_id != id);
        Ok(true)
    }

    async fn list_tradable(&mut self, client_id: Uuid) -> Result<Vec<ServiceAccountRef>, StoreError> {
        let mut accounts: Vec<&ServiceAccount> = self
            .state
            .permissions
            .values()
            .filter(|p| p.client_id == client_id && p.can_trade)
            .filter_map(|p| self.state.accounts.get(&p.service_account_id))
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts.into_iter().map(ServiceAccount::summary).collect())
    }
}

struct MemoryPermissions<'a> {
    state: &'a mut MemoryState,
}

#[async_trait]
impl PermissionRepository for MemoryPermissions<'_> {
    async fn materialize_for_client(
        &mut self,
        client_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError> {
        if !self.state.identities.contains_key(&client_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "client {} does not exist",
                client_id
            )));
        }
        let account_ids: Vec<Uuid> = self
            .state
            .accounts
            .values()
            .filter(|a| a.broker_id == broker_id)
            .map(|a| a.id)
            .collect();
        let mut created = 0;
        for account_id in account_ids {
            if self.state.grant(account_id, client_id) {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn materialize_for_account(
        &mut self,
        service_account_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, StoreError> {
        if !self.state.accounts.contains_key(&service_account_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "service account {} does not exist",
                service_account_id
            )));
        }
        let mut created = 0;
        for client_id in self.state.children_of(broker_id) {
            if self.state.grant(service_account_id, client_id) {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn set_can_trade(
        &mut self,
        broker_id: Uuid,
        service_account_id: Uuid,
        client_id: Uuid,
        can_trade: bool,
    ) -> Result<bool, StoreError> {
        let account_owned = self
            .state
            .accounts
            .get(&service_account_id)
            .is_some_and(|a| a.broker_id == broker_id);
        let client_owned = self
            .state
            .identities
            .get(&client_id)
            .is_some_and(|c| c.parent_id == Some(broker_id));
        if !(account_owned && client_owned) {
            return Ok(false);
        }
        match self
            .state
            .permissions
            .values_mut()
            .find(|p| p.service_account_id == service_account_id && p.client_id == client_id)
        {
            Some(permission) => {
                permission.can_trade = can_trade;
                permission.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn can_trade(
        &mut self,
        service_account_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .state
            .permissions
            .values()
            .find(|p| p.service_account_id == service_account_id && p.client_id == client_id)
            .map(|p| p.can_trade))
    }

    async fn list_for_account(
        &mut self,
        service_account_id: Uuid,
    ) -> Result<Vec<Permission>, StoreError> {
        let mut rows: Vec<Permission> = self
            .state
            .permissions
            .values()
            .filter(|p| p.service_account_id == service_account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn list_for_broker(&mut self, broker_id: Uuid) -> Result<Vec<Permission>, StoreError> {
        let accounts = &self.state.accounts;
        let mut rows: Vec<Permission> = self
            .state
            .permissions
            .values()
            .filter(|p| {
                accounts
                    .get(&p.service_account_id)
                    .is_some_and(|a| a.broker_id == broker_id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentityProfile;

    fn identity(role: Role, parent_id: Option<Uuid>, email: &str) -> Identity {
        Identity::new(
            role,
            parent_id,
            IdentityProfile {
                first_name: "Test".into(),
                last_name: "User".into(),
                email: email.into(),
                phone: None,
            },
            "hash".into(),
        )
    }

    #[tokio::test]
    async fn uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        let broker = identity(Role::Broker, None, "b@x.com");

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&broker).await.unwrap();
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert!(uow.brokers().find_by_id(broker.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_work_is_visible() {
        let store = MemoryStore::new();
        let broker = identity(Role::Broker, None, "b@x.com");

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&broker).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let found = uow.brokers().find_by_email("B@X.COM").await.unwrap();
        assert_eq!(found.map(|b| b.id), Some(broker.id));
    }

    #[tokio::test]
    async fn email_is_unique_across_repositories() {
        let store = MemoryStore::new();
        let broker = identity(Role::Broker, None, "same@x.com");
        let client = identity(Role::User, Some(broker.id), "SAME@x.com");

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&broker).await.unwrap();
        let err = uow.clients().insert(&client).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { field } if field == "email"));
    }

    #[tokio::test]
    async fn scopes_hide_each_others_identities() {
        let store = MemoryStore::new();
        let broker = identity(Role::Broker, None, "b@x.com");
        let client = identity(Role::User, Some(broker.id), "c@x.com");

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&broker).await.unwrap();
        uow.clients().insert(&client).await.unwrap();

        assert!(uow.clients().find_by_id(broker.id).await.unwrap().is_none());
        assert!(uow.brokers().find_by_email("c@x.com").await.unwrap().is_none());
        assert!(uow.clients().insert(&broker).await.is_err());
    }

    #[tokio::test]
    async fn parent_must_be_a_broker() {
        let store = MemoryStore::new();
        let admin = identity(Role::Admin, None, "a@x.com");
        let client = identity(Role::User, Some(admin.id), "c@x.com");

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&admin).await.unwrap();
        let err = uow.clients().insert(&client).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn deleting_an_account_cascades_to_permissions() {
        let store = MemoryStore::new();
        let broker = identity(Role::Broker, None, "b@x.com");
        let client = identity(Role::User, Some(broker.id), "c@x.com");
        let account = ServiceAccount::new(broker.id, Uuid::new_v4(), "l".into(), "s".into());

        let mut uow = store.begin().await.unwrap();
        uow.brokers().insert(&broker).await.unwrap();
        uow.clients().insert(&client).await.unwrap();
        uow.accounts().insert(&account).await.unwrap();
        assert_eq!(
            uow.permissions()
                .materialize_for_account(account.id, broker.id)
                .await
                .unwrap(),
            1
        );

        assert!(uow.accounts().delete(account.id, broker.id).await.unwrap());
        assert!(uow
            .permissions()
            .list_for_account(account.id)
            .await
            .unwrap()
            .is_empty());
    }
}
