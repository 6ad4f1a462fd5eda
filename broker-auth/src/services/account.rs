//! Brokers' service accounts and the client listing built on them.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::authz::Principal;
use super::error::ServiceError;
use super::permission::PermissionEngine;
use crate::db::Store;
use crate::dtos::account::AccountCredentialsRequest;
use crate::models::{ClientPermissions, Identity, Permission, Role, ServiceAccount, ServiceAccountRef};

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    permissions: PermissionEngine,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, permissions: PermissionEngine) -> Self {
        Self { store, permissions }
    }

    /// Opens the account and grants every existing client of the broker a
    /// disabled permission on it, atomically.
    pub async fn create(
        &self,
        broker: &Identity,
        service_id: Uuid,
        req: AccountCredentialsRequest,
    ) -> Result<ServiceAccountRef, ServiceError> {
        let account = ServiceAccount::new(broker.id, service_id, req.login, req.secret);

        let mut uow = self.store.begin().await?;
        uow.accounts()
            .insert(&account)
            .await
            .map_err(ServiceError::from_account_insert)?;
        PermissionEngine::materialize_on_service_account_creation(uow.as_mut(), account.id, broker.id)
            .await?;
        uow.commit().await?;

        tracing::info!(
            broker_id = %broker.id,
            service_account_id = %account.id,
            service_id = %service_id,
            "Service account created"
        );
        Ok(account.summary())
    }

    /// Brokers see their own accounts, clients the ones they may trade through.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<ServiceAccountRef>, ServiceError> {
        let identity = &principal.identity;
        match identity.role {
            Role::User => self.permissions.list_tradable_accounts(identity.id).await,
            Role::Broker | Role::Admin => {
                let mut uow = self.store.begin().await?;
                let accounts = uow.accounts().list_by_broker(identity.id).await?;
                uow.rollback().await?;
                Ok(accounts.iter().map(ServiceAccount::summary).collect())
            }
        }
    }

    pub async fn get(
        &self,
        principal: &Principal,
        account_id: Uuid,
    ) -> Result<ServiceAccountRef, ServiceError> {
        let mut uow = self.store.begin().await?;
        let account = uow.accounts().find_by_id(account_id).await?;
        uow.rollback().await?;
        let account = account.ok_or(ServiceError::NotFound("Service account"))?;

        let identity = &principal.identity;
        let allowed = match identity.role {
            Role::User => {
                self.permissions
                    .has_trade_permission(account.id, identity.id)
                    .await?
            }
            Role::Broker | Role::Admin => account.broker_id == identity.id,
        };

        if !allowed {
            tracing::warn!(identity_id = %identity.id, service_account_id = %account.id, "Account access denied");
            return Err(ServiceError::InsufficientPermission);
        }
        Ok(account.summary())
    }

    pub async fn update(
        &self,
        broker: &Identity,
        account_id: Uuid,
        req: AccountCredentialsRequest,
    ) -> Result<ServiceAccountRef, ServiceError> {
        let mut uow = self.store.begin().await?;
        let account = self.owned(uow.as_mut(), broker, account_id).await?;
        uow.accounts()
            .update_credentials(account.id, broker.id, &req.login, &req.secret)
            .await?;
        uow.commit().await?;

        tracing::info!(broker_id = %broker.id, service_account_id = %account.id, "Service account credentials updated");
        Ok(account.summary())
    }

    pub async fn delete(&self, broker: &Identity, account_id: Uuid) -> Result<(), ServiceError> {
        let mut uow = self.store.begin().await?;
        let account = self.owned(uow.as_mut(), broker, account_id).await?;
        uow.accounts().delete(account.id, broker.id).await?;
        uow.commit().await?;

        tracing::info!(broker_id = %broker.id, service_account_id = %account.id, "Service account deleted");
        Ok(())
    }

    /// The broker's clients, each with every permission row they hold.
    pub async fn list_clients(&self, broker: &Identity) -> Result<Vec<ClientPermissions>, ServiceError> {
        let mut uow = self.store.begin().await?;
        let clients = uow.clients().list_children(broker.id).await?;
        let rows = uow.permissions().list_for_broker(broker.id).await?;
        uow.rollback().await?;

        let mut by_client: HashMap<Uuid, Vec<Permission>> = HashMap::new();
        for row in rows {
            by_client.entry(row.client_id).or_default().push(row);
        }

        Ok(clients
            .iter()
            .map(|client| {
                let rows = by_client.remove(&client.id).unwrap_or_default();
                ClientPermissions::new(client, &rows)
            })
            .collect())
    }

    /// Missing accounts are 404; someone else's are 403.
    async fn owned(
        &self,
        uow: &mut dyn crate::db::UnitOfWork,
        broker: &Identity,
        account_id: Uuid,
    ) -> Result<ServiceAccount, ServiceError> {
        let account = uow
            .accounts()
            .find_by_id(account_id)
            .await?
            .ok_or(ServiceError::NotFound("Service account"))?;

        if account.broker_id != broker.id {
            tracing::warn!(broker_id = %broker.id, service_account_id = %account.id, "Broker does not own account");
            return Err(ServiceError::InsufficientPermission);
        }
        Ok(account)
    }
}
