//! Broker -> service account -> client permission graph.

use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::metrics::{record_materialized, MaterializeTrigger};
use crate::db::{Store, UnitOfWork};
use crate::models::ServiceAccountRef;

#[derive(Clone)]
pub struct PermissionEngine {
    store: Arc<dyn Store>,
}

impl PermissionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Grants the new client a disabled row on every account of its broker.
    /// Runs inside the caller's transaction; re-running it is a no-op.
    pub async fn materialize_on_client_registration(
        uow: &mut dyn UnitOfWork,
        client_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let created = uow
            .permissions()
            .materialize_for_client(client_id, broker_id)
            .await?;
        tracing::debug!(client_id = %client_id, broker_id = %broker_id, created, "Permissions materialized for client");
        record_materialized(MaterializeTrigger::ClientRegistered, created);
        Ok(created)
    }

    /// Grants every existing client of the broker a disabled row on the new
    /// account. Runs inside the caller's transaction.
    pub async fn materialize_on_service_account_creation(
        uow: &mut dyn UnitOfWork,
        service_account_id: Uuid,
        broker_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let created = uow
            .permissions()
            .materialize_for_account(service_account_id, broker_id)
            .await?;
        tracing::debug!(service_account_id = %service_account_id, broker_id = %broker_id, created, "Permissions materialized for account");
        record_materialized(MaterializeTrigger::AccountOpened, created);
        Ok(created)
    }

    /// Fails with `InsufficientPermission` unless the broker owns the account
    /// and the client, and the permission row exists.
    pub async fn set_can_trade(
        &self,
        broker_id: Uuid,
        service_account_id: Uuid,
        client_id: Uuid,
        can_trade: bool,
    ) -> Result<(), ServiceError> {
        let mut uow = self.store.begin().await?;
        let updated = uow
            .permissions()
            .set_can_trade(broker_id, service_account_id, client_id, can_trade)
            .await?;
        if !updated {
            uow.rollback().await?;
            tracing::warn!(
                broker_id = %broker_id,
                service_account_id = %service_account_id,
                client_id = %client_id,
                "Permission change rejected"
            );
            return Err(ServiceError::InsufficientPermission);
        }
        uow.commit().await?;

        tracing::info!(
            broker_id = %broker_id,
            service_account_id = %service_account_id,
            client_id = %client_id,
            can_trade,
            "Permission updated"
        );
        Ok(())
    }

    pub async fn has_trade_permission(
        &self,
        service_account_id: Uuid,
        client_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let mut uow = self.store.begin().await?;
        let flag = uow
            .permissions()
            .can_trade(service_account_id, client_id)
            .await?;
        uow.rollback().await?;
        Ok(flag.unwrap_or(false))
    }

    pub async fn list_tradable_accounts(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<ServiceAccountRef>, ServiceError> {
        let mut uow = self.store.begin().await?;
        let accounts = uow.accounts().list_tradable(client_id).await?;
        uow.rollback().await?;
        Ok(accounts)
    }
}
