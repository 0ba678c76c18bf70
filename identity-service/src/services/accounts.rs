//! Account lifecycle: creation and status transitions.

use std::sync::Arc;

use uuid::Uuid;

use super::clock::Clock;
use super::error::ServiceError;
use crate::models::{Account, AccountStatus, Role};
use crate::store::AccountRepository;

#[derive(Clone)]
pub struct AccountLifecycle<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: AccountRepository> AccountLifecycle<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create(
        &self,
        tx: &mut S::Tx,
        role: Role,
        initial_status: AccountStatus,
    ) -> Result<Account, ServiceError> {
        let account = Account::new(role, initial_status, self.clock.now());
        self.store.insert_account(tx, &account).await?;

        tracing::debug!(account_id = %account.account_id, status = account.status.as_str(), "Account created");
        Ok(account)
    }

    pub async fn get(&self, tx: &mut S::Tx, account_id: Uuid) -> Result<Account, ServiceError> {
        self.store
            .find_account(tx, account_id)
            .await?
            .ok_or(ServiceError::NotFound("Account"))
    }

    /// Apply a status change along an allowed edge.
    ///
    /// Re-applying the current status is rejected like any other edge that
    /// is not in the table.
    pub async fn set_status(
        &self,
        tx: &mut S::Tx,
        account_id: Uuid,
        new_status: AccountStatus,
    ) -> Result<Account, ServiceError> {
        let mut account = self.get(tx, account_id).await?;

        if !account.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidAccountState(format!(
                "{} -> {} is not allowed",
                account.status.as_str(),
                new_status.as_str()
            )));
        }

        if !self.store.update_account_status(tx, account_id, new_status).await? {
            return Err(ServiceError::NotFound("Account"));
        }

        tracing::debug!(
            account_id = %account_id,
            from = account.status.as_str(),
            to = new_status.as_str(),
            "Account status changed"
        );
        account.status = new_status;
        Ok(account)
    }
}
