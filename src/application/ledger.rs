use crate::domain::credits::{CreditAccount, CreditAmount, GrantKey, GrantOutcome, UserId};
use crate::domain::ports::CreditAccountStoreRef;
use crate::error::{BustError, Result};
use tracing::{info, warn};

/// Target for ledger audit events, filterable independently of other logs.
pub const AUDIT_TARGET: &str = "bustmaker::audit";

/// The Credit Ledger.
///
/// `CreditLedger` is the only component that moves credits. Every mutation is
/// delegated to a single conditional update in the [`CreditAccountStore`]
/// and produces one audit event carrying the operation, the amount, the
/// resulting balance and the caller's reference.
///
/// [`CreditAccountStore`]: crate::domain::ports::CreditAccountStore
#[derive(Clone)]
pub struct CreditLedger {
    store: CreditAccountStoreRef,
    starting_grant: u64,
}

impl CreditLedger {
    /// Creates a new `CreditLedger`.
    ///
    /// # Arguments
    ///
    /// * `store` - Balances and applied-grant markers.
    /// * `starting_grant` - Credits given to every newly opened account.
    pub fn new(store: CreditAccountStoreRef, starting_grant: u64) -> Self {
        Self {
            store,
            starting_grant,
        }
    }

    pub async fn open_account(&self, user_id: UserId) -> Result<CreditAccount> {
        let account = CreditAccount::open(user_id, self.starting_grant);
        self.store.insert(account.clone()).await?;
        info!(
            target: AUDIT_TARGET,
            operation = "open",
            %user_id,
            amount = self.starting_grant,
            balance = account.credits,
            reference = "signup",
            "account opened"
        );
        Ok(account)
    }

    /// Debits `amount` credits, returning the new balance.
    ///
    /// Fails with `InsufficientCredits` when the balance does not cover the
    /// amount. Concurrent spends on one user are serialized by the store.
    pub async fn spend(&self, user_id: UserId, amount: u64, reference: &str) -> Result<u64> {
        let amount = CreditAmount::new(amount)?;
        match self.store.debit(user_id, amount).await {
            Ok(account) => {
                info!(
                    target: AUDIT_TARGET,
                    operation = "spend",
                    %user_id,
                    amount = amount.value(),
                    balance = account.credits,
                    reference,
                    "credits spent"
                );
                Ok(account.credits)
            }
            Err(e @ BustError::InsufficientCredits { .. }) => {
                warn!(
                    target: AUDIT_TARGET,
                    operation = "spend_rejected",
                    %user_id,
                    amount = amount.value(),
                    reference,
                    "{e}"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Credits `amount`, returning the new balance.
    pub async fn earn(&self, user_id: UserId, amount: u64, reference: &str) -> Result<u64> {
        let amount = CreditAmount::new(amount)?;
        let account = self.store.credit(user_id, amount).await?;
        info!(
            target: AUDIT_TARGET,
            operation = "earn",
            %user_id,
            amount = amount.value(),
            balance = account.credits,
            reference,
            "credits earned"
        );
        Ok(account.credits)
    }

    /// Credits `amount` under `key` unless that key was applied before.
    ///
    /// Safe to repeat: only the first call that reaches the store moves the
    /// balance.
    pub async fn earn_once(
        &self,
        user_id: UserId,
        amount: u64,
        key: &GrantKey,
    ) -> Result<GrantOutcome> {
        let amount = CreditAmount::new(amount)?;
        let outcome = self.store.credit_once(user_id, amount, key).await?;
        match &outcome {
            GrantOutcome::Applied(account) => info!(
                target: AUDIT_TARGET,
                operation = "earn",
                %user_id,
                amount = amount.value(),
                balance = account.credits,
                reference = key.as_str(),
                "credits granted"
            ),
            GrantOutcome::AlreadyApplied => info!(
                target: AUDIT_TARGET,
                operation = "earn_skipped",
                %user_id,
                amount = amount.value(),
                reference = key.as_str(),
                "grant already applied"
            ),
        }
        Ok(outcome)
    }

    pub async fn is_applied(&self, key: &GrantKey) -> Result<bool> {
        self.store.grant_applied(key).await
    }

    pub async fn account(&self, user_id: UserId) -> Result<CreditAccount> {
        self.store
            .get(user_id)
            .await?
            .ok_or(BustError::UserNotFound(user_id))
    }

    pub async fn balance(&self, user_id: UserId) -> Result<u64> {
        Ok(self.account(user_id).await?.credits)
    }

    /// Every account, ordered by user id for stable exports.
    pub async fn accounts(&self) -> Result<Vec<CreditAccount>> {
        let mut accounts = self.store.get_all().await?;
        accounts.sort_by_key(|a| a.user_id);
        Ok(accounts)
    }
}
