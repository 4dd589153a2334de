use crate::domain::credits::{CreditAccount, CreditAmount, GrantKey, GrantOutcome, UserId};
use crate::domain::payment::{
    PaymentChange, PaymentRecord, PaymentStatus, PaymentTransition, Subscription,
};
use crate::domain::ports::{CreditAccountStore, PaymentStore, ProjectStore, SubscriptionStore};
use crate::domain::project::{Project, ProjectChange, ProjectId, ProjectStatus, ProjectUpdate};
use crate::error::{BustError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<UserId, CreditAccount>,
    applied_grants: HashSet<GrantKey>,
}

/// A thread-safe in-memory store for credit accounts.
///
/// Each conditional update runs under the write lock, which makes it atomic
/// for every task sharing this store.
#[derive(Default, Clone)]
pub struct InMemoryCreditAccountStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryCreditAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditAccountStore for InMemoryCreditAccountStore {
    async fn insert(&self, account: CreditAccount) -> Result<()> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.user_id) {
            return Err(BustError::ValidationError(format!(
                "Credit account already exists for {}",
                account.user_id
            )));
        }
        state.accounts.insert(account.user_id, account);
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<CreditAccount>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&user_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<CreditAccount>> {
        let state = self.state.read().await;
        Ok(state.accounts.values().cloned().collect())
    }

    async fn debit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or(BustError::UserNotFound(user_id))?;
        account.spend(amount)?;
        Ok(account.clone())
    }

    async fn credit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or(BustError::UserNotFound(user_id))?;
        account.earn(amount)?;
        Ok(account.clone())
    }

    async fn credit_once(
        &self,
        user_id: UserId,
        amount: CreditAmount,
        key: &GrantKey,
    ) -> Result<GrantOutcome> {
        let mut state = self.state.write().await;
        if state.applied_grants.contains(key) {
            return Ok(GrantOutcome::AlreadyApplied);
        }
        let account = state
            .accounts
            .get_mut(&user_id)
            .ok_or(BustError::UserNotFound(user_id))?;
        account.earn(amount)?;
        let account = account.clone();
        state.applied_grants.insert(key.clone());
        Ok(GrantOutcome::Applied(account))
    }

    async fn grant_applied(&self, key: &GrantKey) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.applied_grants.contains(key))
    }
}

/// A thread-safe in-memory store for payment records, keyed by external id.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<String, PaymentRecord>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: PaymentRecord) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.external_payment_id) {
            return Err(BustError::ValidationError(format!(
                "Duplicate payment id {}",
                payment.external_payment_id
            )));
        }
        payments.insert(payment.external_payment_id.clone(), payment);
        Ok(())
    }

    async fn get(&self, external_payment_id: &str) -> Result<Option<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments.get(external_payment_id).cloned())
    }

    async fn transition(
        &self,
        external_payment_id: &str,
        change: PaymentChange,
    ) -> Result<PaymentTransition> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(external_payment_id)
            .ok_or_else(|| BustError::PaymentNotFound(external_payment_id.to_string()))?;
        let mut updated = payment.clone();
        match updated.apply(change) {
            Ok(()) => {
                *payment = updated.clone();
                Ok(PaymentTransition::Applied(updated))
            }
            Err(e) if e.is_benign() => Ok(PaymentTransition::Rejected(payment.clone())),
            Err(e) => Err(e),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert_if_absent(&self, subscription: Subscription) -> Result<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .entry(subscription.external_subscription_id.clone())
            .or_insert(subscription);
        Ok(stored.clone())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory store for projects.
#[derive(Default, Clone)]
pub struct InMemoryProjectStore {
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn insert(&self, project: Project) -> Result<()> {
        let mut projects = self.projects.write().await;
        projects.insert(project.id, project);
        Ok(())
    }

    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>> {
        let projects = self.projects.read().await;
        Ok(projects.get(&project_id).cloned())
    }

    async fn update(&self, project_id: ProjectId, change: ProjectChange) -> Result<ProjectUpdate> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(&project_id)
            .ok_or(BustError::ProjectNotFound(project_id))?;
        let mut updated = project.clone();
        match updated.apply(change) {
            Ok(()) => {
                *project = updated.clone();
                Ok(ProjectUpdate::Applied(updated))
            }
            Err(e) if e.is_benign() => Ok(ProjectUpdate::Rejected(project.clone())),
            Err(e) => Err(e),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plans::PlanType;
    use crate::domain::project::{AssetRef, DispatchReason, GenerationConfig};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_credit_account_store_debit_is_conditional() {
        let store = InMemoryCreditAccountStore::new();
        let user = Uuid::new_v4();
        store.insert(CreditAccount::open(user, 1)).await.unwrap();

        let account = store.debit(user, CreditAmount::ONE).await.unwrap();
        assert_eq!(account.credits, 0);

        let second = store.debit(user, CreditAmount::ONE).await;
        assert!(matches!(second, Err(BustError::InsufficientCredits { .. })));
        assert_eq!(store.get(user).await.unwrap().unwrap().credits, 0);
    }

    #[tokio::test]
    async fn test_credit_account_store_rejects_duplicates_and_unknown_users() {
        let store = InMemoryCreditAccountStore::new();
        let user = Uuid::new_v4();
        store.insert(CreditAccount::open(user, 5)).await.unwrap();
        assert!(store.insert(CreditAccount::open(user, 5)).await.is_err());

        let stranger = Uuid::new_v4();
        assert!(matches!(
            store.credit(stranger, CreditAmount::ONE).await,
            Err(BustError::UserNotFound(id)) if id == stranger
        ));
    }

    #[tokio::test]
    async fn test_credit_once_applies_a_key_once() {
        let store = InMemoryCreditAccountStore::new();
        let user = Uuid::new_v4();
        store.insert(CreditAccount::open(user, 0)).await.unwrap();
        let key = GrantKey::for_payment("pi_1");
        let amount = CreditAmount::new(150).unwrap();

        let first = store.credit_once(user, amount, &key).await.unwrap();
        assert!(matches!(first, GrantOutcome::Applied(ref a) if a.credits == 150));
        let second = store.credit_once(user, amount, &key).await.unwrap();
        assert_eq!(second, GrantOutcome::AlreadyApplied);

        assert!(store.grant_applied(&key).await.unwrap());
        assert_eq!(store.get(user).await.unwrap().unwrap().credits, 150);
    }

    #[tokio::test]
    async fn test_payment_transition_is_compare_and_set() {
        let store = InMemoryPaymentStore::new();
        let payment = PaymentRecord::pending(
            "pi_1".into(),
            Uuid::new_v4(),
            PlanType::Credits,
            None,
            dec!(9.99),
            25,
            Utc::now(),
        )
        .unwrap();
        store.insert(payment.clone()).await.unwrap();
        assert!(store.insert(payment).await.is_err());

        let complete = || PaymentChange::Complete {
            at: Utc::now(),
            payload: serde_json::Value::Null,
        };
        assert!(matches!(
            store.transition("pi_1", complete()).await.unwrap(),
            PaymentTransition::Applied(_)
        ));
        assert!(matches!(
            store.transition("pi_1", complete()).await.unwrap(),
            PaymentTransition::Rejected(p) if p.status == PaymentStatus::Completed
        ));
        assert!(matches!(
            store.transition("missing", complete()).await,
            Err(BustError::PaymentNotFound(_))
        ));
        assert_eq!(
            store
                .list_by_status(PaymentStatus::Completed)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_project_store_claims() {
        let store = InMemoryProjectStore::new();
        let mut project = Project::new(
            Uuid::new_v4(),
            "Bust",
            None,
            GenerationConfig::default(),
            Utc::now(),
        )
        .unwrap();
        project.input = Some(AssetRef {
            file_id: Uuid::new_v4(),
            key: "in.png".into(),
            url: "/uploads/in.png".into(),
        });
        let id = project.id;
        store.insert(project).await.unwrap();

        let claim = || ProjectChange::ClaimDispatch {
            reason: DispatchReason::Initial,
            stale_before: Utc::now() - chrono::Duration::minutes(10),
            at: Utc::now(),
        };
        assert!(matches!(
            store.update(id, claim()).await.unwrap(),
            ProjectUpdate::Applied(p) if p.status == ProjectStatus::Processing
        ));
        assert!(matches!(
            store.update(id, claim()).await.unwrap(),
            ProjectUpdate::Rejected(p) if p.attempt == 1
        ));
        assert!(matches!(
            store.update(Uuid::new_v4(), claim()).await,
            Err(BustError::ProjectNotFound(_))
        ));
    }
}
