use crate::domain::credits::{CreditAccount, CreditAmount, GrantKey, GrantOutcome, UserId};
use crate::domain::payment::{
    PaymentChange, PaymentRecord, PaymentStatus, PaymentTransition, Subscription,
};
use crate::domain::ports::{CreditAccountStore, PaymentStore, ProjectStore, SubscriptionStore};
use crate::domain::project::{Project, ProjectChange, ProjectId, ProjectStatus, ProjectUpdate};
use crate::error::{BustError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for credit balances.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for applied grant keys.
pub const CF_GRANTS: &str = "grants";
/// Column Family for payment records, keyed by external payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for subscriptions, keyed by external subscription id.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Column Family for projects.
pub const CF_PROJECTS: &str = "projects";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_ACCOUNTS,
    CF_GRANTS,
    CF_PAYMENTS,
    CF_SUBSCRIPTIONS,
    CF_PROJECTS,
];

/// A persistent store implementation using RocksDB.
///
/// RocksDB holds an exclusive lock on its directory, so one process owns the
/// data. Conditional updates read and write under `write_gate`; effects that
/// touch several keys are committed with one `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BustError::internal(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl CreditAccountStore for RocksDBStore {
    async fn insert(&self, account: CreditAccount) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let key = account.user_id.as_bytes();
        if self.read::<CreditAccount>(CF_ACCOUNTS, key)?.is_some() {
            return Err(BustError::ValidationError(format!(
                "Credit account already exists for {}",
                account.user_id
            )));
        }
        self.write(CF_ACCOUNTS, key, &account)
    }

    async fn get(&self, user_id: UserId) -> Result<Option<CreditAccount>> {
        self.read(CF_ACCOUNTS, user_id.as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<CreditAccount>> {
        self.scan(CF_ACCOUNTS)
    }

    async fn debit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount> {
        let _gate = self.write_gate.lock().await;
        let mut account: CreditAccount = self
            .read(CF_ACCOUNTS, user_id.as_bytes())?
            .ok_or(BustError::UserNotFound(user_id))?;
        account.spend(amount)?;
        self.write(CF_ACCOUNTS, user_id.as_bytes(), &account)?;
        Ok(account)
    }

    async fn credit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount> {
        let _gate = self.write_gate.lock().await;
        let mut account: CreditAccount = self
            .read(CF_ACCOUNTS, user_id.as_bytes())?
            .ok_or(BustError::UserNotFound(user_id))?;
        account.earn(amount)?;
        self.write(CF_ACCOUNTS, user_id.as_bytes(), &account)?;
        Ok(account)
    }

    async fn credit_once(
        &self,
        user_id: UserId,
        amount: CreditAmount,
        key: &GrantKey,
    ) -> Result<GrantOutcome> {
        let _gate = self.write_gate.lock().await;
        let grants = self.cf(CF_GRANTS)?;
        if self.db.get_pinned_cf(grants, key.as_str())?.is_some() {
            return Ok(GrantOutcome::AlreadyApplied);
        }
        let mut account: CreditAccount = self
            .read(CF_ACCOUNTS, user_id.as_bytes())?
            .ok_or(BustError::UserNotFound(user_id))?;
        account.earn(amount)?;

        // Balance and marker land together or not at all.
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            user_id.as_bytes(),
            serde_json::to_vec(&account)?,
        );
        batch.put_cf(grants, key.as_str(), amount.value().to_be_bytes());
        self.db.write(batch)?;
        Ok(GrantOutcome::Applied(account))
    }

    async fn grant_applied(&self, key: &GrantKey) -> Result<bool> {
        let grants = self.cf(CF_GRANTS)?;
        Ok(self.db.get_pinned_cf(grants, key.as_str())?.is_some())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: PaymentRecord) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let key = payment.external_payment_id.as_bytes();
        if self.read::<PaymentRecord>(CF_PAYMENTS, key)?.is_some() {
            return Err(BustError::ValidationError(format!(
                "Duplicate payment id {}",
                payment.external_payment_id
            )));
        }
        self.write(CF_PAYMENTS, key, &payment)
    }

    async fn get(&self, external_payment_id: &str) -> Result<Option<PaymentRecord>> {
        self.read(CF_PAYMENTS, external_payment_id.as_bytes())
    }

    async fn transition(
        &self,
        external_payment_id: &str,
        change: PaymentChange,
    ) -> Result<PaymentTransition> {
        let _gate = self.write_gate.lock().await;
        let key = external_payment_id.as_bytes();
        let current: PaymentRecord = self
            .read(CF_PAYMENTS, key)?
            .ok_or_else(|| BustError::PaymentNotFound(external_payment_id.to_string()))?;
        let mut updated = current.clone();
        match updated.apply(change) {
            Ok(()) => {
                self.write(CF_PAYMENTS, key, &updated)?;
                Ok(PaymentTransition::Applied(updated))
            }
            Err(e) if e.is_benign() => Ok(PaymentTransition::Rejected(current)),
            Err(e) => Err(e),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>> {
        let payments: Vec<PaymentRecord> = self.scan(CF_PAYMENTS)?;
        Ok(payments.into_iter().filter(|p| p.user_id == user_id).collect())
    }

    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRecord>> {
        let payments: Vec<PaymentRecord> = self.scan(CF_PAYMENTS)?;
        Ok(payments.into_iter().filter(|p| p.status == status).collect())
    }
}

#[async_trait]
impl SubscriptionStore for RocksDBStore {
    async fn insert_if_absent(&self, subscription: Subscription) -> Result<Subscription> {
        let _gate = self.write_gate.lock().await;
        let key = subscription.external_subscription_id.as_bytes();
        if let Some(existing) = self.read::<Subscription>(CF_SUBSCRIPTIONS, key)? {
            return Ok(existing);
        }
        self.write(CF_SUBSCRIPTIONS, key, &subscription)?;
        Ok(subscription)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Subscription>> {
        let subscriptions: Vec<Subscription> = self.scan(CF_SUBSCRIPTIONS)?;
        Ok(subscriptions
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect())
    }
}

#[async_trait]
impl ProjectStore for RocksDBStore {
    async fn insert(&self, project: Project) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.write(CF_PROJECTS, project.id.as_bytes(), &project)
    }

    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>> {
        self.read(CF_PROJECTS, project_id.as_bytes())
    }

    async fn update(&self, project_id: ProjectId, change: ProjectChange) -> Result<ProjectUpdate> {
        let _gate = self.write_gate.lock().await;
        let current: Project = self
            .read(CF_PROJECTS, project_id.as_bytes())?
            .ok_or(BustError::ProjectNotFound(project_id))?;
        let mut updated = current.clone();
        match updated.apply(change) {
            Ok(()) => {
                self.write(CF_PROJECTS, project_id.as_bytes(), &updated)?;
                Ok(ProjectUpdate::Applied(updated))
            }
            Err(e) if e.is_benign() => Ok(ProjectUpdate::Rejected(current)),
            Err(e) => Err(e),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Project>> {
        let projects: Vec<Project> = self.scan(CF_PROJECTS)?;
        Ok(projects.into_iter().filter(|p| p.user_id == user_id).collect())
    }

    async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>> {
        let projects: Vec<Project> = self.scan(CF_PROJECTS)?;
        Ok(projects.into_iter().filter(|p| p.status == status).collect())
    }
}
