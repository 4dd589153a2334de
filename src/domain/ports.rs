use super::credits::{CreditAccount, CreditAmount, GrantKey, GrantOutcome, UserId};
use super::payment::{PaymentChange, PaymentRecord, PaymentStatus, PaymentTransition, Subscription};
use super::plans::PlanType;
use super::project::{
    AssetRef, GenerationConfig, GenerationOutcome, Project, ProjectChange, ProjectId,
    ProjectStatus, ProjectUpdate,
};
use crate::error::{BustError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Balances and applied-grant markers. Every mutation is a single atomic
/// conditional update; callers never read-modify-write a balance.
#[async_trait]
pub trait CreditAccountStore: Send + Sync {
    /// Fails with `ValidationError` if the account already exists.
    async fn insert(&self, account: CreditAccount) -> Result<()>;
    async fn get(&self, user_id: UserId) -> Result<Option<CreditAccount>>;
    async fn get_all(&self) -> Result<Vec<CreditAccount>>;
    /// Debits only while `credits >= amount`, otherwise `InsufficientCredits`.
    async fn debit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount>;
    async fn credit(&self, user_id: UserId, amount: CreditAmount) -> Result<CreditAccount>;
    /// Credits and records `key` together, or does nothing if `key` was applied before.
    async fn credit_once(
        &self,
        user_id: UserId,
        amount: CreditAmount,
        key: &GrantKey,
    ) -> Result<GrantOutcome>;
    async fn grant_applied(&self, key: &GrantKey) -> Result<bool>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `ValidationError` on a duplicate external payment id.
    async fn insert(&self, payment: PaymentRecord) -> Result<()>;
    async fn get(&self, external_payment_id: &str) -> Result<Option<PaymentRecord>>;
    /// Compare-and-set on status, guarded by `PaymentRecord::apply`.
    async fn transition(
        &self,
        external_payment_id: &str,
        change: PaymentChange,
    ) -> Result<PaymentTransition>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentRecord>>;
    async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Keyed by `external_subscription_id`; the first write wins.
    async fn insert_if_absent(&self, subscription: Subscription) -> Result<Subscription>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Subscription>>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert(&self, project: Project) -> Result<()>;
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>>;
    /// Compare-and-set, guarded by `Project::apply`. `ProjectNotFound` if absent.
    async fn update(&self, project_id: ProjectId, change: ProjectChange) -> Result<ProjectUpdate>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Project>>;
    async fn list_by_status(&self, status: ProjectStatus) -> Result<Vec<Project>>;
}

pub const ALLOWED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// An image received by the upload endpoint.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        if !ALLOWED_IMAGE_TYPES.contains(&self.mime_type.as_str()) {
            return Err(BustError::ValidationError(
                "Invalid file type. Only JPEG, PNG, and WebP are allowed.".to_string(),
            ));
        }
        if self.bytes.is_empty() {
            return Err(BustError::ValidationError("No file uploaded".to_string()));
        }
        if self.bytes.len() > max_bytes {
            return Err(BustError::ValidationError(format!(
                "File exceeds the {max_bytes} byte limit"
            )));
        }
        Ok(())
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

/// Raw file storage for uploaded images.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn put(&self, owner: UserId, upload: &ImageUpload) -> Result<AssetRef>;
}

/// An opaque remote mesh generator.
///
/// Implementations report provider-side failures as
/// [`GenerationOutcome::Failure`]; the caller bounds the wait.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn dispatch(&self, input: &AssetRef, config: &GenerationConfig) -> GenerationOutcome;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub reference: Uuid,
    pub user_id: UserId,
    pub plan_type: PlanType,
    pub amount: Decimal,
    pub credits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// The payment provider's own view of a checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSession {
    pub id: String,
    pub payment_status: String,
    pub raw: serde_json::Value,
}

impl ProviderSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession>;
}

pub type CreditAccountStoreRef = Arc<dyn CreditAccountStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type SubscriptionStoreRef = Arc<dyn SubscriptionStore>;
pub type ProjectStoreRef = Arc<dyn ProjectStore>;
pub type AssetStoreRef = Arc<dyn AssetStore>;
pub type GenerationProviderRef = Arc<dyn GenerationProvider>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
