use super::credits::UserId;
use super::plans::{BillingInterval, PlanType};
use crate::error::{BustError, Result};
use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    /// Reserved for gateways that report an in-flight state. Nothing in this
    /// crate moves a record here, but a record stored with it stays open.
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Still waiting on the provider's verdict.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// A status transition requested on a payment record.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentChange {
    Complete {
        at: DateTime<Utc>,
        payload: serde_json::Value,
    },
    Fail {
        at: DateTime<Utc>,
        message: Option<String>,
    },
    Refund {
        at: DateTime<Utc>,
    },
}

/// Outcome of a compare-and-set status transition at the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentTransition {
    Applied(PaymentRecord),
    /// The guard did not hold; carries the record as currently persisted.
    Rejected(PaymentRecord),
}

/// One external payment attempt, keyed by `external_payment_id`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub external_payment_id: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub credits_amount: u64,
    pub plan_type: PlanType,
    pub billing_interval: Option<BillingInterval>,
    pub status: PaymentStatus,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Raw provider payload kept for audit once the payment completes.
    pub provider_payload: Option<serde_json::Value>,
}

impl PaymentRecord {
    pub fn pending(
        external_payment_id: String,
        user_id: UserId,
        plan_type: PlanType,
        billing_interval: Option<BillingInterval>,
        amount: Decimal,
        credits_amount: u64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if credits_amount == 0 {
            return Err(BustError::ValidationError(
                "Payment must grant a positive number of credits".to_string(),
            ));
        }
        if amount.is_sign_negative() {
            return Err(BustError::ValidationError(
                "Payment amount must not be negative".to_string(),
            ));
        }
        if external_payment_id.trim().is_empty() {
            return Err(BustError::ValidationError(
                "External payment id is required".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            external_payment_id,
            user_id,
            amount,
            currency: "USD".to_string(),
            credits_amount,
            plan_type,
            billing_interval,
            status: PaymentStatus::Pending,
            initiated_at: now,
            completed_at: None,
            failed_at: None,
            refunded_at: None,
            error_message: None,
            provider_payload: None,
        })
    }

    /// Applies a forward-only transition. Terminal states are immutable except
    /// `completed -> refunded`.
    pub fn apply(&mut self, change: PaymentChange) -> Result<()> {
        match change {
            PaymentChange::Complete { at, payload } if self.status.is_open() => {
                self.status = PaymentStatus::Completed;
                self.completed_at = Some(at);
                self.provider_payload = Some(payload);
                Ok(())
            }
            PaymentChange::Fail { at, message } if self.status.is_open() => {
                self.status = PaymentStatus::Failed;
                self.failed_at = Some(at);
                self.error_message = message;
                Ok(())
            }
            PaymentChange::Refund { at } if self.status == PaymentStatus::Completed => {
                self.status = PaymentStatus::Refunded;
                self.refunded_at = Some(at);
                Ok(())
            }
            change => Err(BustError::ConsistencyConflict(format!(
                "payment {} is {:?}, cannot apply {}",
                self.external_payment_id,
                self.status,
                change.name()
            ))),
        }
    }
}

impl PaymentChange {
    fn name(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Refund { .. } => "refund",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    /// The external payment id that paid for this period.
    pub external_subscription_id: String,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub amount: Decimal,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub monthly_credits: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
}

impl Subscription {
    /// Builds the active subscription paid for by a completed payment.
    pub fn activate(payment: &PaymentRecord, start: DateTime<Utc>) -> Result<Self> {
        if !payment.plan_type.is_subscription() {
            return Err(BustError::ValidationError(format!(
                "plan {} is not a subscription",
                payment.plan_type
            )));
        }
        let interval = payment.billing_interval.unwrap_or_default();
        let months = match interval {
            BillingInterval::Monthly => Months::new(1),
            BillingInterval::Yearly => Months::new(12),
        };
        let end_date = start
            .checked_add_months(months)
            .ok_or_else(|| BustError::internal("subscription end date out of range"))?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: payment.user_id,
            external_subscription_id: payment.external_payment_id.clone(),
            plan_type: payment.plan_type,
            status: SubscriptionStatus::Active,
            amount: payment.amount,
            currency: payment.currency.clone(),
            billing_interval: interval,
            monthly_credits: payment.credits_amount,
            start_date: start,
            end_date,
            next_billing_date: end_date,
        })
    }
}
