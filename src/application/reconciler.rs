use super::ledger::CreditLedger;
use crate::domain::credits::{GrantKey, GrantOutcome, UserId};
use crate::domain::payment::{
    PaymentChange, PaymentRecord, PaymentStatus, PaymentTransition, Subscription,
    SubscriptionStatus,
};
use crate::domain::plans::{BillingInterval, Catalogue, PlanType};
use crate::domain::ports::{
    CheckoutRequest, CheckoutSession, PaymentGatewayRef, PaymentStoreRef, SubscriptionStoreRef,
};
use crate::domain::signature::WebhookVerifier;
use crate::error::{BustError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// What the payment provider says happened to a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    Success,
    Failure { message: Option<String> },
}

/// Result of reconciling one provider event against the payment record.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// This call moved the payment to `completed`. `credited` is false only
    /// when a concurrent sweep applied the grant first.
    Completed { credited: bool },
    /// The payment was already completed; nothing was credited.
    AlreadyCompleted,
    Failed,
    /// The event does not apply to a payment in this state.
    Unchanged(PaymentStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookAck {
    Processed(Reconciliation),
    Ignored { event_type: String },
}

/// What a user asks to buy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PurchaseRequest {
    Subscription {
        plan: PlanType,
        interval: BillingInterval,
    },
    CreditPack {
        credits: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub payment: PaymentRecord,
    pub checkout: CheckoutSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSummary {
    pub credits: u64,
    pub total_earned: u64,
    pub total_spent: u64,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditSweepReport {
    pub examined: usize,
    pub regranted: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// The Payment Reconciler.
///
/// Turns provider events into payment-record transitions and exactly one
/// ledger grant per completed payment. The `completed` transition is the gate;
/// the grant that follows is keyed by payment id so it can be re-driven by
/// [`PaymentReconciler::reconcile_credits`] after a crash.
#[derive(Clone)]
pub struct PaymentReconciler {
    payments: PaymentStoreRef,
    subscriptions: SubscriptionStoreRef,
    ledger: CreditLedger,
    gateway: PaymentGatewayRef,
    verifier: WebhookVerifier,
    catalogue: Arc<Catalogue>,
}

impl PaymentReconciler {
    pub fn new(
        payments: PaymentStoreRef,
        subscriptions: SubscriptionStoreRef,
        ledger: CreditLedger,
        gateway: PaymentGatewayRef,
        verifier: WebhookVerifier,
        catalogue: Arc<Catalogue>,
    ) -> Self {
        Self {
            payments,
            subscriptions,
            ledger,
            gateway,
            verifier,
            catalogue,
        }
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Opens a checkout with the gateway and records the `pending` payment
    /// under the session id the gateway assigned.
    pub async fn record_intent(
        &self,
        user_id: UserId,
        plan_type: PlanType,
        interval: Option<BillingInterval>,
        amount: Decimal,
        credits: u64,
    ) -> Result<PaymentIntent> {
        if credits == 0 {
            return Err(BustError::ValidationError(
                "Payment must grant a positive number of credits".to_string(),
            ));
        }
        if amount.is_sign_negative() {
            return Err(BustError::ValidationError(
                "Payment amount must not be negative".to_string(),
            ));
        }
        self.ledger.account(user_id).await?;

        let reference = Uuid::new_v4();
        let checkout = self
            .gateway
            .create_checkout(&CheckoutRequest {
                reference,
                user_id,
                plan_type,
                amount,
                credits,
            })
            .await?;

        let mut payment = PaymentRecord::pending(
            checkout.session_id.clone(),
            user_id,
            plan_type,
            interval,
            amount,
            credits,
            Utc::now(),
        )?;
        payment.id = reference;
        self.payments.insert(payment.clone()).await?;
        info!(
            payment = %payment.external_payment_id,
            %user_id,
            plan = %plan_type,
            %amount,
            credits,
            "payment intent recorded"
        );
        Ok(PaymentIntent { payment, checkout })
    }

    /// Prices `request` from the catalogue and records the intent.
    pub async fn purchase(&self, user_id: UserId, request: PurchaseRequest) -> Result<PaymentIntent> {
        let quote = match request {
            PurchaseRequest::Subscription { plan, interval } => {
                if !plan.is_subscription() {
                    return Err(BustError::ValidationError(format!(
                        "Invalid plan type: {plan}"
                    )));
                }
                self.catalogue.quote_subscription(plan, interval)?
            }
            PurchaseRequest::CreditPack { credits } => self.catalogue.quote_credit_pack(credits)?,
        };
        self.record_intent(user_id, quote.plan_type, quote.interval, quote.amount, quote.credits)
            .await
    }

    /// Verifies and dispatches a raw webhook delivery.
    ///
    /// The signature is checked before the body is even parsed. Unknown event
    /// types are acknowledged without touching any record.
    pub async fn handle_webhook(&self, raw_body: &[u8], signature: Option<&str>) -> Result<WebhookAck> {
        if let Err(e) = self.verifier.verify(raw_body, signature) {
            warn!("webhook rejected: {e}");
            return Err(e);
        }

        let event: WebhookEvent = serde_json::from_slice(raw_body)
            .map_err(|e| BustError::ValidationError(format!("Malformed webhook payload: {e}")))?;
        let outcome = match event.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED => ProviderOutcome::Success,
            EVENT_PAYMENT_FAILED => ProviderOutcome::Failure {
                message: event
                    .data
                    .pointer("/last_payment_error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => {
                info!(event_type = %event.event_type, "ignoring webhook event");
                return Ok(WebhookAck::Ignored {
                    event_type: event.event_type,
                });
            }
        };
        let payment_id = event
            .data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BustError::ValidationError("Webhook event has no payment id".to_string()))?
            .to_string();

        let reconciliation = self
            .handle_provider_event(&payment_id, outcome, event.data)
            .await?;
        Ok(WebhookAck::Processed(reconciliation))
    }

    /// Applies a provider outcome to the payment `external_payment_id`.
    ///
    /// Callers must have authenticated the event already. Redelivering a
    /// success any number of times grants credits once.
    pub async fn handle_provider_event(
        &self,
        external_payment_id: &str,
        outcome: ProviderOutcome,
        payload: Value,
    ) -> Result<Reconciliation> {
        let payment = self
            .payments
            .get(external_payment_id)
            .await?
            .ok_or_else(|| BustError::PaymentNotFound(external_payment_id.to_string()))?;

        match outcome {
            ProviderOutcome::Success => self.complete(payment, payload).await,
            ProviderOutcome::Failure { message } => {
                let change = PaymentChange::Fail {
                    at: Utc::now(),
                    message,
                };
                match self.payments.transition(external_payment_id, change).await? {
                    PaymentTransition::Applied(record) => {
                        info!(
                            payment = %record.external_payment_id,
                            user_id = %record.user_id,
                            error = record.error_message.as_deref().unwrap_or_default(),
                            "payment failed"
                        );
                        Ok(Reconciliation::Failed)
                    }
                    PaymentTransition::Rejected(current) => {
                        debug!(payment = %external_payment_id, status = ?current.status, "failure event ignored");
                        Ok(Reconciliation::Unchanged(current.status))
                    }
                }
            }
        }
    }

    async fn complete(&self, payment: PaymentRecord, payload: Value) -> Result<Reconciliation> {
        let id = payment.external_payment_id.as_str();
        match payment.status {
            PaymentStatus::Completed => {
                debug!(payment = %id, "duplicate success event");
                return Ok(Reconciliation::AlreadyCompleted);
            }
            PaymentStatus::Failed | PaymentStatus::Refunded => {
                warn!(payment = %id, status = ?payment.status, "success event for a closed payment");
                return Ok(Reconciliation::Unchanged(payment.status));
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {}
        }

        let session = self.gateway.retrieve_session(id).await?;
        if !session.is_paid() {
            return Err(BustError::ValidationError(format!(
                "Payment {id} has not been completed (provider status: {})",
                session.payment_status
            )));
        }

        let payload = if payload.is_null() { session.raw } else { payload };
        let change = PaymentChange::Complete {
            at: Utc::now(),
            payload,
        };
        let record = match self.payments.transition(id, change).await? {
            PaymentTransition::Applied(record) => record,
            PaymentTransition::Rejected(current) if current.status == PaymentStatus::Completed => {
                debug!(payment = %id, "lost completion race");
                return Ok(Reconciliation::AlreadyCompleted);
            }
            PaymentTransition::Rejected(current) => {
                return Ok(Reconciliation::Unchanged(current.status));
            }
        };
        info!(
            payment = %record.external_payment_id,
            user_id = %record.user_id,
            credits = record.credits_amount,
            "payment completed"
        );

        let credited = matches!(self.apply_credit(&record).await?, GrantOutcome::Applied(_));
        if record.plan_type.is_subscription()
            && let Err(e) = self.ensure_subscription(&record).await
        {
            // Credits are in; the sweep activates the subscription later.
            error!(
                alert = "subscription_not_activated",
                payment = %record.external_payment_id,
                user_id = %record.user_id,
                error = %e,
                "payment completed but subscription was not activated"
            );
        }
        Ok(Reconciliation::Completed { credited })
    }

    async fn apply_credit(&self, record: &PaymentRecord) -> Result<GrantOutcome> {
        let key = GrantKey::for_payment(&record.external_payment_id);
        self.ledger
            .earn_once(record.user_id, record.credits_amount, &key)
            .await
            .inspect_err(|e| {
                error!(
                    alert = "credit_not_applied",
                    payment = %record.external_payment_id,
                    user_id = %record.user_id,
                    credits = record.credits_amount,
                    error = %e,
                    "payment completed but credits were not applied"
                );
            })
    }

    async fn ensure_subscription(&self, record: &PaymentRecord) -> Result<Subscription> {
        let start = record.completed_at.unwrap_or_else(Utc::now);
        let subscription = self
            .subscriptions
            .insert_if_absent(Subscription::activate(record, start)?)
            .await?;
        debug!(
            payment = %record.external_payment_id,
            plan = %subscription.plan_type,
            end = %subscription.end_date,
            "subscription active"
        );
        Ok(subscription)
    }

    /// Client-initiated confirmation of a checkout session. Goes through the
    /// same path as a webhook success.
    pub async fn verify_session(&self, user_id: UserId, session_id: &str) -> Result<Reconciliation> {
        let payment = self
            .payments
            .get(session_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or_else(|| BustError::PaymentNotFound(session_id.to_string()))?;
        self.handle_provider_event(&payment.external_payment_id, ProviderOutcome::Success, Value::Null)
            .await
    }

    /// Moves a completed payment to `refunded`. Credits stay where they are.
    pub async fn mark_refunded(&self, external_payment_id: &str) -> Result<PaymentRecord> {
        let change = PaymentChange::Refund { at: Utc::now() };
        match self.payments.transition(external_payment_id, change).await? {
            PaymentTransition::Applied(record) => {
                info!(payment = %external_payment_id, user_id = %record.user_id, "payment refunded");
                Ok(record)
            }
            PaymentTransition::Rejected(current) if current.status == PaymentStatus::Refunded => {
                Ok(current)
            }
            PaymentTransition::Rejected(current) => Err(BustError::ValidationError(format!(
                "Only completed payments can be refunded, {external_payment_id} is {:?}",
                current.status
            ))),
        }
    }

    /// Most recent payments first.
    pub async fn payments_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.payments.list_for_user(user_id).await?;
        payments.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
        payments.truncate(limit);
        Ok(payments)
    }

    pub async fn active_subscription(&self, user_id: UserId) -> Result<Option<Subscription>> {
        let now = Utc::now();
        Ok(self
            .subscriptions
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.end_date > now)
            .max_by_key(|s| s.start_date))
    }

    pub async fn billing_summary(&self, user_id: UserId) -> Result<BillingSummary> {
        let account = self.ledger.account(user_id).await?;
        Ok(BillingSummary {
            credits: account.credits,
            total_earned: account.total_earned,
            total_spent: account.total_spent,
            subscription: self.active_subscription(user_id).await?,
        })
    }

    /// Re-drives the effects of every completed payment: the grant when its
    /// credit marker is missing, and the subscription record for subscription
    /// plans. Safe to run concurrently with live event handling.
    pub async fn reconcile_credits(&self) -> Result<CreditSweepReport> {
        let mut report = CreditSweepReport::default();
        for payment in self.payments.list_by_status(PaymentStatus::Completed).await? {
            report.examined += 1;
            let key = GrantKey::for_payment(&payment.external_payment_id);
            if !self.ledger.is_applied(&key).await? {
                warn!(payment = %payment.external_payment_id, "completed payment without credit, re-driving");
                match self.apply_credit(&payment).await {
                    Ok(GrantOutcome::Applied(_)) => report.regranted += 1,
                    Ok(GrantOutcome::AlreadyApplied) => {}
                    Err(_) => {
                        report.failed += 1;
                        continue;
                    }
                }
            }
            if payment.plan_type.is_subscription()
                && let Err(e) = self.ensure_subscription(&payment).await
            {
                warn!(payment = %payment.external_payment_id, "subscription not activated: {e}");
                report.failed += 1;
            }
        }
        if report.regranted > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                regranted = report.regranted,
                failed = report.failed,
                "credit sweep finished"
            );
        }
        Ok(report)
    }
}
