use crate::domain::ports::{CheckoutRequest, CheckoutSession, PaymentGateway, ProviderSession};
use crate::error::{BustError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn api_base(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox-api.dodopayments.com/v1",
            Self::Production => "https://api.dodopayments.com/v1",
        }
    }
}

impl FromStr for GatewayEnvironment {
    type Err = BustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" | "test" => Ok(Self::Sandbox),
            "production" | "live" => Ok(Self::Production),
            other => Err(BustError::ConfigError(format!(
                "unknown gateway environment: {other}"
            ))),
        }
    }
}

/// Gateway used when no provider keys are configured. Every session it
/// creates reports as paid.
#[derive(Debug, Clone)]
pub struct MockGateway {
    client_url: String,
}

impl MockGateway {
    pub const SESSION_PREFIX: &'static str = "mock_session_";

    pub fn new(client_url: impl Into<String>) -> Self {
        Self {
            client_url: client_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session_id = format!("{}{}", Self::SESSION_PREFIX, Uuid::new_v4());
        debug!(%session_id, user_id = %request.user_id, "mock checkout created");
        Ok(CheckoutSession {
            checkout_url: format!(
                "{}/payment/success?session_id={session_id}&payment_id={}&type={}",
                self.client_url,
                request.reference,
                if request.plan_type.is_subscription() { "subscription" } else { "credits" },
            ),
            session_id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession> {
        Ok(ProviderSession {
            id: session_id.to_string(),
            payment_status: "paid".to_string(),
            raw: json!({ "id": session_id, "payment_status": "paid", "mock": true }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: String,
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

/// Hosted checkout through the Dodo Payments REST API.
#[derive(Clone)]
pub struct DodoGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    client_url: String,
}

impl std::fmt::Debug for DodoGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DodoGateway")
            .field("api_base", &self.api_base)
            .field("client_url", &self.client_url)
            .finish_non_exhaustive()
    }
}

impl DodoGateway {
    pub fn new(
        secret_key: impl Into<String>,
        environment: GatewayEnvironment,
        client_url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        info!(api_base = environment.api_base(), "payment gateway configured");
        Ok(Self {
            client,
            api_base: environment.api_base().to_string(),
            secret_key: secret_key.into(),
            client_url: client_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn minor_units(amount: Decimal) -> Result<i64> {
        (amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| BustError::ValidationError(format!("amount out of range: {amount}")))
    }
}

#[async_trait]
impl PaymentGateway for DodoGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let body = json!({
            "payment_method_types": ["card"],
            "line_items": [{
                "price_data": {
                    "currency": "usd",
                    "product_data": {
                        "name": format!("3D Bust Maker - {}", request.plan_type),
                        "description": format!("{} credits", request.credits),
                    },
                    "unit_amount": Self::minor_units(request.amount)?,
                },
                "quantity": 1,
            }],
            "mode": "payment",
            "success_url": format!(
                "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&payment_id={}",
                self.client_url, request.reference
            ),
            "cancel_url": format!("{}/payment/cancel?payment_id={}", self.client_url, request.reference),
            "metadata": {
                "userId": request.user_id.to_string(),
                "paymentId": request.reference.to_string(),
                "planType": request.plan_type.as_str(),
                "credits": request.credits,
            },
        });

        let session: SessionBody = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let checkout_url = session.url.ok_or_else(|| {
            BustError::ProviderError("checkout session has no redirect url".to_string())
        })?;
        Ok(CheckoutSession {
            session_id: session.id,
            checkout_url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<ProviderSession> {
        let raw: serde_json::Value = self
            .client
            .get(format!("{}/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let session: SessionBody = serde_json::from_value(raw.clone())?;
        Ok(ProviderSession {
            id: session.id,
            payment_status: session.payment_status.unwrap_or_default(),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plans::PlanType;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_gateway_sessions_are_paid() {
        let gateway = MockGateway::new("http://localhost:5173/");
        let request = CheckoutRequest {
            reference: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_type: PlanType::Credits,
            amount: dec!(9.99),
            credits: 50,
        };
        let session = gateway.create_checkout(&request).await.unwrap();
        assert!(session.session_id.starts_with(MockGateway::SESSION_PREFIX));
        assert!(session
            .checkout_url
            .starts_with("http://localhost:5173/payment/success?session_id=mock_session_"));

        let retrieved = gateway.retrieve_session(&session.session_id).await.unwrap();
        assert!(retrieved.is_paid());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(DodoGateway::minor_units(dec!(24.99)).unwrap(), 2499);
        assert_eq!(DodoGateway::minor_units(dec!(0)).unwrap(), 0);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("live".parse::<GatewayEnvironment>().unwrap(), GatewayEnvironment::Production);
        assert_eq!("SANDBOX".parse::<GatewayEnvironment>().unwrap(), GatewayEnvironment::Sandbox);
        assert!("staging".parse::<GatewayEnvironment>().is_err());
    }
}
