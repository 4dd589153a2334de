//! Endpoint handlers, independent of any HTTP framework.
//!
//! Each handler takes already-extracted request parts and returns an
//! [`ApiResponse`] with the status code and JSON body the endpoint answers
//! with. Errors are mapped through [`BustError::status_code`].

use crate::app::App;
use crate::application::reconciler::{PurchaseRequest, Reconciliation, WebhookAck};
use crate::domain::credits::UserId;
use crate::domain::plans::{BillingInterval, PlanType};
use crate::domain::ports::ImageUpload;
use crate::domain::project::{GenerationConfig, ProjectId};
use crate::error::{BustError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                status: 200,
                body: json!({ "success": true, "data": data }),
            },
            Err(e) => Self::from_error(&BustError::from(e)),
        }
    }

    fn created<T: Serialize>(data: T) -> Self {
        let mut response = Self::ok(data);
        if response.status == 200 {
            response.status = 201;
        }
        response
    }

    fn from_error(error: &BustError) -> Self {
        let status = error.status_code();
        if status >= 500 {
            warn!(status, "request failed: {error}");
        }
        let mut body = json!({
            "success": false,
            "error": error.code(),
            "message": error.to_string(),
        });
        if let BustError::InsufficientCredits { available, requested } = error {
            body["creditsAvailable"] = json!(available);
            body["creditsRequired"] = json!(requested);
        }
        Self { status, body }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::from_error(&e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: GenerationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseBody {
    pub plan_type: PlanType,
    #[serde(default)]
    pub billing_interval: BillingInterval,
    /// Pack size, for `planType = credits`.
    #[serde(default)]
    pub credits: Option<u64>,
}

impl PurchaseBody {
    fn into_request(self) -> Result<PurchaseRequest> {
        match self.plan_type {
            PlanType::Credits => {
                let credits = self.credits.ok_or_else(|| {
                    BustError::ValidationError("Credit package size is required".to_string())
                })?;
                Ok(PurchaseRequest::CreditPack { credits })
            }
            plan => Ok(PurchaseRequest::Subscription {
                plan,
                interval: self.billing_interval,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutBody {
    payment_id: uuid::Uuid,
    session_id: String,
    checkout_url: String,
}

fn authenticated(caller: Option<UserId>) -> Result<UserId> {
    caller.ok_or_else(|| BustError::AuthenticationError("Authentication required".to_string()))
}

/// Handlers over one assembled [`App`].
#[derive(Clone)]
pub struct Api {
    app: App,
}

impl Api {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// `POST /upload`. Charges one upload and returns
    /// `{fileId, url, creditsRemaining}`; 403 when the balance is empty.
    pub async fn upload(
        &self,
        caller: Option<UserId>,
        project_id: Option<ProjectId>,
        upload: ImageUpload,
    ) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            self.app
                .orchestrator
                .upload_input(user_id, project_id, upload)
                .await
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `POST /projects`.
    pub async fn create_project(&self, caller: Option<UserId>, request: CreateProjectRequest) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            self.app
                .orchestrator
                .create_project(user_id, &request.title, request.description, request.config)
                .await
        }
        .await;
        match result {
            Ok(project) => ApiResponse::created(project),
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    /// `GET /projects/{id}`. May start generation as a side effect.
    pub async fn get_project(&self, caller: Option<UserId>, project_id: ProjectId) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            self.app.orchestrator.get_project(user_id, project_id).await
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `GET /projects`.
    pub async fn list_projects(&self, caller: Option<UserId>) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            self.app.orchestrator.list_projects(user_id).await
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `POST /projects/{id}/retry`.
    pub async fn retry_project(&self, caller: Option<UserId>, project_id: ProjectId) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            self.app.orchestrator.retry(user_id, project_id).await
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `POST /payments/webhook`. The raw body is needed for the signature.
    pub async fn webhook(&self, raw_body: &[u8], signature: Option<&str>) -> ApiResponse {
        match self.app.reconciler.handle_webhook(raw_body, signature).await {
            Ok(WebhookAck::Processed(reconciliation)) => ApiResponse {
                status: 200,
                body: json!({ "received": true, "result": reconciliation_label(&reconciliation) }),
            },
            Ok(WebhookAck::Ignored { event_type }) => ApiResponse {
                status: 200,
                body: json!({ "received": true, "ignored": event_type }),
            },
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    /// `POST /payments/verify-session`.
    pub async fn verify_session(&self, caller: Option<UserId>, request: VerifySessionRequest) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            let reconciliation = self
                .app
                .reconciler
                .verify_session(user_id, &request.session_id)
                .await?;
            let credits = self.app.ledger.balance(user_id).await?;
            Ok::<_, BustError>(json!({
                "result": reconciliation_label(&reconciliation),
                "credits": credits,
            }))
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `POST /payments/checkout`.
    pub async fn purchase(&self, caller: Option<UserId>, body: PurchaseBody) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            let intent = self
                .app
                .reconciler
                .purchase(user_id, body.into_request()?)
                .await?;
            Ok::<_, BustError>(CheckoutBody {
                payment_id: intent.payment.id,
                session_id: intent.checkout.session_id,
                checkout_url: intent.checkout.checkout_url,
            })
        }
        .await;
        ApiResponse::from_result(result)
    }

    /// `GET /payments/plans`.
    pub fn plans(&self) -> ApiResponse {
        ApiResponse::ok(self.app.reconciler.catalogue())
    }

    /// `GET /payments/billing`.
    pub async fn billing(&self, caller: Option<UserId>) -> ApiResponse {
        let result = async {
            let user_id = authenticated(caller)?;
            let summary = self.app.reconciler.billing_summary(user_id).await?;
            let payments = self.app.reconciler.payments_for_user(user_id, 10).await?;
            Ok::<_, BustError>(json!({ "summary": summary, "payments": payments }))
        }
        .await;
        ApiResponse::from_result(result)
    }
}

fn reconciliation_label(reconciliation: &Reconciliation) -> &'static str {
    match reconciliation {
        Reconciliation::Completed { .. } => "completed",
        Reconciliation::AlreadyCompleted => "already_completed",
        Reconciliation::Failed => "failed",
        Reconciliation::Unchanged(_) => "unchanged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Stores;
    use crate::config::AppConfig;
    use uuid::Uuid;

    fn api() -> Api {
        let config = AppConfig {
            webhook_secret: Some("whsec".into()),
            ..AppConfig::default()
        };
        Api::new(App::build(&config, Stores::in_memory()).unwrap())
    }

    #[tokio::test]
    async fn test_anonymous_calls_are_rejected() {
        let api = api();
        let response = api.list_projects(None).await;
        assert_eq!(response.status, 401);
        assert_eq!(response.body["error"], "AuthenticationError");
    }

    #[tokio::test]
    async fn test_upload_with_empty_balance_is_forbidden() {
        let api = api();
        let user = Uuid::new_v4();
        api.app().ledger.open_account(user).await.unwrap();
        api.app().ledger.spend(user, 5, "test").await.unwrap();

        let upload = ImageUpload {
            original_name: "face.jpg".into(),
            mime_type: "image/jpeg".into(),
            bytes: vec![0xff, 0xd8],
        };
        let response = api.upload(Some(user), None, upload).await;
        assert_eq!(response.status, 403);
        assert_eq!(response.body["error"], "InsufficientCredits");
        assert_eq!(response.body["creditsAvailable"], 0);
    }

    #[tokio::test]
    async fn test_webhook_with_bad_signature_is_unauthorized() {
        let api = api();
        let response = api
            .webhook(br#"{"type":"payment_intent.succeeded","data":{"id":"x"}}"#, Some("abcd"))
            .await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn test_plans_listing() {
        let response = api().plans();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["data"]["plans"].as_array().unwrap().len(), 4);
        assert_eq!(response.body["data"]["creditPacks"][0]["credits"], 25);
    }

    #[tokio::test]
    async fn test_purchase_then_verify_session() {
        let api = api();
        let user = Uuid::new_v4();
        api.app().ledger.open_account(user).await.unwrap();

        let body: PurchaseBody = serde_json::from_value(json!({
            "planType": "credits",
            "credits": 100,
        }))
        .unwrap();
        let response = api.purchase(Some(user), body).await;
        assert_eq!(response.status, 200);
        let session_id = response.body["data"]["sessionId"].as_str().unwrap().to_string();

        let response = api
            .verify_session(Some(user), VerifySessionRequest { session_id })
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["data"]["credits"], 105);
        assert_eq!(response.body["data"]["result"], "completed");
    }
}
