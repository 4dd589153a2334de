#![allow(dead_code)]

use async_trait::async_trait;
use bustmaker::app::{Adapters, App, Stores};
use bustmaker::config::AppConfig;
use bustmaker::domain::credits::UserId;
use bustmaker::domain::ports::{GenerationProvider, ImageUpload};
use bustmaker::domain::project::{
    AssetRef, GenerationConfig, GenerationMetadata, GenerationOutcome, Project, ProjectStatus,
};
use bustmaker::domain::signature::WebhookVerifier;
use bustmaker::infrastructure::assets::InMemoryAssetStore;
use bustmaker::infrastructure::gateways::MockGateway;
use bustmaker::interfaces::api::Api;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub const SECRET: &str = "whsec_integration";

/// What the scripted provider does on its next dispatch.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(&'static str),
    Hang,
}

/// A generation provider that follows a script and counts its dispatches.
/// Once the script runs out every dispatch succeeds.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    dispatches: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(5))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            dispatches: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn dispatch(&self, input: &AssetRef, config: &GenerationConfig) -> GenerationOutcome {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Succeed);
        tokio::time::sleep(self.delay).await;
        match step {
            Step::Succeed => GenerationOutcome::Success {
                output: AssetRef {
                    file_id: Uuid::new_v4(),
                    key: format!("bust_{}_{}.obj", config.quality.as_str(), input.file_id),
                    url: format!("/api/ai3d/download/bust_{}.obj", input.file_id),
                },
                metadata: GenerationMetadata {
                    vertices: 31,
                    faces: 10,
                    format: "OBJ".to_string(),
                    processing_ms: 0,
                },
            },
            Step::Fail(reason) => GenerationOutcome::Failure {
                reason: reason.to_string(),
            },
            Step::Hang => std::future::pending().await,
        }
    }
}

pub struct Harness {
    pub app: App,
    pub api: Api,
    pub stores: Stores,
    pub provider: Arc<ScriptedProvider>,
}

pub fn config() -> AppConfig {
    AppConfig {
        webhook_secret: Some(SECRET.to_string()),
        generation_timeout: Duration::from_millis(200),
        stale_grace: Duration::from_millis(50),
        ..AppConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(ScriptedProvider::new())
}

pub fn harness_with(provider: ScriptedProvider) -> Harness {
    harness_on(Stores::in_memory(), provider)
}

/// Wires the services over `stores`, which tests may wrap to inject faults
/// or slow down particular writes.
pub fn harness_on(stores: Stores, provider: ScriptedProvider) -> Harness {
    let config = config();
    let provider = Arc::new(provider);
    let adapters = Adapters {
        provider: provider.clone(),
        gateway: Arc::new(MockGateway::new(config.client_url.as_str())),
        assets: Arc::new(InMemoryAssetStore::new()),
    };
    let app = App::assemble(&config, stores.clone(), adapters);
    Harness {
        api: Api::new(app.clone()),
        app,
        stores,
        provider,
    }
}

impl Harness {
    /// Opens an account and moves its balance to `credits`.
    pub async fn user_with_credits(&self, credits: u64) -> UserId {
        let user = Uuid::new_v4();
        let opened = self.app.ledger.open_account(user).await.unwrap().credits;
        if credits < opened {
            self.app.ledger.spend(user, opened - credits, "test setup").await.unwrap();
        } else if credits > opened {
            self.app.ledger.earn(user, credits - opened, "test setup").await.unwrap();
        }
        user
    }

    pub async fn balance(&self, user: UserId) -> u64 {
        self.app.ledger.balance(user).await.unwrap()
    }

    pub async fn settle(&self) {
        self.app.orchestrator.dispatcher().wait_idle().await;
    }
}

pub fn sign(body: &[u8]) -> String {
    WebhookVerifier::new(Some(SECRET)).sign(body).unwrap()
}

pub fn event(event_type: &str, payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": event_type,
        "data": { "id": payment_id, "object": "payment_intent" },
    }))
    .unwrap()
}

pub fn png() -> ImageUpload {
    ImageUpload {
        original_name: "portrait.png".to_string(),
        mime_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
    }
}

/// `output` is present exactly when the project is completed.
pub fn assert_terminal_invariant(project: &Project) {
    assert_eq!(
        project.output.is_some(),
        project.status == ProjectStatus::Completed,
        "project {} is {:?} with output {:?}",
        project.id,
        project.status,
        project.output
    );
}
