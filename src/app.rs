//! Service wiring: builds the three services over one set of stores.

use crate::application::dispatcher::Dispatcher;
use crate::application::ledger::CreditLedger;
use crate::application::orchestrator::{GenerationOrchestrator, RecoveryReport};
use crate::application::reconciler::{CreditSweepReport, PaymentReconciler};
use crate::config::{AppConfig, GatewayMode, ProviderKind};
use crate::domain::plans::Catalogue;
use crate::domain::ports::{
    AssetStoreRef, CreditAccountStoreRef, GenerationProviderRef, PaymentGatewayRef,
    PaymentStoreRef, ProjectStoreRef, SubscriptionStoreRef,
};
use crate::domain::signature::WebhookVerifier;
use crate::error::{BustError, Result};
use crate::infrastructure::assets::{InMemoryAssetStore, LocalDiskAssetStore};
use crate::infrastructure::gateways::{DodoGateway, MockGateway};
use crate::infrastructure::in_memory::{
    InMemoryCreditAccountStore, InMemoryPaymentStore, InMemoryProjectStore,
    InMemorySubscriptionStore,
};
use crate::infrastructure::providers::{ProceduralProvider, RemoteProvider};
use std::sync::Arc;
use tracing::info;

/// The persistence ports every service shares.
#[derive(Clone)]
pub struct Stores {
    pub accounts: CreditAccountStoreRef,
    pub payments: PaymentStoreRef,
    pub subscriptions: SubscriptionStoreRef,
    pub projects: ProjectStoreRef,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryCreditAccountStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            projects: Arc::new(InMemoryProjectStore::new()),
        }
    }

    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let store = crate::infrastructure::rocksdb::RocksDBStore::open(path)?;
        Ok(Self {
            accounts: Arc::new(store.clone()),
            payments: Arc::new(store.clone()),
            subscriptions: Arc::new(store.clone()),
            projects: Arc::new(store),
        })
    }
}

/// Adapters for the outside world.
#[derive(Clone)]
pub struct Adapters {
    pub provider: GenerationProviderRef,
    pub gateway: PaymentGatewayRef,
    pub assets: AssetStoreRef,
}

impl Adapters {
    /// Picks the adapters named by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let provider: GenerationProviderRef = match config.provider {
            ProviderKind::Procedural => Arc::new(ProceduralProvider::new(config.procedural_delay)),
            ProviderKind::Remote => Arc::new(RemoteProvider::new(
                config.provider_url.as_str(),
                config.provider_poll_interval,
            )?),
        };
        let gateway: PaymentGatewayRef = match config.gateway {
            GatewayMode::Mock => Arc::new(MockGateway::new(config.client_url.as_str())),
            GatewayMode::Dodo => {
                let key = config.gateway_api_key.as_deref().ok_or_else(|| {
                    BustError::ConfigError("the dodo gateway needs an API key".to_string())
                })?;
                Arc::new(DodoGateway::new(
                    key,
                    config.gateway_environment,
                    config.client_url.as_str(),
                )?)
            }
        };
        let assets: AssetStoreRef = match &config.upload_dir {
            Some(dir) => Arc::new(LocalDiskAssetStore::new(dir)),
            None => Arc::new(InMemoryAssetStore::new()),
        };
        Ok(Self {
            provider,
            gateway,
            assets,
        })
    }
}

/// The assembled pipeline.
#[derive(Clone)]
pub struct App {
    pub ledger: CreditLedger,
    pub reconciler: PaymentReconciler,
    pub orchestrator: GenerationOrchestrator,
}

impl App {
    pub fn build(config: &AppConfig, stores: Stores) -> Result<Self> {
        let adapters = Adapters::from_config(config)?;
        Ok(Self::assemble(config, stores, adapters))
    }

    pub fn assemble(config: &AppConfig, stores: Stores, adapters: Adapters) -> Self {
        let ledger = CreditLedger::new(stores.accounts, config.starting_credits);
        let reconciler = PaymentReconciler::new(
            stores.payments,
            stores.subscriptions,
            ledger.clone(),
            adapters.gateway,
            WebhookVerifier::new(config.webhook_secret.as_deref()),
            Arc::new(Catalogue::standard()),
        );
        let dispatcher = Dispatcher::new(
            adapters.provider,
            stores.projects.clone(),
            config.generation_timeout,
        );
        info!(provider = dispatcher.provider_name(), "generation provider selected");
        let orchestrator = GenerationOrchestrator::new(
            stores.projects,
            adapters.assets,
            ledger.clone(),
            dispatcher,
            config.policy(),
        );
        Self {
            ledger,
            reconciler,
            orchestrator,
        }
    }

    /// Runs both recovery sweeps: missing payment credits, then stuck jobs.
    pub async fn sweep(&self) -> Result<(CreditSweepReport, RecoveryReport)> {
        let credits = self.reconciler.reconcile_credits().await?;
        let jobs = self.orchestrator.recover_stuck().await?;
        Ok((credits, jobs))
    }
}
