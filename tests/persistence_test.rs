#![cfg(feature = "storage-rocksdb")]

use bustmaker::app::{Adapters, App, Stores};
use bustmaker::application::reconciler::{PurchaseRequest, Reconciliation};
use bustmaker::config::AppConfig;
use bustmaker::domain::credits::GrantKey;
use bustmaker::domain::payment::PaymentStatus;
use bustmaker::domain::ports::PaymentStore;
use bustmaker::infrastructure::assets::InMemoryAssetStore;
use bustmaker::infrastructure::gateways::MockGateway;
use bustmaker::infrastructure::providers::ProceduralProvider;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use uuid::Uuid;

fn open(path: &std::path::Path) -> (App, Stores) {
    let config = AppConfig::default();
    let stores = Stores::rocksdb(path).expect("open rocksdb");
    let adapters = Adapters {
        provider: Arc::new(ProceduralProvider::new(Duration::from_millis(1))),
        gateway: Arc::new(MockGateway::new(config.client_url.as_str())),
        assets: Arc::new(InMemoryAssetStore::new()),
    };
    (App::assemble(&config, stores.clone(), adapters), stores)
}

#[tokio::test]
async fn test_completed_payment_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    let user = Uuid::new_v4();

    let payment_id = {
        let (app, _) = open(&db_path);
        app.ledger.open_account(user).await.unwrap();
        let intent = app
            .reconciler
            .purchase(user, PurchaseRequest::CreditPack { credits: 100 })
            .await
            .unwrap();
        let id = intent.payment.external_payment_id;
        let result = app.reconciler.verify_session(user, &id).await.unwrap();
        assert_eq!(result, Reconciliation::Completed { credited: true });
        id
    };

    let (app, stores) = open(&db_path);
    assert_eq!(app.ledger.balance(user).await.unwrap(), 105);
    assert!(app.ledger.is_applied(&GrantKey::for_payment(&payment_id)).await.unwrap());
    let payment = stores.payments.get(&payment_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let again = app.reconciler.verify_session(user, &payment_id).await.unwrap();
    assert_eq!(again, Reconciliation::AlreadyCompleted);

    let (report, _) = app.sweep().await.unwrap();
    assert_eq!(report.regranted, 0);
    assert_eq!(app.ledger.balance(user).await.unwrap(), 105);
}
