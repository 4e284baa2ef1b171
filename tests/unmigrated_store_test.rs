use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use munlink_api::{
    auth::Identity,
    config::MarketplaceConfig,
    db::{self, DbConfig},
    entities::user::UserRole,
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::marketplace::ItemFilters,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Services over an in-memory database that never had its migrations applied.
async fn services_without_schema() -> (AppServices, mpsc::Receiver<Event>) {
    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        idle_timeout: Duration::from_secs(3600),
        acquire_timeout: Duration::from_secs(30),
        ..Default::default()
    })
    .await
    .expect("open database");
    let (event_tx, event_rx) = mpsc::channel(16);
    let services = AppServices::new(
        Arc::new(pool),
        EventSender::new(event_tx),
        &MarketplaceConfig::default(),
    );
    (services, event_rx)
}

fn resident() -> Identity {
    Identity {
        user_id: Uuid::new_v4(),
        role: UserRole::Resident,
        email_verified: true,
        fully_verified: true,
        municipality_id: Some(Uuid::new_v4()),
        date_of_birth: None,
    }
}

#[tokio::test]
async fn reads_degrade_to_empty_before_migrations() {
    let (services, _events) = services_without_schema().await;
    let caller = resident();

    let page = services
        .items
        .list_items(ItemFilters::default(), None, None)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total, 0);
    assert_eq!(page.pages, 0);
    assert_eq!(page.page, 1);

    let mine = services.items.list_my_items(&caller).await.unwrap();
    assert!(mine.is_empty());

    let negotiations = services
        .transactions
        .list_my_transactions(&caller)
        .await
        .unwrap();
    assert!(negotiations.as_buyer.is_empty());
    assert!(negotiations.as_seller.is_empty());
}

#[tokio::test]
async fn single_item_reads_report_storage_unavailable_before_migrations() {
    let (services, _events) = services_without_schema().await;

    assert_matches!(
        services.items.get_item(Uuid::new_v4()).await,
        Err(ServiceError::StorageUnavailable(_))
    );
}
