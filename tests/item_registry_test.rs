mod common;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::TestApp;
use munlink_api::{
    config::{MarketplaceConfig, OwnerStatusPolicy},
    entities::marketplace_item::{self, ItemCondition, ItemStatus, TransactionType},
    errors::ServiceError,
    events::EventSender,
    services::{
        catalog::DbCatalog,
        marketplace::{CreateItemInput, ImageUpload, ItemFilters, ItemService, UpdateItemInput},
        storage::{FileKind, FileStore, LocalFileStore},
    },
};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn png(name: &str) -> ImageUpload {
    ImageUpload {
        filename: name.to_string(),
        bytes: vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3],
    }
}

#[tokio::test]
async fn create_item_starts_pending_in_owner_municipality() {
    let app = TestApp::new().await;
    let owner = app.resident().await;

    let item = app
        .items()
        .create_item(&owner, TestApp::sell_input(dec!(100)))
        .await
        .unwrap();

    assert_eq!(item.status, ItemStatus::Pending);
    assert!(item.is_active);
    assert!(item.image_refs().is_empty());
    assert_eq!(item.view_count, 0);
    assert_eq!(item.owner_id, owner.user_id);
    assert_eq!(item.municipality_id, app.iba.id);
    assert_eq!(item.condition, ItemCondition::Good);
    assert_eq!(item.transaction_type, TransactionType::Sell);
    assert_eq!(item.price, Some(dec!(100)));
}

#[tokio::test]
async fn create_item_enforces_price_iff_sell() {
    let app = TestApp::new().await;
    let owner = app.resident().await;

    let mut no_price = TestApp::sell_input(dec!(1));
    no_price.price = None;
    assert_matches!(
        app.items().create_item(&owner, no_price).await,
        Err(ServiceError::ValidationError(msg)) if msg == "Price is required for sell items"
    );

    assert_matches!(
        app.items()
            .create_item(&owner, TestApp::sell_input(dec!(0)))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let mut priced_donation = TestApp::donate_input();
    priced_donation.price = Some(dec!(10));
    assert_matches!(
        app.items().create_item(&owner, priced_donation).await,
        Err(ServiceError::ValidationError(_))
    );

    let donation = app
        .items()
        .create_item(&owner, TestApp::donate_input())
        .await
        .unwrap();
    assert_eq!(donation.price, None);
}

#[tokio::test]
async fn create_item_rejects_bad_enums_and_blank_fields() {
    let app = TestApp::new().await;
    let owner = app.resident().await;

    let mut bad_type = TestApp::donate_input();
    bad_type.transaction_type = Some("barter".into());
    assert_matches!(
        app.items().create_item(&owner, bad_type).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut bad_condition = TestApp::donate_input();
    bad_condition.condition = Some("broken".into());
    assert_matches!(
        app.items().create_item(&owner, bad_condition).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut blank_title = TestApp::donate_input();
    blank_title.title = Some("   ".into());
    assert_matches!(
        app.items().create_item(&owner, blank_title).await,
        Err(ServiceError::ValidationError(msg)) if msg == "title is required"
    );

    assert_matches!(
        app.items().create_item(&owner, CreateItemInput::default()).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn create_item_requires_verification_and_municipality() {
    let app = TestApp::new().await;

    let unverified = app.user_with(Some(app.iba.id), true, false).await;
    assert_matches!(
        app.items()
            .create_item(&unverified, TestApp::donate_input())
            .await,
        Err(ServiceError::PreconditionFailed(_))
    );

    let homeless = app.user_with(None, true, true).await;
    assert_matches!(
        app.items()
            .create_item(&homeless, TestApp::donate_input())
            .await,
        Err(ServiceError::PreconditionFailed(msg))
            if msg == "Set your municipality in your profile before posting items"
    );
}

#[tokio::test]
async fn update_item_is_owner_only_and_keeps_price_rule() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let stranger = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    assert_matches!(
        app.items()
            .update_item(&stranger, item.id, UpdateItemInput::default())
            .await,
        Err(ServiceError::Forbidden(msg)) if msg == "You can only edit your own items"
    );

    let updated = app
        .items()
        .update_item(
            &owner,
            item.id,
            UpdateItemInput {
                title: Some("Road bike".into()),
                price: Some(dec!(250)),
                condition: Some("like_new".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Road bike");
    assert_eq!(updated.price, Some(dec!(250)));
    assert_eq!(updated.condition, ItemCondition::LikeNew);

    // price on a donation is ignored, not stored
    let donation = app
        .items()
        .create_item(&owner, TestApp::donate_input())
        .await
        .unwrap();
    let still_free = app
        .items()
        .update_item(
            &owner,
            donation.id,
            UpdateItemInput {
                price: Some(dec!(99)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(still_free.price, None);
}

#[tokio::test]
async fn update_item_replaces_images_up_to_limit() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let too_many: Vec<String> = (0..6).map(|i| format!("marketplace/iba/x/{i}.jpg")).collect();
    assert_matches!(
        app.items()
            .update_item(
                &owner,
                item.id,
                UpdateItemInput {
                    images: Some(too_many),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::LimitExceeded(_))
    );

    let updated = app
        .items()
        .update_item(
            &owner,
            item.id,
            UpdateItemInput {
                images: Some(vec!["a.jpg".into(), "b.jpg".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.image_refs(), vec!["a.jpg".to_string(), "b.jpg".to_string()]);
}

#[tokio::test]
async fn locked_policy_rejects_owner_status_without_partial_edit() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let result = app
        .items()
        .update_item(
            &owner,
            item.id,
            UpdateItemInput {
                title: Some("Renamed bicycle".into()),
                status: Some("completed".into()),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(
        result,
        Err(ServiceError::Forbidden(msg)) if msg.contains("managed by the marketplace")
    );

    let stored = app.item(item.id).await;
    assert_eq!(stored.status, ItemStatus::Available);
    assert_eq!(stored.title, item.title);
}

#[tokio::test]
async fn owner_override_policy_stores_owner_status() {
    let app = TestApp::with_marketplace(MarketplaceConfig {
        owner_status_policy: OwnerStatusPolicy::OwnerOverride,
        ..Default::default()
    })
    .await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let updated = app
        .items()
        .update_item(
            &owner,
            item.id,
            UpdateItemInput {
                status: Some("completed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ItemStatus::Completed);

    assert_matches!(
        app.items()
            .update_item(
                &owner,
                item.id,
                UpdateItemInput {
                    status: Some("sold".into()),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn soft_delete_is_idempotent_and_hides_item() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let stranger = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    assert_matches!(
        app.items().soft_delete_item(&stranger, item.id).await,
        Err(ServiceError::Forbidden(_))
    );

    let first = app.items().soft_delete_item(&owner, item.id).await.unwrap();
    assert!(!first.is_active);
    let second = app.items().soft_delete_item(&owner, item.id).await.unwrap();
    assert!(!second.is_active);

    assert_matches!(
        app.items().get_item(item.id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.items()
            .update_item(&owner, item.id, UpdateItemInput::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.items().soft_delete_item(&owner, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );

    let listed = app
        .items()
        .list_items(ItemFilters::default(), None, None)
        .await
        .unwrap();
    assert_eq!(listed.total, 0);
}

#[tokio::test]
async fn get_item_counts_every_view() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let first = app.items().get_item(item.id).await.unwrap();
    let second = app.items().get_item(item.id).await.unwrap();
    let third = app.items().get_item(item.id).await.unwrap();

    assert_eq!(first.view_count, 1);
    assert_eq!(second.view_count, 2);
    assert_eq!(third.view_count, 3);

    assert_matches!(
        app.items().get_item(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(msg)) if msg == "Item not found"
    );
}

#[tokio::test]
async fn list_items_defaults_to_available_and_filters() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let other_town = app.botolan_resident().await;

    let bike = app.available_sell_item(&owner, dec!(100)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _pending = app
        .items()
        .create_item(&owner, TestApp::donate_input())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let far_bike = app.available_sell_item(&other_town, dec!(50)).await;

    let available = app
        .items()
        .list_items(ItemFilters::default(), None, None)
        .await
        .unwrap();
    assert_eq!(available.total, 2);
    assert_eq!(available.page, 1);
    assert_eq!(available.per_page, 20);
    // newest first
    assert_eq!(available.items[0].item.id, far_bike.id);
    assert_eq!(available.items[1].item.id, bike.id);
    assert_eq!(available.items[1].municipality_name.as_deref(), Some("Iba"));

    let iba_only = app
        .items()
        .list_items(
            ItemFilters {
                municipality_id: Some(app.iba.id),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(iba_only.total, 1);
    assert_eq!(iba_only.items[0].item.id, bike.id);

    let everything = app
        .items()
        .list_items(
            ItemFilters {
                status: Some(String::new()),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(everything.total, 3);

    let donations = app
        .items()
        .list_items(
            ItemFilters {
                transaction_type: Some("donate".into()),
                status: Some("pending".into()),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(donations.total, 1);

    let paged = app
        .items()
        .list_items(ItemFilters::default(), Some(2), Some(1))
        .await
        .unwrap();
    assert_eq!(paged.pages, 2);
    assert_eq!(paged.items.len(), 1);
    assert_eq!(paged.items[0].item.id, bike.id);
}

#[tokio::test]
async fn attach_image_stores_and_appends_until_limit() {
    let app = TestApp::with_marketplace(MarketplaceConfig {
        max_item_images: 2,
        ..Default::default()
    })
    .await;
    let owner = app.resident().await;
    let stranger = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    assert_matches!(
        app.items()
            .attach_image(&stranger, item.id, png("front.png"))
            .await,
        Err(ServiceError::Forbidden(_))
    );
    assert_matches!(
        app.items()
            .attach_image(&owner, item.id, png("notes.txt"))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let (after_one, path) = app
        .items()
        .attach_image(&owner, item.id, png("front.png"))
        .await
        .unwrap();
    assert!(path.starts_with(&format!("marketplace/iba/item_{}/", item.id)));
    assert!(path.ends_with(".png"));
    assert_eq!(after_one.image_refs(), vec![path.clone()]);

    let (after_two, _) = app
        .items()
        .attach_image(&owner, item.id, png("back.PNG"))
        .await
        .unwrap();
    assert_eq!(after_two.image_refs().len(), 2);
    assert_eq!(after_two.image_refs()[0], path);

    assert_matches!(
        app.items()
            .attach_image(&owner, item.id, png("side.png"))
            .await,
        Err(ServiceError::LimitExceeded(msg)) if msg == "Maximum images reached (2)"
    );
}

#[tokio::test]
async fn attach_image_requires_full_verification() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let mut downgraded = owner.clone();
    downgraded.fully_verified = false;
    assert_matches!(
        app.items()
            .attach_image(&downgraded, item.id, png("front.png"))
            .await,
        Err(ServiceError::PreconditionFailed(_))
    );
}

#[tokio::test]
async fn list_my_items_returns_only_callers_active_items() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let other = app.resident().await;

    let kept = app.available_sell_item(&owner, dec!(100)).await;
    let removed = app.available_sell_item(&owner, dec!(200)).await;
    app.available_sell_item(&other, dec!(300)).await;
    app.items().soft_delete_item(&owner, removed.id).await.unwrap();

    let mine = app.items().list_my_items(&owner).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, kept.id);
}

#[tokio::test]
async fn item_creation_notifies_nobody() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    app.items()
        .create_item(&owner, TestApp::donate_input())
        .await
        .unwrap();

    let seen = app.notifications(1).await;
    assert!(seen.is_empty());
}

#[tokio::test]
async fn list_items_rejects_page_beyond_offset_range() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    app.available_sell_item(&owner, dec!(100)).await;

    assert_matches!(
        app.items()
            .list_items(ItemFilters::default(), Some(u64::MAX / 10), Some(20))
            .await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("page")
    );
    assert_matches!(
        app.items()
            .list_items(ItemFilters::default(), Some(u64::MAX), None)
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let last = app
        .items()
        .list_items(ItemFilters::default(), Some(2), Some(20))
        .await
        .unwrap();
    assert!(last.items.is_empty());
    assert_eq!(last.total, 1);
}

/// Stores through the disk store, then fills the item to capacity before the
/// service gets to append the new reference.
struct FillingStore {
    inner: LocalFileStore,
    db: Arc<DatabaseConnection>,
    max_images: usize,
    stored: StdMutex<Vec<String>>,
}

#[async_trait]
impl FileStore for FillingStore {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        owner_id: Uuid,
        municipality_scope: &str,
        kind: FileKind,
    ) -> Result<String, ServiceError> {
        let reference = self
            .inner
            .store(bytes, filename, owner_id, municipality_scope, kind)
            .await?;
        self.stored.lock().unwrap().push(reference.clone());

        let FileKind::MarketplaceItem(item_id) = kind;
        let full: Vec<String> = (0..self.max_images)
            .map(|i| format!("other/{i}.png"))
            .collect();
        marketplace_item::Entity::update_many()
            .col_expr(
                marketplace_item::Column::Images,
                Expr::value(marketplace_item::images_json(&full)),
            )
            .filter(marketplace_item::Column::Id.eq(item_id))
            .exec(&*self.db)
            .await
            .unwrap();
        Ok(reference)
    }

    async fn remove(&self, reference: &str) -> Result<(), ServiceError> {
        self.inner.remove(reference).await
    }
}

#[tokio::test]
async fn upload_losing_capacity_race_leaves_no_file_behind() {
    let app = TestApp::new().await;
    let owner = app.resident().await;
    let item = app.available_sell_item(&owner, dec!(100)).await;

    let uploads = tempfile::tempdir().unwrap();
    let config = MarketplaceConfig::default();
    let store = Arc::new(FillingStore {
        inner: LocalFileStore::new(uploads.path()),
        db: app.db.clone(),
        max_images: config.max_item_images,
        stored: StdMutex::new(Vec::new()),
    });
    let (event_tx, _event_rx) = mpsc::channel(16);
    let service = ItemService::new(
        app.db.clone(),
        EventSender::new(event_tx),
        Arc::new(DbCatalog::new(app.db.clone())),
        store.clone(),
        config.clone(),
    );

    assert_matches!(
        service.attach_image(&owner, item.id, png("late.png")).await,
        Err(ServiceError::LimitExceeded(_))
    );

    let stored = store.stored.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert!(!uploads.path().join(&stored[0]).exists());
    assert_eq!(app.item(item.id).await.image_refs().len(), config.max_item_images);
}
