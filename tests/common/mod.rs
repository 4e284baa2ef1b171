#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{NaiveDate, Utc};
use munlink_api::{
    auth::Identity,
    config::{AppConfig, MarketplaceConfig},
    db::{self, DbConfig},
    entities::{
        marketplace_item::{self, ItemStatus},
        municipality,
        user::{self, UserRole},
    },
    events::{self, EventSender},
    notifications::{Notification, NotificationError, Notifier},
    services::marketplace::{CreateItemInput, ItemService, TransactionService},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "munlink-test-signing-key-7f3c91d2e8b04a6f95c2d1e0b7a8c3f4-zambales-iba";

/// Notifier that keeps everything it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.seen.lock().await.push(notification);
        Ok(())
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub notifier: Arc<RecordingNotifier>,
    pub iba: municipality::Model,
    pub botolan: municipality::Model,
    _uploads: TempDir,
    _data: Option<TempDir>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_marketplace(MarketplaceConfig::default()).await
    }

    /// Construct a test application with a custom marketplace section.
    pub async fn with_marketplace(marketplace: MarketplaceConfig) -> Self {
        // A single connection keeps every query on the same in-memory database.
        Self::build(marketplace, "sqlite::memory:".to_string(), 1, None).await
    }

    /// Construct a test application on a SQLite file so several pooled
    /// connections can work on the same database at once.
    pub async fn file_backed(max_connections: u32) -> Self {
        let data = tempfile::tempdir().expect("create data dir");
        let url = format!("sqlite://{}?mode=rwc", data.path().join("munlink.db").display());
        Self::build(MarketplaceConfig::default(), url, max_connections, Some(data)).await
    }

    async fn build(
        mut marketplace: MarketplaceConfig,
        database_url: String,
        max_connections: u32,
        data: Option<TempDir>,
    ) -> Self {
        let uploads = tempfile::tempdir().expect("create uploads dir");
        marketplace.uploads_dir = uploads.path().to_string_lossy().into_owned();

        let mut cfg = AppConfig::new(database_url, TEST_JWT_SECRET.to_string(), "test".to_string());
        cfg.marketplace = marketplace;

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections,
            min_connections: 1,
            idle_timeout: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(30),
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let notifier = Arc::new(RecordingNotifier::default());
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx, notifier.clone()));

        let state = AppState::new(db_arc.clone(), cfg, event_sender);
        let router = munlink_api::app_router(state.clone());

        let iba = insert_municipality(&db_arc, "Iba", "iba", "037107000").await;
        let botolan = insert_municipality(&db_arc, "Botolan", "botolan", "037103000").await;

        Self {
            router,
            state,
            db: db_arc,
            notifier,
            iba,
            botolan,
            _uploads: uploads,
            _data: data,
            _event_task: event_task,
        }
    }

    pub fn items(&self) -> Arc<ItemService> {
        self.state.item_service()
    }

    pub fn transactions(&self) -> Arc<TransactionService> {
        self.state.transaction_service()
    }

    /// Fully verified adult resident of Iba.
    pub async fn resident(&self) -> Identity {
        let iba = self.iba.id;
        self.user_with(Some(iba), true, true).await
    }

    /// Fully verified adult resident of Botolan.
    pub async fn botolan_resident(&self) -> Identity {
        let botolan = self.botolan.id;
        self.user_with(Some(botolan), true, true).await
    }

    pub async fn user_with(
        &self,
        municipality_id: Option<Uuid>,
        email_verified: bool,
        admin_verified: bool,
    ) -> Identity {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(id),
            email: Set(format!("{}@munlink.test", id.simple())),
            display_name: Set("Test Resident".to_string()),
            role: Set(UserRole::Resident),
            municipality_id: Set(municipality_id),
            barangay_id: Set(None),
            date_of_birth: Set(NaiveDate::from_ymd_opt(1990, 1, 15)),
            email_verified: Set(email_verified),
            admin_verified: Set(admin_verified),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("insert user");
        Identity::from(&model)
    }

    pub fn sell_input(price: Decimal) -> CreateItemInput {
        CreateItemInput {
            title: Some("Mountain bike".into()),
            description: Some("26-inch, lightly used".into()),
            category: Some("sports".into()),
            condition: Some("good".into()),
            transaction_type: Some("sell".into()),
            price: Some(price),
            pickup_location: Some("Iba Town Plaza".into()),
            ..Default::default()
        }
    }

    pub fn donate_input() -> CreateItemInput {
        CreateItemInput {
            title: Some("Grade 4 textbooks".into()),
            description: Some("Complete set".into()),
            category: Some("books".into()),
            condition: Some("fair".into()),
            transaction_type: Some("donate".into()),
            ..Default::default()
        }
    }

    /// Creates a sell item and moves it to `available` as moderation would.
    pub async fn available_sell_item(&self, owner: &Identity, price: Decimal) -> marketplace_item::Model {
        let created = self
            .items()
            .create_item(owner, Self::sell_input(price))
            .await
            .expect("create item");
        self.set_item_status(created.id, ItemStatus::Available).await;
        self.item(created.id).await
    }

    pub async fn set_item_status(&self, item_id: Uuid, status: ItemStatus) {
        marketplace_item::Entity::update_many()
            .col_expr(marketplace_item::Column::Status, Expr::value(status))
            .filter(marketplace_item::Column::Id.eq(item_id))
            .exec(&*self.db)
            .await
            .expect("set item status");
    }

    /// Reads an item without counting a view.
    pub async fn item(&self, item_id: Uuid) -> marketplace_item::Model {
        marketplace_item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await
            .expect("query item")
            .expect("item exists")
    }

    pub fn token(&self, identity: &Identity) -> String {
        self.state
            .auth
            .issue_token(identity, None)
            .expect("issue token")
    }

    /// Waits briefly for the background dispatcher to deliver `count` notifications.
    pub async fn notifications(&self, count: usize) -> Vec<Notification> {
        for _ in 0..50 {
            {
                let seen = self.notifier.seen.lock().await;
                if seen.len() >= count {
                    return seen.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.notifier.seen.lock().await.clone()
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn insert_municipality(
    db: &DatabaseConnection,
    name: &str,
    slug: &str,
    psgc: &str,
) -> municipality::Model {
    municipality::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        slug: Set(slug.to_string()),
        psgc_code: Set(Some(psgc.to_string())),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("insert municipality")
}
