pub mod common;
pub mod health;
pub mod marketplace;

use crate::config::MarketplaceConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    catalog::{Catalog, DbCatalog},
    marketplace::{ItemService, TransactionService},
    storage::{FileStore, LocalFileStore},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub items: Arc<ItemService>,
    pub transactions: Arc<TransactionService>,
}

impl AppServices {
    /// Wires the marketplace against the database catalog and local upload storage.
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: &MarketplaceConfig) -> Self {
        let catalog: Arc<dyn Catalog> = Arc::new(DbCatalog::new(db_pool.clone()));
        let file_store: Arc<dyn FileStore> =
            Arc::new(LocalFileStore::new(config.uploads_dir.clone()));
        Self::with_collaborators(db_pool, event_sender, catalog, file_store, config)
    }

    pub fn with_collaborators(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        catalog: Arc<dyn Catalog>,
        file_store: Arc<dyn FileStore>,
        config: &MarketplaceConfig,
    ) -> Self {
        let items = Arc::new(ItemService::new(
            db_pool.clone(),
            event_sender.clone(),
            catalog.clone(),
            file_store,
            config.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            db_pool,
            event_sender,
            catalog,
            config.clone(),
        ));

        Self {
            items,
            transactions,
        }
    }
}
