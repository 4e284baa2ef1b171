//! Resident marketplace: listings and the negotiation engine built on them.

pub mod items;
pub mod pickup;
pub mod transactions;

pub use items::{
    CreateItemInput, ImageUpload, ItemFilters, ItemService, ListedItem, UpdateItemInput,
};
pub use pickup::{PickupProposal, ValidPickup};
pub use transactions::{CreateTransactionInput, MyTransactions, TransactionService};

use sea_orm::{DatabaseTransaction, TransactionTrait};
use serde::Serialize;
use tracing::error;

use crate::errors::ServiceError;

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            items,
            total,
            page,
            per_page,
            pages,
        }
    }

    pub fn empty(page: u64, per_page: u64) -> Self {
        Self::new(Vec::new(), 0, page, per_page)
    }
}

pub(crate) async fn begin<C: TransactionTrait>(
    db: &C,
) -> Result<DatabaseTransaction, ServiceError> {
    db.begin().await.map_err(|e| {
        error!("Failed to begin transaction: {}", e);
        ServiceError::db_error(e)
    })
}

pub(crate) async fn commit(txn: DatabaseTransaction) -> Result<(), ServiceError> {
    txn.commit().await.map_err(|e| {
        error!("Failed to commit transaction: {}", e);
        ServiceError::db_error(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        let page: Page<u8> = Page::new(vec![], 41, 1, 20);
        assert_eq!(page.pages, 3);
        assert_eq!(Page::<u8>::empty(2, 20).pages, 0);
    }
}
