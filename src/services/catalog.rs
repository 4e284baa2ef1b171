use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{municipality, user};
use crate::errors::ServiceError;

/// Read-only lookups into the user and municipality catalogs
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn user(&self, id: Uuid) -> Result<Option<user::Model>, ServiceError>;
    async fn municipality(&self, id: Uuid) -> Result<Option<municipality::Model>, ServiceError>;
}

#[derive(Clone)]
pub struct DbCatalog {
    db_pool: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    #[instrument(skip(self))]
    async fn user(&self, id: Uuid) -> Result<Option<user::Model>, ServiceError> {
        user::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    async fn municipality(&self, id: Uuid) -> Result<Option<municipality::Model>, ServiceError> {
        municipality::Entity::find_by_id(id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
