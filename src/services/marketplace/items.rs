use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{begin, commit, Page};
use crate::{
    auth::{
        guard::{self, Required},
        Identity,
    },
    config::{MarketplaceConfig, OwnerStatusPolicy},
    db::is_schema_missing,
    entities::{
        marketplace_item::{
            self as item, images_json, ItemCondition, ItemStatus, TransactionType,
        },
        municipality,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::Catalog,
        storage::{FileKind, FileStore},
    },
};

/// Fields accepted when listing a new item
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CreateItemInput {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    /// new, like_new, good, fair or poor
    pub condition: Option<String>,
    /// sell, lend or donate
    pub transaction_type: Option<String>,
    #[schema(value_type = Option<String>, example = "1500.00")]
    pub price: Option<Decimal>,
    pub lend_duration_days: Option<i32>,
    #[schema(value_type = Option<String>)]
    pub security_deposit: Option<Decimal>,
    #[validate(length(max = 200))]
    pub pickup_location: Option<String>,
}

/// Owner edits; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateItemInput {
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub condition: Option<String>,
    /// Applied only to sell items
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    /// Honoured only under the `owner_override` status policy
    pub status: Option<String>,
    #[validate(length(max = 200))]
    pub pickup_location: Option<String>,
    /// Replaces the image list wholesale
    pub images: Option<Vec<String>>,
}

/// Public listing filters
#[derive(Debug, Clone, Default)]
pub struct ItemFilters {
    pub municipality_id: Option<Uuid>,
    pub category: Option<String>,
    pub transaction_type: Option<String>,
    /// `None` means `available`; an empty string disables the filter
    pub status: Option<String>,
}

/// Raw upload handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Item with its municipality's display name
#[derive(Debug, Clone)]
pub struct ListedItem {
    pub item: item::Model,
    pub municipality_name: Option<String>,
}

fn required_text<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ServiceError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::ValidationError(format!("{} is required", field)))
}

fn parse_enum<T: FromStr>(raw: &str, field: &str, allowed: &str) -> Result<T, ServiceError> {
    T::from_str(raw.trim().to_ascii_lowercase().as_str()).map_err(|_| {
        ServiceError::ValidationError(format!("Invalid {}; expected one of: {}", field, allowed))
    })
}

pub(crate) fn parse_transaction_type(raw: &str) -> Result<TransactionType, ServiceError> {
    parse_enum(raw, "transaction_type", "sell, lend, donate")
}

pub(crate) fn parse_condition(raw: &str) -> Result<ItemCondition, ServiceError> {
    parse_enum(raw, "condition", "new, like_new, good, fair, poor")
}

pub(crate) fn parse_status(raw: &str) -> Result<ItemStatus, ServiceError> {
    parse_enum(raw, "status", "pending, available, reserved, completed")
}

/// Enforces "price present iff sell, and positive".
pub(crate) fn validate_price(
    transaction_type: TransactionType,
    price: Option<Decimal>,
) -> Result<Option<Decimal>, ServiceError> {
    match (transaction_type, price) {
        (TransactionType::Sell, None) => Err(ServiceError::ValidationError(
            "Price is required for sell items".into(),
        )),
        (TransactionType::Sell, Some(p)) if p <= Decimal::ZERO => Err(
            ServiceError::ValidationError("Price must be greater than 0".into()),
        ),
        (TransactionType::Sell, Some(p)) => Ok(Some(p.round_dp(2))),
        (_, Some(_)) => Err(ServiceError::ValidationError(
            "Price is only allowed for sell items".into(),
        )),
        (_, None) => Ok(None),
    }
}

/// Item registry: creation, owner edits, soft deletion and public reads
#[derive(Clone)]
pub struct ItemService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    catalog: Arc<dyn Catalog>,
    file_store: Arc<dyn FileStore>,
    config: MarketplaceConfig,
}

impl ItemService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: EventSender,
        catalog: Arc<dyn Catalog>,
        file_store: Arc<dyn FileStore>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            catalog,
            file_store,
            config,
        }
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// Lists a new item in `pending` status under the owner's municipality.
    #[instrument(skip(self, identity, input), fields(user_id = %identity.user_id))]
    pub async fn create_item(
        &self,
        identity: &Identity,
        input: CreateItemInput,
    ) -> Result<item::Model, ServiceError> {
        guard::require_verification(identity, Required::FullyVerified, Utc::now().date_naive())?;

        let owner = self
            .catalog
            .user(identity.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

        input.validate()?;
        let title = required_text(&input.title, "title")?;
        let description = required_text(&input.description, "description")?;
        let category = required_text(&input.category, "category")?;
        let condition = parse_condition(required_text(&input.condition, "condition")?)?;
        let transaction_type =
            parse_transaction_type(required_text(&input.transaction_type, "transaction_type")?)?;
        let price = validate_price(transaction_type, input.price)?;

        if matches!(input.lend_duration_days, Some(days) if days <= 0) {
            return Err(ServiceError::ValidationError(
                "lend_duration_days must be positive".into(),
            ));
        }
        if matches!(input.security_deposit, Some(d) if d < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "security_deposit cannot be negative".into(),
            ));
        }

        let municipality_id = owner.municipality_id.ok_or_else(|| {
            ServiceError::PreconditionFailed(
                "Set your municipality in your profile before posting items".into(),
            )
        })?;

        let txn = begin(&*self.db_pool).await?;
        let created = item::ActiveModel {
            owner_id: Set(owner.id),
            municipality_id: Set(municipality_id),
            barangay_id: Set(owner.barangay_id),
            title: Set(title.to_string()),
            description: Set(description.to_string()),
            category: Set(category.to_string()),
            condition: Set(condition),
            transaction_type: Set(transaction_type),
            price: Set(price),
            lend_duration_days: Set(input.lend_duration_days),
            security_deposit: Set(input.security_deposit),
            pickup_location: Set(input
                .pickup_location
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)),
            status: Set(ItemStatus::Pending),
            is_active: Set(true),
            images: Set(images_json(&[])),
            view_count: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;
        commit(txn).await?;

        info!(item_id = %created.id, transaction_type = %created.transaction_type, "Item created");
        metrics::counter!("marketplace_items_created_total", 1);
        self.event_sender.send_or_log(Event::ItemCreated {
            item_id: created.id,
            owner_id: created.owner_id,
        });

        Ok(created)
    }

    /// Applies an owner's edits. See [`OwnerStatusPolicy`] for `status`.
    #[instrument(skip(self, identity, patch), fields(user_id = %identity.user_id, item_id = %item_id))]
    pub async fn update_item(
        &self,
        identity: &Identity,
        item_id: Uuid,
        patch: UpdateItemInput,
    ) -> Result<item::Model, ServiceError> {
        patch.validate()?;

        let txn = begin(&*self.db_pool).await?;
        let existing = item::Entity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|i| i.is_active)
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;

        guard::require_owner(identity, existing.owner_id, "You can only edit your own items")?;

        let owner_status = match (patch.status.as_deref(), self.config.owner_status_policy) {
            (None, _) => None,
            (Some(requested), OwnerStatusPolicy::Locked) => {
                warn!(requested = %requested, "Rejecting owner-supplied item status");
                return Err(ServiceError::Forbidden(
                    "Item status is managed by the marketplace".into(),
                ));
            }
            (Some(requested), OwnerStatusPolicy::OwnerOverride) => Some(parse_status(requested)?),
        };

        let is_sell = existing.transaction_type == TransactionType::Sell;
        let mut active: item::ActiveModel = existing.into();

        if let Some(title) = patch.title.as_ref() {
            active.title = Set(required_text(&Some(title.clone()), "title")?.to_string());
        }
        if let Some(description) = patch.description.as_ref() {
            active.description =
                Set(required_text(&Some(description.clone()), "description")?.to_string());
        }
        if let Some(condition) = patch.condition.as_deref() {
            active.condition = Set(parse_condition(condition)?);
        }
        if let Some(price) = patch.price {
            if is_sell {
                active.price = Set(validate_price(TransactionType::Sell, Some(price))?);
            } else {
                debug!("Ignoring price on non-sell item");
            }
        }
        if let Some(status) = owner_status {
            warn!(status = %status, "Owner overriding item status");
            active.status = Set(status);
        }
        if let Some(location) = patch.pickup_location.as_deref() {
            let location = location.trim();
            active.pickup_location = Set((!location.is_empty()).then(|| location.to_string()));
        }
        if let Some(images) = patch.images.as_ref() {
            if images.len() > self.config.max_item_images {
                return Err(ServiceError::LimitExceeded(format!(
                    "Maximum images reached ({})",
                    self.config.max_item_images
                )));
            }
            active.images = Set(images_json(images));
        }

        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        commit(txn).await?;

        info!("Item updated");
        Ok(updated)
    }

    /// Marks the item inactive. Deleting an already inactive item is a no-op.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, item_id = %item_id))]
    pub async fn soft_delete_item(
        &self,
        identity: &Identity,
        item_id: Uuid,
    ) -> Result<item::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;
        let existing = item::Entity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;

        guard::require_owner(identity, existing.owner_id, "You can only delete your own items")?;

        if !existing.is_active {
            debug!("Item already inactive");
            return Ok(existing);
        }

        let owner_id = existing.owner_id;
        let mut active: item::ActiveModel = existing.into();
        active.is_active = Set(false);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        commit(txn).await?;

        info!("Item soft-deleted");
        self.event_sender
            .send_or_log(Event::ItemDeleted { item_id, owner_id });
        Ok(updated)
    }

    /// Public listing: active items, newest first. A missing schema yields an empty page.
    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        filters: ItemFilters,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<Page<ListedItem>, ServiceError> {
        let page = page.unwrap_or(1).max(1);
        let per_page = self.config.page_size(per_page);
        let offset = (page - 1).checked_mul(per_page);
        if !matches!(offset, Some(offset) if offset <= i64::MAX as u64) {
            return Err(ServiceError::ValidationError("page is out of range".into()));
        }

        let mut query = item::Entity::find().filter(item::Column::IsActive.eq(true));
        if let Some(municipality_id) = filters.municipality_id {
            query = query.filter(item::Column::MunicipalityId.eq(municipality_id));
        }
        if let Some(category) = filters.category.as_deref().filter(|c| !c.is_empty()) {
            query = query.filter(item::Column::Category.eq(category));
        }
        if let Some(tt) = filters.transaction_type.as_deref().filter(|t| !t.is_empty()) {
            query = query.filter(item::Column::TransactionType.eq(parse_transaction_type(tt)?));
        }
        match filters.status.as_deref() {
            None => query = query.filter(item::Column::Status.eq(ItemStatus::Available)),
            Some("") => {}
            Some(raw) => query = query.filter(item::Column::Status.eq(parse_status(raw)?)),
        }

        let paginator = query
            .order_by_desc(item::Column::CreatedAt)
            .find_also_related(municipality::Entity)
            .paginate(&*self.db_pool, per_page);

        let total = match paginator.num_items().await {
            Ok(total) => total,
            Err(e) if is_schema_missing(&e) => {
                warn!(error = %e, "Marketplace tables missing; returning empty listing");
                return Ok(Page::empty(page, per_page));
            }
            Err(e) => return Err(ServiceError::db_error(e)),
        };
        let rows = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        let items = rows
            .into_iter()
            .map(|(item, municipality)| ListedItem {
                item,
                municipality_name: municipality.map(|m| m.name),
            })
            .collect();

        Ok(Page::new(items, total, page, per_page))
    }

    /// Detail read; counts a view on every successful fetch.
    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: Uuid) -> Result<item::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;

        let existing = item::Entity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;
        if !existing.is_active {
            return Err(ServiceError::NotFound("Item is no longer available".into()));
        }

        item::Entity::update_many()
            .col_expr(
                item::Column::ViewCount,
                Expr::col(item::Column::ViewCount).add(1),
            )
            .filter(item::Column::Id.eq(item_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let viewed = item::Entity::find_by_id(item_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;
        commit(txn).await?;

        Ok(viewed)
    }

    /// Stores an image and appends its reference to the item.
    #[instrument(skip(self, identity, upload), fields(user_id = %identity.user_id, item_id = %item_id))]
    pub async fn attach_image(
        &self,
        identity: &Identity,
        item_id: Uuid,
        upload: ImageUpload,
    ) -> Result<(item::Model, String), ServiceError> {
        guard::require_verification(identity, Required::FullyVerified, Utc::now().date_naive())?;

        let existing = item::Entity::find_by_id(item_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|i| i.is_active)
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;
        guard::require_owner(identity, existing.owner_id, "You can only modify your own items")?;
        self.ensure_image_capacity(&existing)?;

        let scope = self
            .catalog
            .municipality(existing.municipality_id)
            .await?
            .map(|m| m.slug)
            .unwrap_or_else(|| "unknown".to_string());

        let reference = self
            .file_store
            .store(
                &upload.bytes,
                &upload.filename,
                identity.user_id,
                &scope,
                FileKind::MarketplaceItem(item_id),
            )
            .await?;

        match self.append_image(item_id, &reference).await {
            Ok(updated) => {
                let images = updated.image_refs().len();
                info!(path = %reference, images, "Image attached");
                Ok((updated, reference))
            }
            Err(err) => {
                if let Err(cleanup) = self.file_store.remove(&reference).await {
                    warn!(
                        path = %reference,
                        error = %cleanup,
                        "Failed to remove unattached upload"
                    );
                }
                Err(err)
            }
        }
    }

    /// Appends a stored reference under the item lock, re-checking capacity.
    async fn append_image(
        &self,
        item_id: Uuid,
        reference: &str,
    ) -> Result<item::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;
        let mut select = item::Entity::find_by_id(item_id);
        if txn.get_database_backend() != DbBackend::Sqlite {
            select = select.lock_exclusive();
        }
        let current = select
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .filter(|i| i.is_active)
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;
        self.ensure_image_capacity(&current)?;

        let mut refs = current.image_refs();
        refs.push(reference.to_string());
        let mut active: item::ActiveModel = current.into();
        active.images = Set(images_json(&refs));
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        commit(txn).await?;
        Ok(updated)
    }

    fn ensure_image_capacity(&self, item: &item::Model) -> Result<(), ServiceError> {
        if item.image_refs().len() >= self.config.max_item_images {
            return Err(ServiceError::LimitExceeded(format!(
                "Maximum images reached ({})",
                self.config.max_item_images
            )));
        }
        Ok(())
    }

    /// The caller's active items, newest first.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_my_items(
        &self,
        identity: &Identity,
    ) -> Result<Vec<item::Model>, ServiceError> {
        let result = item::Entity::find()
            .filter(item::Column::OwnerId.eq(identity.user_id))
            .filter(item::Column::IsActive.eq(true))
            .order_by_desc(item::Column::CreatedAt)
            .all(&*self.db_pool)
            .await;

        match result {
            Ok(items) => Ok(items),
            Err(e) if is_schema_missing(&e) => {
                warn!(error = %e, "Marketplace tables missing; returning no items");
                Ok(Vec::new())
            }
            Err(e) => Err(ServiceError::db_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn price_rules_follow_transaction_type() {
        assert_eq!(
            validate_price(TransactionType::Sell, Some(dec!(100))).unwrap(),
            Some(dec!(100))
        );
        assert_matches!(
            validate_price(TransactionType::Sell, None),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            validate_price(TransactionType::Sell, Some(dec!(0))),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            validate_price(TransactionType::Donate, Some(dec!(5))),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(validate_price(TransactionType::Lend, None).unwrap(), None);
    }

    #[test]
    fn enum_parsing_is_case_insensitive() {
        assert_eq!(parse_condition(" Like_New ").unwrap(), ItemCondition::LikeNew);
        assert_eq!(parse_transaction_type("SELL").unwrap(), TransactionType::Sell);
        assert_matches!(parse_status("sold"), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn required_text_rejects_blank() {
        assert_matches!(
            required_text(&Some("  ".into()), "title"),
            Err(ServiceError::ValidationError(msg)) if msg == "title is required"
        );
        assert_eq!(required_text(&Some(" Bike ".into()), "title").unwrap(), "Bike");
    }
}
