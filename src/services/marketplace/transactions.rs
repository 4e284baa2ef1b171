use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{begin, commit, pickup::PickupProposal, ValidPickup};
use crate::{
    auth::{
        guard::{self, Required},
        Identity,
    },
    config::MarketplaceConfig,
    db::is_schema_missing,
    entities::{
        marketplace_item::{self as item, ItemStatus, TransactionType},
        marketplace_transaction::{self as transaction, TransactionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::Catalog,
};

const DUPLICATE_REQUEST: &str = "This item already has a pending request";

/// Buyer's request for an item
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct CreateTransactionInput {
    pub item_id: Option<Uuid>,
    /// Free-form note for the seller
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// A caller's transactions split by role, newest first
#[derive(Debug, Clone, Default)]
pub struct MyTransactions {
    pub as_buyer: Vec<transaction::Model>,
    pub as_seller: Vec<transaction::Model>,
}

/// Negotiation engine: request, propose, confirm, reject and the legacy accept
#[derive(Clone)]
pub struct TransactionService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: EventSender,
    catalog: Arc<dyn Catalog>,
    config: MarketplaceConfig,
}

fn record_transition(name: &'static str) {
    metrics::counter!("marketplace_transaction_transitions_total", 1, "transition" => name);
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

async fn load_transaction(
    txn: &DatabaseTransaction,
    id: Uuid,
) -> Result<transaction::Model, ServiceError> {
    let mut select = transaction::Entity::find_by_id(id);
    if txn.get_database_backend() != DbBackend::Sqlite {
        select = select.lock_exclusive();
    }
    select
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound("Transaction not found".into()))
}

/// Puts an active item back on the market.
async fn release_item(txn: &DatabaseTransaction, item_id: Uuid) -> Result<u64, ServiceError> {
    let result = item::Entity::update_many()
        .col_expr(item::Column::Status, Expr::value(ItemStatus::Available))
        .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(item::Column::Id.eq(item_id))
        .filter(item::Column::IsActive.eq(true))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected)
}

/// Moves an item from `from` to `to` only if it is still in `from`.
async fn swap_item_status(
    txn: &DatabaseTransaction,
    item_id: Uuid,
    from: ItemStatus,
    to: ItemStatus,
) -> Result<bool, ServiceError> {
    let result = item::Entity::update_many()
        .col_expr(item::Column::Status, Expr::value(to))
        .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(item::Column::Id.eq(item_id))
        .filter(item::Column::Status.eq(from))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(result.rows_affected == 1)
}

impl TransactionService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: EventSender,
        catalog: Arc<dyn Catalog>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            catalog,
            config,
        }
    }

    /// Opens a negotiation on an available item. The item itself is not touched.
    #[instrument(skip(self, identity, input), fields(user_id = %identity.user_id))]
    pub async fn create_transaction(
        &self,
        identity: &Identity,
        input: CreateTransactionInput,
    ) -> Result<transaction::Model, ServiceError> {
        guard::require_verification(identity, Required::FullyVerified, Utc::now().date_naive())?;

        let buyer = self
            .catalog
            .user(identity.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;

        input.validate()?;
        let item_id = input
            .item_id
            .ok_or_else(|| ServiceError::ValidationError("item_id is required".into()))?;

        let txn = begin(&*self.db_pool).await?;

        let mut select = item::Entity::find_by_id(item_id);
        if txn.get_database_backend() != DbBackend::Sqlite {
            select = select.lock_exclusive();
        }
        let listed = select
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Item not found".into()))?;

        if !listed.is_active || listed.status != ItemStatus::Available {
            return Err(ServiceError::Conflict("Item is no longer available".into()));
        }
        guard::require_distinct_parties(buyer.id, listed.owner_id)?;
        guard::require_same_municipality(buyer.municipality_id, Some(listed.municipality_id))?;

        let live = transaction::Entity::find()
            .filter(transaction::Column::ItemId.eq(item_id))
            .filter(transaction::Column::Status.is_in(TransactionStatus::LIVE))
            .count(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if live > 0 {
            metrics::counter!("marketplace_transaction_conflicts_total", 1);
            return Err(ServiceError::Conflict(DUPLICATE_REQUEST.into()));
        }

        let amount = match listed.transaction_type {
            TransactionType::Sell => listed.price,
            _ => None,
        };
        let inserted = transaction::ActiveModel {
            item_id: Set(listed.id),
            buyer_id: Set(buyer.id),
            seller_id: Set(listed.owner_id),
            transaction_type: Set(listed.transaction_type),
            amount: Set(amount),
            status: Set(TransactionStatus::Pending),
            pickup_at: Set(None),
            pickup_location: Set(None),
            buyer_notes: Set(input
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())),
            ..Default::default()
        }
        .insert(&txn)
        .await;

        let created = match inserted {
            Ok(model) => model,
            Err(e) if is_unique_violation(&e) => {
                metrics::counter!("marketplace_transaction_conflicts_total", 1);
                warn!(item_id = %item_id, "Lost race for item negotiation slot");
                return Err(ServiceError::Conflict(DUPLICATE_REQUEST.into()));
            }
            Err(e) => return Err(ServiceError::db_error(e)),
        };

        match commit(txn).await {
            Err(ServiceError::Conflict(_)) => {
                metrics::counter!("marketplace_transaction_conflicts_total", 1);
                return Err(ServiceError::Conflict(DUPLICATE_REQUEST.into()));
            }
            other => other?,
        }

        info!(transaction_id = %created.id, item_id = %item_id, "Transaction requested");
        record_transition("create");
        self.event_sender.send_or_log(Event::TransactionRequested {
            transaction_id: created.id,
            item_id: created.item_id,
            buyer_id: created.buyer_id,
            seller_id: created.seller_id,
        });
        Ok(created)
    }

    /// Seller proposes (or re-proposes) pickup details.
    #[instrument(skip(self, identity, proposal), fields(user_id = %identity.user_id, transaction_id = %transaction_id))]
    pub async fn propose(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
        proposal: PickupProposal,
    ) -> Result<transaction::Model, ServiceError> {
        let pickup = proposal.validate_at(Utc::now(), self.config.pickup_lead_minutes)?;

        let txn = begin(&*self.db_pool).await?;
        let current = load_transaction(&txn, transaction_id).await?;

        if current.seller_id != identity.user_id {
            return Err(ServiceError::Forbidden(
                "Only the seller can propose pickup details".into(),
            ));
        }
        if current.status.is_terminal() {
            return Err(ServiceError::Conflict(
                "Proposal not allowed in current status".into(),
            ));
        }

        let updated = self.store_pickup(&txn, current, &pickup).await?;
        commit(txn).await?;

        info!(pickup_at = %pickup.pickup_at, "Pickup proposed");
        record_transition("propose");
        self.notify_pickup(&updated, pickup);
        Ok(updated)
    }

    /// Buyer accepts the proposed pickup; the item becomes reserved.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, transaction_id = %transaction_id))]
    pub async fn confirm(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
    ) -> Result<transaction::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;
        let current = load_transaction(&txn, transaction_id).await?;

        if current.buyer_id != identity.user_id {
            return Err(ServiceError::Forbidden("Only the buyer can confirm".into()));
        }
        if current.status != TransactionStatus::AwaitingBuyer {
            return Err(ServiceError::Conflict(
                "Transaction is not awaiting buyer confirmation".into(),
            ));
        }
        if current.pickup_at.is_none() || current.pickup_location.is_none() {
            return Err(ServiceError::Conflict("Pickup details are incomplete".into()));
        }

        let item_id = current.item_id;
        if !swap_item_status(&txn, item_id, ItemStatus::Available, ItemStatus::Reserved).await? {
            warn!(item_id = %item_id, "Item was not available at confirmation; status left unchanged");
        }

        let mut active: transaction::ActiveModel = current.into();
        active.status = Set(TransactionStatus::Accepted);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        commit(txn).await?;

        info!(item_id = %item_id, "Transaction accepted by buyer");
        record_transition("confirm");
        self.event_sender.send_or_log(Event::TransactionConfirmed {
            transaction_id: updated.id,
            item_id: updated.item_id,
            seller_id: updated.seller_id,
        });
        Ok(updated)
    }

    /// Buyer declines the proposed pickup; the item goes back on the market.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, transaction_id = %transaction_id))]
    pub async fn reject_by_buyer(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
    ) -> Result<transaction::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;
        let current = load_transaction(&txn, transaction_id).await?;

        if current.buyer_id != identity.user_id {
            return Err(ServiceError::Forbidden(
                "Only the buyer can reject the proposal".into(),
            ));
        }
        if current.status != TransactionStatus::AwaitingBuyer {
            return Err(ServiceError::Conflict(
                "Transaction is not awaiting buyer confirmation".into(),
            ));
        }

        let updated = self.finish_rejection(txn, current).await?;
        record_transition("reject_buyer");
        self.event_sender.send_or_log(Event::TransactionRejected {
            transaction_id: updated.id,
            item_id: updated.item_id,
            notify_user_id: updated.seller_id,
            by_seller: false,
        });
        Ok(updated)
    }

    /// Seller turns down a live request.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, transaction_id = %transaction_id))]
    pub async fn reject_by_seller(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
    ) -> Result<transaction::Model, ServiceError> {
        let txn = begin(&*self.db_pool).await?;
        let current = load_transaction(&txn, transaction_id).await?;

        if current.seller_id != identity.user_id {
            return Err(ServiceError::Forbidden(
                "Only the seller can reject this transaction".into(),
            ));
        }
        if current.status.is_terminal() {
            return Err(ServiceError::Conflict(
                "Only pending or awaiting_buyer transactions can be rejected".into(),
            ));
        }

        let updated = self.finish_rejection(txn, current).await?;
        record_transition("reject_seller");
        self.event_sender.send_or_log(Event::TransactionRejected {
            transaction_id: updated.id,
            item_id: updated.item_id,
            notify_user_id: updated.buyer_id,
            by_seller: true,
        });
        Ok(updated)
    }

    /// Older single-step seller acceptance. Behaves like [`Self::propose`] and
    /// additionally puts a `reserved` item back to `available` when no
    /// negotiation on it has been confirmed.
    #[instrument(skip(self, identity, proposal), fields(user_id = %identity.user_id, transaction_id = %transaction_id))]
    pub async fn accept(
        &self,
        identity: &Identity,
        transaction_id: Uuid,
        proposal: PickupProposal,
    ) -> Result<transaction::Model, ServiceError> {
        let pickup = proposal.validate_at(Utc::now(), self.config.pickup_lead_minutes)?;

        let txn = begin(&*self.db_pool).await?;
        let current = load_transaction(&txn, transaction_id).await?;

        if current.seller_id != identity.user_id {
            return Err(ServiceError::Forbidden(
                "Only the seller can accept this transaction".into(),
            ));
        }
        if current.status.is_terminal() {
            return Err(ServiceError::Conflict(
                "Transaction cannot be accepted in its current state".into(),
            ));
        }

        let item_id = current.item_id;
        let confirmed = transaction::Entity::find()
            .filter(transaction::Column::ItemId.eq(item_id))
            .filter(transaction::Column::Status.eq(TransactionStatus::Accepted))
            .count(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if confirmed == 0
            && swap_item_status(&txn, item_id, ItemStatus::Reserved, ItemStatus::Available).await?
        {
            warn!(item_id = %item_id, "Normalized reserved item without a confirmed transaction");
        }

        let updated = self.store_pickup(&txn, current, &pickup).await?;
        commit(txn).await?;

        info!(pickup_at = %pickup.pickup_at, "Pickup details saved via legacy accept");
        record_transition("accept");
        self.notify_pickup(&updated, pickup);
        Ok(updated)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_my_transactions(
        &self,
        identity: &Identity,
    ) -> Result<MyTransactions, ServiceError> {
        let as_buyer = self
            .list_by(transaction::Column::BuyerId, identity.user_id)
            .await;
        let as_seller = self
            .list_by(transaction::Column::SellerId, identity.user_id)
            .await;

        match (as_buyer, as_seller) {
            (Ok(as_buyer), Ok(as_seller)) => Ok(MyTransactions {
                as_buyer,
                as_seller,
            }),
            (Err(e), _) | (_, Err(e)) if is_schema_missing(&e) => {
                warn!(error = %e, "Marketplace tables missing; returning no transactions");
                Ok(MyTransactions::default())
            }
            (Err(e), _) | (_, Err(e)) => Err(ServiceError::db_error(e)),
        }
    }

    async fn list_by(
        &self,
        column: transaction::Column,
        user_id: Uuid,
    ) -> Result<Vec<transaction::Model>, DbErr> {
        transaction::Entity::find()
            .filter(column.eq(user_id))
            .order_by_desc(transaction::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
    }

    async fn store_pickup(
        &self,
        txn: &DatabaseTransaction,
        current: transaction::Model,
        pickup: &ValidPickup,
    ) -> Result<transaction::Model, ServiceError> {
        let mut active: transaction::ActiveModel = current.into();
        active.pickup_at = Set(Some(pickup.pickup_at));
        active.pickup_location = Set(Some(pickup.pickup_location.clone()));
        active.status = Set(TransactionStatus::AwaitingBuyer);
        active.update(txn).await.map_err(ServiceError::db_error)
    }

    async fn finish_rejection(
        &self,
        txn: DatabaseTransaction,
        current: transaction::Model,
    ) -> Result<transaction::Model, ServiceError> {
        let item_id = current.item_id;
        let mut active: transaction::ActiveModel = current.into();
        active.status = Set(TransactionStatus::Rejected);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        let released = release_item(&txn, item_id).await?;
        commit(txn).await?;

        info!(item_id = %item_id, released = released > 0, "Transaction rejected");
        Ok(updated)
    }

    fn notify_pickup(&self, updated: &transaction::Model, pickup: ValidPickup) {
        self.event_sender.send_or_log(Event::PickupProposed {
            transaction_id: updated.id,
            buyer_id: updated.buyer_id,
            pickup_at: pickup.pickup_at,
            pickup_location: pickup.pickup_location,
        });
    }
}
