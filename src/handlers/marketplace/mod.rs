pub mod items;
pub mod transactions;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::{services::storage::MAX_UPLOAD_BYTES, AppState};

/// Routes mounted under `/api/v1/marketplace`.
pub fn marketplace_routes() -> Router<AppState> {
    let uploads = Router::new()
        .route("/items/:id/images", post(items::upload_item_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024));

    Router::new()
        .route("/items", get(items::list_items).post(items::create_item))
        .route(
            "/items/:id",
            get(items::get_item)
                .put(items::update_item)
                .delete(items::delete_item),
        )
        .merge(uploads)
        .route("/my-items", get(items::list_my_items))
        .route("/transactions", post(transactions::create_transaction))
        .route(
            "/transactions/:id/propose",
            post(transactions::propose_transaction),
        )
        .route(
            "/transactions/:id/confirm",
            post(transactions::confirm_transaction),
        )
        .route(
            "/transactions/:id/reject-buyer",
            post(transactions::reject_transaction_as_buyer),
        )
        .route(
            "/transactions/:id/reject",
            post(transactions::reject_transaction_as_seller),
        )
        .route(
            "/transactions/:id/accept",
            post(transactions::accept_transaction),
        )
        .route("/my-transactions", get(transactions::list_my_transactions))
}
