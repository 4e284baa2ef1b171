use crate::{
    auth::AuthUser,
    entities::marketplace_transaction,
    errors::ServiceError,
    handlers::common::{created_response, success_with_message},
    services::marketplace::{CreateTransactionInput, MyTransactions, PickupProposal},
    tracing::with_metrics,
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": "bb0e8400-e29b-41d4-a716-446655440000",
    "item_id": "aa0e8400-e29b-41d4-a716-446655440000",
    "buyer_id": "223e4567-e89b-12d3-a456-426614174000",
    "seller_id": "123e4567-e89b-12d3-a456-426614174000",
    "transaction_type": "sell",
    "amount": "1500.00",
    "status": "awaiting_buyer",
    "pickup_at": "2025-03-02T01:30:00Z",
    "pickup_location": "Iba Town Hall",
    "created_at": "2025-03-01T10:30:00Z",
    "updated_at": "2025-03-01T11:00:00Z"
}))]
pub struct TransactionResponse {
    pub id: Uuid,
    pub item_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub transaction_type: String,
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
    /// pending, awaiting_buyer, accepted, rejected
    pub status: String,
    pub pickup_at: Option<DateTime<Utc>>,
    pub pickup_location: Option<String>,
    pub buyer_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<marketplace_transaction::Model> for TransactionResponse {
    fn from(model: marketplace_transaction::Model) -> Self {
        Self {
            id: model.id,
            item_id: model.item_id,
            buyer_id: model.buyer_id,
            seller_id: model.seller_id,
            transaction_type: model.transaction_type.to_string(),
            amount: model.amount,
            status: model.status.to_string(),
            pickup_at: model.pickup_at,
            pickup_location: model.pickup_location,
            buyer_notes: model.buyer_notes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MyTransactionsResponse {
    pub as_buyer: Vec<TransactionResponse>,
    pub as_seller: Vec<TransactionResponse>,
}

impl From<MyTransactions> for MyTransactionsResponse {
    fn from(mine: MyTransactions) -> Self {
        Self {
            as_buyer: mine.as_buyer.into_iter().map(Into::into).collect(),
            as_seller: mine.as_seller.into_iter().map(Into::into).collect(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions",
    request_body = CreateTransactionInput,
    responses(
        (status = 201, description = "Request opened", body = ApiResponse<TransactionResponse>),
        (status = 403, description = "Own item or other municipality", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item unavailable or already requested", body = crate::errors::ErrorResponse),
        (status = 412, description = "Caller not fully verified", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<CreateTransactionInput>,
) -> Result<(StatusCode, Json<ApiResponse<TransactionResponse>>), ServiceError> {
    let service = state.transaction_service();
    let created = with_metrics("create_transaction", || {
        service.create_transaction(&identity, payload)
    })
    .await?;
    Ok(created_response(TransactionResponse::from(created)))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions/:id/propose",
    request_body = PickupProposal,
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Pickup proposed; awaiting buyer", body = ApiResponse<TransactionResponse>),
        (status = 400, description = "Invalid pickup details", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not the seller", body = crate::errors::ErrorResponse),
        (status = 409, description = "Wrong state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn propose_transaction(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PickupProposal>,
) -> ApiResult<TransactionResponse> {
    let updated = state
        .transaction_service()
        .propose(&identity, id, payload)
        .await?;
    Ok(success_with_message(
        TransactionResponse::from(updated),
        "Pickup details proposed",
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions/:id/confirm",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Accepted; item reserved", body = ApiResponse<TransactionResponse>),
        (status = 403, description = "Caller is not the buyer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not awaiting buyer", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn confirm_transaction(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<TransactionResponse> {
    let updated = state.transaction_service().confirm(&identity, id).await?;
    Ok(success_with_message(
        TransactionResponse::from(updated),
        "Transaction accepted by buyer",
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions/:id/reject-buyer",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Proposal rejected; item available again", body = ApiResponse<TransactionResponse>),
        (status = 403, description = "Caller is not the buyer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Not awaiting buyer", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn reject_transaction_as_buyer(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<TransactionResponse> {
    let updated = state
        .transaction_service()
        .reject_by_buyer(&identity, id)
        .await?;
    Ok(success_with_message(
        TransactionResponse::from(updated),
        "Proposal rejected. Item is available again.",
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions/:id/reject",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Request rejected by seller", body = ApiResponse<TransactionResponse>),
        (status = 403, description = "Caller is not the seller", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already finished", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn reject_transaction_as_seller(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<TransactionResponse> {
    let updated = state
        .transaction_service()
        .reject_by_seller(&identity, id)
        .await?;
    Ok(success_with_message(
        TransactionResponse::from(updated),
        "Transaction rejected",
    ))
}

/// Older clients accept in one step; behaves like `propose`.
#[utoipa::path(
    post,
    path = "/api/v1/marketplace/transactions/:id/accept",
    request_body = PickupProposal,
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Pickup saved; awaiting buyer", body = ApiResponse<TransactionResponse>),
        (status = 400, description = "Invalid pickup details", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not the seller", body = crate::errors::ErrorResponse),
        (status = 409, description = "Wrong state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn accept_transaction(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PickupProposal>,
) -> ApiResult<TransactionResponse> {
    let updated = state
        .transaction_service()
        .accept(&identity, id, payload)
        .await?;
    Ok(success_with_message(
        TransactionResponse::from(updated),
        "Pickup details saved. Awaiting buyer confirmation.",
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/marketplace/my-transactions",
    responses(
        (status = 200, description = "Caller's transactions by role", body = ApiResponse<MyTransactionsResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn list_my_transactions(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<MyTransactionsResponse> {
    let mine = state
        .transaction_service()
        .list_my_transactions(&identity)
        .await?;
    Ok(Json(ApiResponse::success(mine.into())))
}
