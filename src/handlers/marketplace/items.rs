use crate::{
    auth::AuthUser,
    entities::marketplace_item,
    errors::ServiceError,
    handlers::common::{created_response, paginated, success_with_message},
    services::marketplace::{CreateItemInput, ImageUpload, ItemFilters, ListedItem, UpdateItemInput},
    tracing::with_metrics,
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ItemListQuery {
    pub municipality_id: Option<Uuid>,
    pub category: Option<String>,
    /// sell, lend or donate
    pub transaction_type: Option<String>,
    /// Defaults to `available`; pass an empty value for every status
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(example = json!({
    "id": "aa0e8400-e29b-41d4-a716-446655440000",
    "owner_id": "123e4567-e89b-12d3-a456-426614174000",
    "municipality_id": "550e8400-e29b-41d4-a716-446655440000",
    "municipality_name": "Iba",
    "title": "Mountain bike",
    "description": "26-inch, lightly used",
    "category": "sports",
    "condition": "good",
    "transaction_type": "sell",
    "price": "1500.00",
    "status": "available",
    "is_active": true,
    "images": ["marketplace/iba/item_aa0e8400e29b41d4a716446655440000/3f1c.jpg"],
    "view_count": 12,
    "created_at": "2025-03-01T10:30:00Z",
    "updated_at": "2025-03-01T10:30:00Z"
}))]
pub struct ItemResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub municipality_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality_name: Option<String>,
    pub barangay_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: String,
    /// new, like_new, good, fair, poor
    pub condition: String,
    /// sell, lend, donate
    pub transaction_type: String,
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    pub lend_duration_days: Option<i32>,
    #[schema(value_type = Option<String>)]
    pub security_deposit: Option<Decimal>,
    pub pickup_location: Option<String>,
    /// pending, available, reserved, completed
    pub status: String,
    pub is_active: bool,
    pub images: Vec<String>,
    pub view_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<marketplace_item::Model> for ItemResponse {
    fn from(model: marketplace_item::Model) -> Self {
        let images = model.image_refs();
        Self {
            id: model.id,
            owner_id: model.owner_id,
            municipality_id: model.municipality_id,
            municipality_name: None,
            barangay_id: model.barangay_id,
            title: model.title,
            description: model.description,
            category: model.category,
            condition: model.condition.to_string(),
            transaction_type: model.transaction_type.to_string(),
            price: model.price,
            lend_duration_days: model.lend_duration_days,
            security_deposit: model.security_deposit,
            pickup_location: model.pickup_location,
            status: model.status.to_string(),
            is_active: model.is_active,
            images,
            view_count: model.view_count,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<ListedItem> for ItemResponse {
    fn from(listed: ListedItem) -> Self {
        let mut response = ItemResponse::from(listed.item);
        response.municipality_name = listed.municipality_name;
        response
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImageUploadResponse {
    /// Stored reference of the new image
    pub path: String,
    pub item: ItemResponse,
}

#[utoipa::path(
    get,
    path = "/api/v1/marketplace/items",
    params(ItemListQuery),
    responses(
        (status = 200, description = "Active listings, newest first", body = ApiResponse<PaginatedResponse<ItemResponse>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse)
    ),
    tag = "marketplace"
)]
pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> ApiResult<PaginatedResponse<ItemResponse>> {
    let filters = ItemFilters {
        municipality_id: query.municipality_id,
        category: query.category,
        transaction_type: query.transaction_type,
        status: query.status,
    };

    let page = state
        .item_service()
        .list_items(filters, query.page, query.per_page)
        .await?;

    Ok(Json(ApiResponse::success(paginated(page))))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/items",
    request_body = CreateItemInput,
    responses(
        (status = 201, description = "Item created in pending status", body = ApiResponse<ItemResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 412, description = "Caller not verified or has no municipality", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn create_item(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<CreateItemInput>,
) -> Result<(StatusCode, Json<ApiResponse<ItemResponse>>), ServiceError> {
    let service = state.item_service();
    let created =
        with_metrics("create_item", || service.create_item(&identity, payload)).await?;
    Ok(created_response(ItemResponse::from(created)))
}

#[utoipa::path(
    get,
    path = "/api/v1/marketplace/items/:id",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item fetched; view counted", body = ApiResponse<ItemResponse>),
        (status = 404, description = "Item not found or inactive", body = crate::errors::ErrorResponse)
    ),
    tag = "marketplace"
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ItemResponse> {
    let item = state.item_service().get_item(id).await?;
    Ok(Json(ApiResponse::success(ItemResponse::from(item))))
}

#[utoipa::path(
    put,
    path = "/api/v1/marketplace/items/:id",
    request_body = UpdateItemInput,
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item updated", body = ApiResponse<ItemResponse>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn update_item(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateItemInput>,
) -> ApiResult<ItemResponse> {
    let updated = state
        .item_service()
        .update_item(&identity, id, payload)
        .await?;
    Ok(success_with_message(
        ItemResponse::from(updated),
        "Item updated successfully",
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/marketplace/items/:id",
    params(("id" = Uuid, Path, description = "Item ID")),
    responses(
        (status = 200, description = "Item removed from listings", body = ApiResponse<ItemResponse>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn delete_item(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ItemResponse> {
    let deleted = state.item_service().soft_delete_item(&identity, id).await?;
    Ok(success_with_message(
        ItemResponse::from(deleted),
        "Item deleted successfully",
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/marketplace/items/:id/images",
    params(("id" = Uuid, Path, description = "Item ID")),
    request_body(content_type = "multipart/form-data", description = "Image in the `file` field"),
    responses(
        (status = 201, description = "Image stored and attached", body = ApiResponse<ImageUploadResponse>),
        (status = 400, description = "Missing or unsupported file", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 422, description = "Image limit reached", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn upload_item_image(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<ImageUploadResponse>>), ServiceError> {
    let upload = read_file_field(multipart).await?;
    let (item, path) = state
        .item_service()
        .attach_image(&identity, id, upload)
        .await?;

    Ok(created_response(ImageUploadResponse {
        path,
        item: ItemResponse::from(item),
    }))
}

/// Pulls the `file` part out of a multipart body.
async fn read_file_field(mut multipart: Multipart) -> Result<ImageUpload, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::ValidationError(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("No file selected".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::ValidationError(format!("Failed to read upload: {}", e)))?;
        return Ok(ImageUpload {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    Err(ServiceError::ValidationError("No file provided".into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/marketplace/my-items",
    responses(
        (status = 200, description = "Caller's active listings", body = ApiResponse<Vec<ItemResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "marketplace"
)]
pub async fn list_my_items(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Vec<ItemResponse>> {
    let items = state.item_service().list_my_items(&identity).await?;
    Ok(Json(ApiResponse::success(
        items.into_iter().map(ItemResponse::from).collect(),
    )))
}
