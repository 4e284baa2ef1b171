use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MunLink API",
        version = "1.0.0",
        description = r#"
# MunLink Civic Services API

Resident marketplace for the municipalities of Zambales: residents list items
to sell, lend or donate, and negotiate pickups with neighbours registered in
the same municipality.

## Authentication

Write endpoints require a bearer JWT issued by the MunLink identity service:

```
Authorization: Bearer <your-jwt-token>
```

Posting items and requesting them additionally require a fully verified
account (verified email and approved identity documents).

## Negotiation flow

1. Buyer `POST /marketplace/transactions` with an `item_id` (status `pending`)
2. Seller `POST /marketplace/transactions/{id}/propose` with `pickup_at` and `pickup_location` (status `awaiting_buyer`)
3. Buyer `POST /marketplace/transactions/{id}/confirm` (status `accepted`, item `reserved`)
   or `POST /marketplace/transactions/{id}/reject-buyer` (status `rejected`, item `available`)

An item holds at most one `pending` or `awaiting_buyer` request at a time.

## Error Handling

Errors share one shape:

```json
{
  "error": "Conflict",
  "kind": "conflict",
  "message": "Conflict: This item already has a pending request",
  "request_id": "8d5e2c1a-...",
  "timestamp": "2025-03-01T00:00:00Z"
}
```

## Pagination

`GET /marketplace/items` accepts `page` (default 1) and `per_page`
(default 20, max 100).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8000", description = "Local development")
    ),
    tags(
        (name = "marketplace", description = "Listings and pickup negotiation"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Items
        crate::handlers::marketplace::items::list_items,
        crate::handlers::marketplace::items::create_item,
        crate::handlers::marketplace::items::get_item,
        crate::handlers::marketplace::items::update_item,
        crate::handlers::marketplace::items::delete_item,
        crate::handlers::marketplace::items::upload_item_image,
        crate::handlers::marketplace::items::list_my_items,

        // Transactions
        crate::handlers::marketplace::transactions::create_transaction,
        crate::handlers::marketplace::transactions::propose_transaction,
        crate::handlers::marketplace::transactions::confirm_transaction,
        crate::handlers::marketplace::transactions::reject_transaction_as_buyer,
        crate::handlers::marketplace::transactions::reject_transaction_as_seller,
        crate::handlers::marketplace::transactions::accept_transaction,
        crate::handlers::marketplace::transactions::list_my_transactions,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::readiness_check,
    ),
    components(
        schemas(
            crate::handlers::marketplace::items::ItemResponse,
            crate::handlers::marketplace::items::ImageUploadResponse,
            crate::handlers::marketplace::transactions::TransactionResponse,
            crate::handlers::marketplace::transactions::MyTransactionsResponse,
            crate::services::marketplace::CreateItemInput,
            crate::services::marketplace::UpdateItemInput,
            crate::services::marketplace::CreateTransactionInput,
            crate::services::marketplace::PickupProposal,
            crate::handlers::health::HealthResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
