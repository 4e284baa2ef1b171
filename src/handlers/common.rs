use crate::{services::marketplace::Page, ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Success envelope carrying a human-readable message alongside the data
pub fn success_with_message<T: Serialize>(data: T, message: &str) -> Json<ApiResponse<T>> {
    let mut response = ApiResponse::success(data);
    response.message = Some(message.to_string());
    Json(response)
}

/// Converts a service page into the wire shape, mapping each row.
pub fn paginated<T, U>(page: Page<T>) -> PaginatedResponse<U>
where
    U: From<T>,
{
    PaginatedResponse {
        items: page.items.into_iter().map(U::from).collect(),
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages: page.pages,
    }
}
