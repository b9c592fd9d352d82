use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::dto::{self, CreateOrderRequest, ListOrdersParams, UpdateOrderRequest};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order).put(update_order).delete(delete_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateOrderRequest>,
) -> axum::response::Response {
    let user_id = match dto::parse_user_id(&body.user_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lines = match dto::parse_items(&body.items) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.create(user_id, &lines).await {
        Ok(id) => (StatusCode::CREATED, Json(serde_json::json!({ "id": id.to_string() }))).into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.get(order_id).await {
        Ok(order) => (StatusCode::OK, Json(dto::OrderResponse::from(&order))).into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn update_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateOrderRequest>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lines = match dto::parse_items(&body.items) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.update(order_id, &lines).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn delete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match dto::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.delete(order_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<ListOrdersParams>,
) -> axum::response::Response {
    let query = match params.into_query() {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    match services.orders.list(&query).await {
        Ok(page) => (StatusCode::OK, Json(dto::ListOrdersResponse::from(page))).into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}
