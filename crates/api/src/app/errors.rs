use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use stockorder_infra::OrderError;

pub fn order_error_to_response(err: OrderError) -> axum::response::Response {
    match err {
        OrderError::StockUpdateInProgress { .. } => {
            json_error(StatusCode::CONFLICT, "stock_update_in_progress", err.to_string())
        }
        OrderError::OrderChanged(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        OrderError::NoStockAvailable { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "no_stock_available", err.to_string())
        }
        OrderError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        OrderError::ProductNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "product_not_found", err.to_string())
        }
        OrderError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        OrderError::Search(e) => {
            error!(error = %e, "search backend failed");
            json_error(StatusCode::BAD_GATEWAY, "search_unavailable", e.to_string())
        }
        OrderError::Lock(e) => internal("lock_error", e.to_string()),
        OrderError::Ledger(e) => internal("ledger_error", e.to_string()),
        OrderError::Repository(e) => internal("store_error", e.to_string()),
        OrderError::Aborted(msg) => internal("aborted", msg),
    }
}

fn internal(code: &'static str, message: String) -> axum::response::Response {
    error!(code, error = %message, "order request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn invalid_id(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", message)
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
