use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use fees_billing::BillStatus;
use fees_core::{BillId, LineItemId};
use fees_infra::{CreateBill, LineItemRequest};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn create_bill(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateBillRequest>,
) -> axum::response::Response {
    if body.currency.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "currency is required");
    }

    let bill_id = BillId::generate();
    let params = CreateBill::new(body.customer_id, body.currency).with_bill_id(bill_id.clone());

    match services.registry.create_bill(params).await {
        Ok(_) => (
            StatusCode::CREATED,
            Json(dto::CreateBillResponse {
                bill_id: bill_id.into_inner(),
                initial_status: BillStatus::Open,
                confirmation_msg: "Bill created successfully.".to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

pub async fn add_line_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddLineItemRequest>,
) -> axum::response::Response {
    let bill_id = BillId::new(id);
    let handle = match services.registry.handle(&bill_id).await {
        Ok(h) => h,
        Err(e) => return errors::registry_error_to_response(e),
    };

    // Fixed before sending: redelivery of this command below the facade is
    // deduplicated, a retried POST is a new line item.
    let line_item_id = LineItemId::generate();
    let request = LineItemRequest::new(body.description, body.amount).with_id(line_item_id.clone());

    match handle.add_line_item(request).await {
        Ok(()) => Json(dto::AddLineItemResponse {
            line_item_id: line_item_id.into_inner(),
            bill_id: bill_id.into_inner(),
            confirmation_msg: "LineItem added successfully.".to_string(),
        })
        .into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

pub async fn close_bill(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let bill_id = BillId::new(id);
    let handle = match services.registry.handle(&bill_id).await {
        Ok(h) => h,
        Err(e) => return errors::registry_error_to_response(e),
    };

    if let Err(e) = handle.close().await {
        return errors::registry_error_to_response(e);
    }

    match tokio::time::timeout(services.close_wait, handle.wait_closed()).await {
        Ok(Ok(bill)) => Json(dto::CloseBillResponse {
            bill,
            confirmation_msg: "Bill closed successfully and details retrieved.".to_string(),
        })
        .into_response(),
        Ok(Err(e)) => errors::registry_error_to_response(e),
        Err(_) => {
            tracing::warn!(bill_id = %bill_id, "timed out waiting for bill to close");
            errors::json_error(
                StatusCode::GATEWAY_TIMEOUT,
                "close_timeout",
                format!(
                    "timeout waiting for bill {bill_id} to close after {}s",
                    services.close_wait.as_secs()
                ),
            )
        }
    }
}

pub async fn get_bill(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match services.registry.details(&BillId::new(id)).await {
        Ok(bill) => Json(bill).into_response(),
        Err(e) => errors::registry_error_to_response(e),
    }
}

pub async fn list_bills(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListBillsQuery>,
) -> axum::response::Response {
    let status = match errors::parse_status_filter(query.status.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let bills = services.registry.list(status).await;
    Json(dto::ListBillsResponse::page(bills, &query)).into_response()
}
