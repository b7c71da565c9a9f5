use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use fees_billing::BillStatus;
use fees_infra::{ActorError, RegistryError};

pub fn registry_error_to_response(err: RegistryError) -> axum::response::Response {
    match err {
        RegistryError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("bill {id} not found"))
        }
        RegistryError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "already_exists", format!("bill {id} already exists"))
        }
        RegistryError::ActorUnavailable(id) => json_error(
            StatusCode::CONFLICT,
            "bill_unavailable",
            format!("bill {id} is not accepting commands"),
        ),
        RegistryError::Create(ActorError::Initialize(e)) => {
            json_error(StatusCode::BAD_GATEWAY, "persistence_error", e.to_string())
        }
        RegistryError::Create(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "create_failed", e.to_string())
        }
        RegistryError::Failed { bill_id, source } => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "bill_failed",
            format!("bill {bill_id} failed: {source}"),
        ),
        RegistryError::History(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "history_error", e.to_string())
        }
    }
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

/// Empty means no filter.
pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<BillStatus>, axum::response::Response> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<BillStatus>().map(Some).map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                format!("invalid status parameter '{s}'; must be OPEN, CLOSED, or empty"),
            )
        }),
    }
}
