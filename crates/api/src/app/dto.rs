use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fees_billing::{Bill, BillStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillRequest {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLineItemRequest {
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBillsQuery {
    pub status: Option<String>,
    pub currency: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillResponse {
    pub bill_id: String,
    pub initial_status: BillStatus,
    pub confirmation_msg: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLineItemResponse {
    pub line_item_id: String,
    pub bill_id: String,
    pub confirmation_msg: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseBillResponse {
    pub bill: Bill,
    pub confirmation_msg: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBillsResponse {
    pub bills: Vec<Bill>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

impl ListBillsResponse {
    /// Filter by currency (case-insensitive) and cut one page out of `bills`.
    pub fn page(bills: Vec<Bill>, query: &ListBillsQuery) -> Self {
        let currency = query
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let matching: Vec<Bill> = bills
            .into_iter()
            .filter(|b| currency.is_none_or(|c| b.currency().eq_ignore_ascii_case(c)))
            .collect();

        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = query.offset.unwrap_or(0);
        let total_count = matching.len();

        Self {
            bills: matching.into_iter().skip(offset).take(limit).collect(),
            total_count,
            limit,
            offset,
        }
    }
}
