use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use fees_billing::BillStatus;
use fees_core::{BillId, LineItemId};

use super::r#trait::{FinalizeBill, GatewayError, PersistenceGateway, SaveLineItem, UpsertBill};

/// Row of the `bills` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRow {
    pub id: BillId,
    pub customer_id: String,
    pub currency: String,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub total_amount: Decimal,
}

/// Row of the `line_items` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItemRow {
    pub id: LineItemId,
    pub bill_id: BillId,
    pub description: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    UpsertBill,
    SaveLineItem,
    FinalizeBill,
}

/// Injected behaviour for one operation.
#[derive(Debug, Clone)]
pub enum FailureMode {
    /// Fail immediately with the given error.
    Error(GatewayError),
    /// Sleep before answering; pair with a shorter activity timeout.
    Hang(Duration),
}

#[derive(Debug, Default)]
struct Tables {
    bills: HashMap<BillId, BillRow>,
    line_items: Vec<LineItemRow>,
    failures: HashMap<GatewayOperation, FailureMode>,
    calls: HashMap<GatewayOperation, usize>,
}

/// In-memory tables honouring the gateway contract.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    inner: Mutex<Tables>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `operation` behave as `mode`.
    pub fn fail(&self, operation: GatewayOperation, mode: FailureMode) {
        if let Ok(mut tables) = self.inner.lock() {
            tables.failures.insert(operation, mode);
        }
    }

    pub fn heal(&self, operation: GatewayOperation) {
        if let Ok(mut tables) = self.inner.lock() {
            tables.failures.remove(&operation);
        }
    }

    /// Number of calls received for `operation`, failed ones included.
    pub fn calls(&self, operation: GatewayOperation) -> usize {
        self.inner
            .lock()
            .map(|t| t.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.inner
            .lock()
            .map(|t| t.calls.values().sum())
            .unwrap_or(0)
    }

    pub fn bill(&self, id: &BillId) -> Option<BillRow> {
        self.inner.lock().ok()?.bills.get(id).cloned()
    }

    /// Line items of a bill in insertion order.
    pub fn line_items(&self, bill_id: &BillId) -> Vec<LineItemRow> {
        self.inner
            .lock()
            .map(|t| {
                t.line_items
                    .iter()
                    .filter(|row| &row.bill_id == bill_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count the call and return the injected failure, if any.
    async fn enter(&self, operation: GatewayOperation) -> Result<(), GatewayError> {
        let mode = {
            let mut tables = self.lock()?;
            *tables.calls.entry(operation).or_insert(0) += 1;
            tables.failures.get(&operation).cloned()
        };

        match mode {
            None => Ok(()),
            Some(FailureMode::Error(err)) => Err(err),
            Some(FailureMode::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, GatewayError> {
        self.inner
            .lock()
            .map_err(|_| GatewayError::Unavailable("in-memory tables poisoned".to_string()))
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn upsert_bill(&self, params: UpsertBill) -> Result<(), GatewayError> {
        self.enter(GatewayOperation::UpsertBill).await?;

        let mut tables = self.lock()?;
        match tables.bills.get_mut(&params.id) {
            Some(row) => {
                row.customer_id = params.customer_id;
                row.currency = params.currency;
                row.status = params.status;
            }
            None => {
                tables.bills.insert(
                    params.id.clone(),
                    BillRow {
                        id: params.id,
                        customer_id: params.customer_id,
                        currency: params.currency,
                        status: params.status,
                        created_at: params.created_at,
                        closed_at: None,
                        total_amount: Decimal::ZERO,
                    },
                );
            }
        }
        Ok(())
    }

    async fn save_line_item(&self, params: SaveLineItem) -> Result<(), GatewayError> {
        self.enter(GatewayOperation::SaveLineItem).await?;

        let mut tables = self.lock()?;
        if !tables.bills.contains_key(&params.bill_id) {
            return Err(GatewayError::Database(format!(
                "line item {} references unknown bill {}",
                params.id, params.bill_id
            )));
        }
        if tables.line_items.iter().any(|row| row.id == params.id) {
            return Err(GatewayError::Conflict(format!(
                "line item {} already exists",
                params.id
            )));
        }
        tables.line_items.push(LineItemRow {
            id: params.id,
            bill_id: params.bill_id,
            description: params.description,
            amount: params.amount,
            created_at: params.created_at,
        });
        Ok(())
    }

    async fn finalize_bill(&self, params: FinalizeBill) -> Result<(), GatewayError> {
        self.enter(GatewayOperation::FinalizeBill).await?;

        let mut tables = self.lock()?;
        let row = tables
            .bills
            .get_mut(&params.id)
            .ok_or_else(|| GatewayError::NotFound(format!("bill {}", params.id)))?;
        row.status = params.status;
        row.total_amount = params.total_amount;
        row.closed_at = Some(params.closed_at);
        Ok(())
    }
}
