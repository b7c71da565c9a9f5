use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fees_core::{Aggregate, AggregateRoot, BillId, DomainError, DomainResult, Entity, LineItemId};
use fees_events::{Command, Event};

/// Bill status lifecycle. Monotonic: `Open` → `Closed`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BillStatus {
    Open,
    Closed,
}

impl BillStatus {
    /// Column value in the `bills.status` check constraint.
    pub fn as_str(self) -> &'static str {
        match self {
            BillStatus::Open => "OPEN",
            BillStatus::Closed => "CLOSED",
        }
    }
}

impl core::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BillStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(BillStatus::Open),
            "CLOSED" => Ok(BillStatus::Closed),
            other => Err(DomainError::validation(format!(
                "invalid bill status '{other}', expected OPEN or CLOSED"
            ))),
        }
    }
}

/// An individual charge on a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: LineItemId,
    pub description: String,
    /// Sign and range are not validated.
    pub amount: Decimal,
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Aggregate root: Bill.
///
/// Cloning a bill yields an independent snapshot; this is what queries hand
/// out, so callers never observe later mutations through an old snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    id: BillId,
    customer_id: String,
    currency: String,
    status: BillStatus,
    line_items: Vec<LineItem>,
    total_amount: Decimal,
    created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    version: u64,
}

impl Bill {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: BillId) -> Self {
        Self {
            id,
            customer_id: String::new(),
            currency: String::new(),
            status: BillStatus::Open,
            line_items: Vec::new(),
            total_amount: Decimal::ZERO,
            created_at: None,
            closed_at: None,
            version: 0,
        }
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> BillStatus {
        self.status
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_open(&self) -> bool {
        self.is_created() && self.status == BillStatus::Open
    }

    pub fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn contains_line_item(&self, id: &LineItemId) -> bool {
        self.line_items.iter().any(|item| item.id() == id)
    }

    /// Sum over every line item, recomputed from scratch.
    pub fn line_items_total(&self) -> Decimal {
        self.line_items.iter().map(|item| item.amount).sum()
    }

    /// Verify the bill invariants hold for this snapshot.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let mut seen = std::collections::HashSet::new();
        for item in &self.line_items {
            if !seen.insert(item.id()) {
                return Err(DomainError::invariant(format!(
                    "duplicate line item id {}",
                    item.id
                )));
            }
        }
        if self.total_amount != self.line_items_total() {
            return Err(DomainError::invariant(format!(
                "total_amount {} does not match sum of line items {}",
                self.total_amount,
                self.line_items_total()
            )));
        }
        match (self.status, self.closed_at) {
            (BillStatus::Closed, None) => Err(DomainError::invariant("closed bill without closed_at")),
            (BillStatus::Open, Some(_)) => Err(DomainError::invariant("open bill with closed_at")),
            _ => Ok(()),
        }
    }
}

impl AggregateRoot for Bill {
    type Id = BillId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenBill. Every value is already resolved (id, clock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBill {
    pub bill_id: BillId,
    pub customer_id: String,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLineItem {
    pub bill_id: BillId,
    pub line_item_id: LineItemId,
    pub description: String,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseBill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseBill {
    pub bill_id: BillId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillCommand {
    OpenBill(OpenBill),
    AddLineItem(AddLineItem),
    CloseBill(CloseBill),
}

impl Command for BillCommand {
    fn target_bill_id(&self) -> &BillId {
        match self {
            BillCommand::OpenBill(c) => &c.bill_id,
            BillCommand::AddLineItem(c) => &c.bill_id,
            BillCommand::CloseBill(c) => &c.bill_id,
        }
    }

    fn command_type(&self) -> &'static str {
        match self {
            BillCommand::OpenBill(_) => "fees.bill.open",
            BillCommand::AddLineItem(_) => "fees.bill.add_line_item",
            BillCommand::CloseBill(_) => "fees.bill.close",
        }
    }
}

/// Event: BillOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOpened {
    pub bill_id: BillId,
    pub customer_id: String,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemAdded {
    pub bill_id: BillId,
    pub line_item: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BillClosed. Carries the frozen total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillClosed {
    pub bill_id: BillId,
    pub total_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillEvent {
    BillOpened(BillOpened),
    LineItemAdded(LineItemAdded),
    BillClosed(BillClosed),
}

impl Event for BillEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BillEvent::BillOpened(_) => "fees.bill.opened",
            BillEvent::LineItemAdded(_) => "fees.bill.line_item_added",
            BillEvent::BillClosed(_) => "fees.bill.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BillEvent::BillOpened(e) => e.occurred_at,
            BillEvent::LineItemAdded(e) => e.occurred_at,
            BillEvent::BillClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Bill {
    type Command = BillCommand;
    type Event = BillEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BillEvent::BillOpened(e) => {
                self.id = e.bill_id.clone();
                self.customer_id = e.customer_id.clone();
                self.currency = e.currency.clone();
                self.status = BillStatus::Open;
                self.line_items.clear();
                self.total_amount = Decimal::ZERO;
                self.created_at = Some(e.occurred_at);
                self.closed_at = None;
            }
            BillEvent::LineItemAdded(e) => {
                self.line_items.push(e.line_item.clone());
                // Full re-derivation, never incremental.
                self.total_amount = self.line_items_total();
            }
            BillEvent::BillClosed(e) => {
                self.status = BillStatus::Closed;
                self.total_amount = e.total_amount;
                self.closed_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BillCommand::OpenBill(cmd) => self.handle_open(cmd),
            BillCommand::AddLineItem(cmd) => self.handle_add_line_item(cmd),
            BillCommand::CloseBill(cmd) => self.handle_close(cmd),
        }
    }
}

impl Bill {
    fn ensure_bill_id(&self, bill_id: &BillId) -> Result<(), DomainError> {
        if &self.id != bill_id {
            return Err(DomainError::invariant("bill_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenBill) -> Result<Vec<BillEvent>, DomainError> {
        if self.is_created() {
            return Err(DomainError::conflict("bill already opened"));
        }
        self.ensure_bill_id(&cmd.bill_id)?;

        Ok(vec![BillEvent::BillOpened(BillOpened {
            bill_id: cmd.bill_id.clone(),
            customer_id: cmd.customer_id.clone(),
            currency: cmd.currency.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line_item(&self, cmd: &AddLineItem) -> Result<Vec<BillEvent>, DomainError> {
        if !self.is_created() {
            return Err(DomainError::not_found());
        }
        self.ensure_bill_id(&cmd.bill_id)?;

        if self.status != BillStatus::Open {
            return Err(DomainError::conflict("bill is closed"));
        }
        if self.contains_line_item(&cmd.line_item_id) {
            return Err(DomainError::conflict(format!(
                "duplicate line item id {}",
                cmd.line_item_id
            )));
        }

        Ok(vec![BillEvent::LineItemAdded(LineItemAdded {
            bill_id: cmd.bill_id.clone(),
            line_item: LineItem {
                id: cmd.line_item_id.clone(),
                description: cmd.description.clone(),
                amount: cmd.amount,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseBill) -> Result<Vec<BillEvent>, DomainError> {
        if !self.is_created() {
            return Err(DomainError::not_found());
        }
        self.ensure_bill_id(&cmd.bill_id)?;

        if self.status != BillStatus::Open {
            return Err(DomainError::conflict("bill already closed"));
        }

        Ok(vec![BillEvent::BillClosed(BillClosed {
            bill_id: cmd.bill_id.clone(),
            total_amount: self.line_items_total(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
