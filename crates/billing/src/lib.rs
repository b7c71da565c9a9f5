//! Billing domain module.
//!
//! Business rules for bills and their line items, implemented purely as
//! deterministic domain logic (no IO, no clocks, no id generation).

pub mod bill;

pub use bill::{
    AddLineItem, Bill, BillClosed, BillCommand, BillEvent, BillOpened, BillStatus, CloseBill,
    LineItem, LineItemAdded, OpenBill,
};
