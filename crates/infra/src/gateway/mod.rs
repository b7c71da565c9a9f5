//! Persistence gateway: the bill actor's write-only view of the relational store.
//!
//! The actor is the authority on bill state; the gateway receives copies. Both
//! adapters implement the same contract so the actor tests run against the
//! in-memory tables and the API binary can switch to Postgres via `DATABASE_URL`.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{BillRow, FailureMode, GatewayOperation, InMemoryGateway, LineItemRow};
pub use postgres::PgPersistenceGateway;
pub use r#trait::{FinalizeBill, GatewayError, PersistenceGateway, SaveLineItem, UpsertBill};
