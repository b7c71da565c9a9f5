//! Domain foundation for the fees service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the decide/apply aggregate contract.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BillId, LineItemId};
