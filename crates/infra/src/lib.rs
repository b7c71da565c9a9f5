//! Infrastructure layer: the bill actor runtime and its collaborators.
//!
//! - `history` + `effects`: the durable journal and the recorded-effect primitive
//! - `gateway`: the persistence write contract (Postgres and in-memory adapters)
//! - `command_dispatcher` + `actor`: per-bill sequential processing
//! - `registry`: one live actor per bill id, recovery and shutdown
//! - `config`: runtime configuration

pub mod actor;
pub mod command_dispatcher;
pub mod config;
pub mod effects;
pub mod gateway;
pub mod history;
pub mod registry;

mod integration_tests;

pub use actor::{ActorError, ActorExit, ActorOutcome, BillActor, BillHandle, CreateBill, LineItemRequest};
pub use command_dispatcher::BillInput;
pub use config::{ConfigError, RuntimeConfig};
pub use effects::{EffectError, EffectLog};
pub use gateway::{
    FailureMode, GatewayError, GatewayOperation, InMemoryGateway, PersistenceGateway,
    PgPersistenceGateway,
};
pub use history::{HistoryEntry, HistoryError, HistoryStore, InMemoryHistoryStore};
pub use registry::{BillRegistry, RecoveryReport, RegistryError};
