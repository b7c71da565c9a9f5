//! Domain event and command abstractions shared by domain modules.

pub mod command;
pub mod event;

pub use command::Command;
pub use event::Event;
