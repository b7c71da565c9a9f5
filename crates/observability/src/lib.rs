//! Process-wide tracing setup for the fees binaries.

/// Subscriber installation (filter, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Install the default subscriber: JSON lines, `RUST_LOG` filter (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
