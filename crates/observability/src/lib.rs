//! Process-wide logging setup shared by the tallyline binaries.

pub mod tracing;

pub use tracing::LogFormat;

/// Install the default subscriber: JSON lines, filtered by `RUST_LOG`
/// (falling back to `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    tracing::init(LogFormat::Json, "info");
}
