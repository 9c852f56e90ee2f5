//! Process-wide tracing setup.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize process-wide logging in the format named by `SIGNET_LOG_FORMAT`
/// (JSON unless it says `pretty`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    crate::tracing::init_with(LogFormat::from_env());
}

/// Initialize process-wide logging in an explicit format.
pub fn init_with(format: LogFormat) {
    crate::tracing::init_with(format);
}
