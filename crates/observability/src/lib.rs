//! Process-wide tracing setup shared by the wardrobe binaries.

/// Install the JSON subscriber (production default).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber for local development.
pub fn init_pretty() {
    tracing::init_pretty();
}

/// Subscriber construction (filters, formatters).
pub mod tracing;
