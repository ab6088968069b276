//! Single place the rest of the workspace imports logging from, so the
//! logging crate can be swapped without touching every caller.

pub use tracing;
pub use tracing_subscriber;
