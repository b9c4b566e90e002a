//! Observability utilities.

mod tracing;

pub use self::tracing::{init_tracing, try_init_tracing, LogFormat, SpanTimer};
