//! Cooperative cancellation.
//!
//! Running stage routines and job handlers receive a [`CancellationToken`]
//! and are expected to poll it at safe checkpoints. Only a job deadline
//! stops a handler that ignores the signal, by dropping its future.

mod token;

pub use token::{CancelCallback, CancellationToken, CancelledError};
