//! Crate-level error type.
//!
//! Each module defines its own error enum; [`SimError`] is what agent
//! callbacks and [`Engine::run`](crate::engine::Engine::run) return, so `?`
//! works across module boundaries.

use crate::buffer::BufferError;
use crate::engine::EngineError;
use crate::message::RoutingError;
use crate::transaction::TransactionError;

/// A fatal simulation error. Any of these aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
