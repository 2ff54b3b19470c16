use crate::order::OrderStatus;
use crate::pipeline::PipelineState;
use thiserror::Error;

/// Result type for order pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while driving orders through the pipeline
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    /// An order was asked to move to anything but its immediate successor status
    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the order currently holds
        from: OrderStatus,
        /// Status that was requested
        to: OrderStatus,
    },

    /// A lifecycle operation was issued from a state that does not permit it
    #[error("invalid pipeline state: {0}")]
    InvalidState(PipelineState),
}
