//! Crate-wide error type.
//!
//! Numeric trouble (logarithms of tiny values, near-zero denominators) never
//! shows up here: those cases are clamped where they happen. What remains are
//! contract violations (a variable evaluated without a substitution) and
//! configuration mistakes caught while the network is being set up.

use thiserror::Error;

/// Errors raised while building, evaluating, or training.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    /// A scalar variable was evaluated before a value was bound to it.
    #[error("variable `{name}` was evaluated without a substitution")]
    UnboundVariable { name: String },

    /// An indexed variable was read at a slot it does not have.
    #[error("index {index} out of bounds for indexed variable `{name}` of length {len}")]
    IndexOutOfBounds {
        name: String,
        index: usize,
        len: usize,
    },

    /// Layers must hold at least one neuron.
    #[error("layer size must be non-zero")]
    EmptyLayer,

    /// A layer handle does not belong to this graph.
    #[error("unknown layer {layer}")]
    UnknownLayer { layer: usize },

    /// The requested connection would close a loop in the layer graph.
    #[error("connecting layer {from} to layer {to} would create a cycle")]
    Cycle { from: usize, to: usize },

    /// A non-input layer receives nothing, so its weights have no shape.
    #[error("layer {layer} has no incoming connections")]
    Unconnected { layer: usize },

    /// A non-output layer feeds nothing, so no gradient can ever reach it.
    #[error("layer {layer} does not lead to the output layer")]
    DeadEnd { layer: usize },

    /// A vector did not have the length the network expects.
    #[error("{what}: expected length {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Backpropagation was requested before the batch buffers existed.
    #[error("batch buffers are not allocated; call `prepare_batches` first")]
    BatchNotPrepared,

    /// The selected batch slot lies outside the allocated buffers.
    #[error("batch slot {slot} out of range for batch size {batch_size}")]
    BatchSlotOutOfRange { slot: usize, batch_size: usize },

    /// The dataset failed validation.
    #[error("invalid dataset: {reason}")]
    InvalidDataset { reason: String },

    /// Hyperparameters failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The weight sampler could not produce values.
    #[error("sampler failure: {reason}")]
    Sampler { reason: String },
}

/// Shorthand used throughout the crate.
pub type Result<T, E = NetError> = core::result::Result<T, E>;
