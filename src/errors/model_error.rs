//! Model-related error types.

use thiserror::Error;

/// Errors that can occur while assembling, building, or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid shape {shape:?} for {context}: {message}")]
    InvalidShape {
        context: String,
        shape: Vec<usize>,
        message: String,
    },

    #[error("Invalid layer configuration: {message}")]
    InvalidLayerConfig { message: String },

    #[error("Invalid activation: {name}")]
    InvalidActivation { name: String },

    #[error("Invalid arithmetic operation: {name}")]
    InvalidArithmetic { name: String },

    #[error("Invalid tensor data: {message}")]
    InvalidTensor { message: String },

    #[error("Node {node} does not belong to this graph")]
    ForeignNode { node: String },

    #[error("Model is already built, its topology can no longer change")]
    AlreadyBuilt,

    #[error("Model has not been built yet")]
    NotBuilt,

    #[error("Model has no input nodes defined")]
    NoInputs,

    #[error("Model has no output nodes defined")]
    NoOutputs,

    #[error("Model has no loss function defined")]
    NoLoss,

    #[error("Duplicate layer name: {name}")]
    DuplicateLayerName { name: String },

    #[error("Duplicate node name: {name}")]
    DuplicateNodeName { name: String },

    #[error("Duplicate loss requirement: {name}")]
    DuplicateLossInput { name: String },

    #[error("Gradient cannot flow through non-differentiable node {node} ({op})")]
    NonDifferentiable { node: String, op: String },

    #[error("Unknown input {name}")]
    UnknownInput { name: String },

    #[error("Missing input {name}")]
    MissingInput { name: String },

    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Dtype mismatch for {name}: expected {expected}, got {actual}")]
    DTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Data generator error: {message}")]
    Generator { message: String },

    #[error("Callback error: {message}")]
    Callback { message: String },

    #[error("Training error: {message}")]
    TrainingError { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidLayerConfig {
            message: message.into(),
        }
    }
}
