//! Error types for AtlasStage
//!
//! Provides a unified error type for all engine, operator and transport operations.

use thiserror::Error;

use crate::variable::DataType;

/// Result type alias using StageError
pub type Result<T> = std::result::Result<T, StageError>;

/// Unified error type for AtlasStage operations
#[derive(Debug, Error)]
pub enum StageError {
    // -------------------------------------------------------------------------
    // Engine Protocol Errors
    // -------------------------------------------------------------------------
    /// An engine call was made outside the state it is valid in.
    #[error("Protocol state error: {operation} is not valid in state {state}")]
    ProtocolState {
        operation: &'static str,
        state: String,
    },

    // -------------------------------------------------------------------------
    // Selection / Resolution Errors
    // -------------------------------------------------------------------------
    #[error("Selection out of bounds: {0}")]
    SelectionBounds(String),

    #[error(
        "Incomplete coverage for '{variable}': {covered} of {requested} elements available"
    )]
    IncompleteCoverage {
        variable: String,
        covered: u64,
        requested: u64,
    },

    #[error("Read has not been resolved yet")]
    NotResolved,

    // -------------------------------------------------------------------------
    // Operator Errors
    // -------------------------------------------------------------------------
    /// Codec failure. `code` is the codec's native status code.
    #[error("Operator '{operator}' failed with status {code}: {message}")]
    Operator {
        operator: String,
        code: i64,
        message: String,
    },

    #[error("Operator mismatch for '{variable}': expected {expected}, block declares {found}")]
    OperatorMismatch {
        variable: String,
        expected: String,
        found: String,
    },

    // -------------------------------------------------------------------------
    // Variable Errors
    // -------------------------------------------------------------------------
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Variable redeclared inconsistently: {0}")]
    VariableMismatch(String),

    #[error("Type mismatch: variable is {expected}, requested {found}")]
    TypeMismatch { expected: DataType, found: DataType },

    // -------------------------------------------------------------------------
    // Metadata / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Metadata corruption detected: {0}")]
    MetadataCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Transport error: {0}")]
    Transport(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StageError {
    /// Build an operator error from a codec status code
    pub fn operator(operator: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        StageError::Operator {
            operator: operator.into(),
            code,
            message: message.into(),
        }
    }
}

impl From<bincode::Error> for StageError {
    fn from(e: bincode::Error) -> Self {
        StageError::Serialization(e.to_string())
    }
}
