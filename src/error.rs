//! Error types for FTL.

use thiserror::Error;

/// The main error type for FTL operations.
#[derive(Debug, Error)]
pub enum FtlError {
    /// Candle tensor operation failed
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Malformed formula text
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Predicate or functor applied to the wrong number of arguments
    #[error("arity mismatch: `{symbol}` expects {expected} argument(s), got {found}")]
    Arity {
        symbol: String,
        expected: usize,
        found: usize,
    },

    /// A term's sort disagrees with the declared argument sort
    #[error("type error: {0}")]
    Type(String),

    /// Knowledge base could not be compiled, or was used before compilation
    #[error("compilation error: {0}")]
    Compilation(String),

    /// Non-finite loss or gradient during training
    #[error("numeric error: {0}")]
    Numeric(String),

    /// API misuse: missing assignment, undeclared sort, terminal model, ...
    #[error("usage error: {0}")]
    Usage(String),

    /// Invalid signature or operator configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FtlError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        FtlError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// Result type for FTL operations.
pub type Result<T> = std::result::Result<T, FtlError>;
