//! Error types for RivetDB
//!
//! This module defines all error types used throughout the database engine.

use thiserror::Error;

/// The main error type for RivetDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lexer error: unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),

    #[error("Lexer error: unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("Lexer error: invalid number format at position {0}")]
    InvalidNumber(usize),

    // ========== Parser Errors ==========
    #[error("Parse error at position {position}: expected {expected}, found '{found}'")]
    Parse {
        position: usize,
        expected: String,
        found: String,
    },

    // ========== Binder Errors ==========
    #[error("Binder error: table '{0}' not found")]
    UnknownTable(String),

    #[error("Binder error: column '{column}' not found in {scope}")]
    UnknownColumn { column: String, scope: String },

    #[error("Binder error: column '{0}' is ambiguous, qualify it with a table name")]
    AmbiguousColumn(String),

    #[error("Binder error: invalid join - {0}")]
    InvalidJoin(String),

    #[error("Type error: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Aggregation error: {0}")]
    AggregationMisuse(String),

    // ========== Constraint Errors ==========
    #[error("Constraint error: primary key violation - {0}")]
    PKViolation(String),

    #[error("Constraint error: foreign key violation - {0}")]
    FKViolation(String),

    // ========== Storage Errors ==========
    #[error("Storage error: index '{index}' expects {expected} keys, got {found}")]
    KeyTypeMismatch {
        index: String,
        expected: String,
        found: String,
    },

    #[error("Storage error: corrupt file '{path}': {reason}")]
    StorageCorrupt { path: String, reason: String },

    #[error("Storage error: data directory '{0}' is locked by another engine")]
    DataDirLocked(String),

    // ========== DDL Errors ==========
    #[error("DDL error: {0}")]
    DdlFailed(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for RivetDB operations
pub type Result<T> = std::result::Result<T, Error>;
