//! RivetDB - a small relational database engine written in Rust
//!
//! This library provides the core components for a SQL-like database:
//! - Query language parsing (lexer, parser, abstract query tree)
//! - Catalog with primary/foreign-key invariants
//! - Persistent ordered-index storage (one balanced tree per index)
//! - Validation, access-path selection, and DML execution
//! - A single-entry-point engine facade

pub mod catalog;
pub mod ddl;
pub mod engine;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;

pub use engine::{Engine, QueryOutcome};
pub use error::{Error, Result};
