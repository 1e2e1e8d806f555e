//! Query execution module
//!
//! This module contains the validator/binder, access-path selection, and the
//! DML executor.

pub mod binder;
pub mod executor;
pub mod plan;

pub use binder::{Binder, BoundStatement};
pub use executor::{DmlExecutor, ResultRow, StatementResult};
pub use plan::{AccessPath, IndexKind};
