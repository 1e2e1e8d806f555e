//! Storage engine module
//!
//! This module contains the storage layer:
//! - Typed values and rows
//! - The balanced ordered tree
//! - The persistent per-index store

pub mod store;
pub mod tree;
pub mod value;

pub use store::{IndexStore, OrderedIndex, PkSet};
pub use tree::{OrderedTree, Range};
pub use value::{Row, Value};
