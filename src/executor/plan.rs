//! Access-path selection
//!
//! Chooses how each base table of a bound statement is read: a range over
//! an index when the predicate pins an indexed column, a full scan of the
//! primary-key index otherwise. There is no cost model; the rules are
//! fixed: the primary key beats a user index, ties go to the leaf
//! mentioned first in the predicate.

use std::ops::Bound;

use crate::catalog::Catalog;
use crate::sql::ast::{CompareOp, Connective};
use crate::storage::Value;

use super::binder::{BoundOperand, BoundPredicate};

/// Which index backs an `IndexRange`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    PrimaryKey,
    Secondary,
}

/// The concrete means by which a base table is read
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    /// Ascending scan of the table's primary-key index
    FullScan { table: String },
    /// Bounded scan of one index
    IndexRange {
        table: String,
        column: String,
        index: IndexKind,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
}

impl AccessPath {
    pub fn is_index_range(&self) -> bool {
        matches!(self, AccessPath::IndexRange { .. })
    }
}

/// Pick the access path for one side of a bound statement.
///
/// A predicate leaf is usable when it compares a column of this side against
/// a literal with `=`, `<`, or `>` and the column is indexed. Leaves under an
/// OR cannot narrow a single scan, so OR always full-scans. The consumed
/// leaf is re-checked by the filter operator, which keeps this a pure
/// optimization.
pub fn choose_access_path(
    catalog: &Catalog,
    table: &str,
    side: usize,
    predicate: Option<&BoundPredicate>,
) -> AccessPath {
    let full_scan = AccessPath::FullScan {
        table: table.to_string(),
    };
    let Some(predicate) = predicate else {
        return full_scan;
    };
    if predicate.connective() == Some(Connective::Or) {
        return full_scan;
    }
    let Ok(def) = catalog.table(table) else {
        return full_scan;
    };
    let pk_name = &def.primary_key_column().name;

    let mut best: Option<(IndexKind, String, CompareOp, Value)> = None;
    for leaf in predicate.leaves() {
        let BoundOperand::Column(col) = &leaf.left else {
            continue;
        };
        if col.side != side {
            continue;
        }
        let BoundOperand::Literal(value) = &leaf.right else {
            continue;
        };
        if !matches!(leaf.op, CompareOp::Eq | CompareOp::Lt | CompareOp::Gt) {
            continue;
        }

        let name = &def.schema().columns()[col.index].name;
        let kind = if name == pk_name {
            IndexKind::PrimaryKey
        } else if catalog.is_indexed(table, name) {
            IndexKind::Secondary
        } else {
            continue;
        };

        let better = match &best {
            None => true,
            Some((best_kind, ..)) => {
                kind == IndexKind::PrimaryKey && *best_kind == IndexKind::Secondary
            }
        };
        if better {
            best = Some((kind, name.clone(), leaf.op, value.clone()));
        }
    }

    match best {
        Some((index, column, op, value)) => {
            let (lower, upper) = match op {
                CompareOp::Eq => (Bound::Included(value.clone()), Bound::Included(value)),
                CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(value)),
                CompareOp::Gt => (Bound::Excluded(value), Bound::Unbounded),
                CompareOp::Neq => unreachable!("!= is never sargable"),
            };
            AccessPath::IndexRange {
                table: table.to_string(),
                column,
                index,
                lower,
                upper,
            }
        }
        None => full_scan,
    }
}
