//! Validator / binder
//!
//! Resolves every identifier in an abstract query tree against the catalog,
//! checks types and aggregation legality, and produces a bound plan ready
//! for execution. INSERT additionally validates its primary-key and
//! foreign-key constraints against the store so that constraint failures
//! surface before any write happens.

use crate::catalog::{Catalog, DataType, TableDef};
use crate::error::{Error, Result};
use crate::sql::ast::{
    AggregateFunc, Aggregate, ColumnRef, CompareOp, Connective, Delete, Insert, Literal, Operand,
    Predicate, Projection, Select, Statement, Update,
};
use crate::storage::{IndexStore, Row, Value};

/// A column resolved to a bound table and column position
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    /// Which bound table the column lives on (0 = FROM side, 1 = JOIN side)
    pub side: usize,
    /// Column position within that table
    pub index: usize,
    pub data_type: DataType,
    /// The name this column is rendered under in result rows
    pub display: String,
}

/// A base table bound into a statement
#[derive(Debug, Clone)]
pub struct BoundTable {
    /// Physical table name
    pub name: String,
    /// Logical label column references use (`t`, or `t_L` / `t_R` in a self-join)
    pub label: String,
    pub id: u32,
}

/// An aggregate resolved against a bound column
#[derive(Debug, Clone, PartialEq)]
pub struct BoundAggregate {
    pub func: AggregateFunc,
    pub column: BoundColumn,
    /// Output name, e.g. `SUM(value)`
    pub display: String,
}

#[derive(Debug, Clone)]
pub enum BoundOperand {
    Column(BoundColumn),
    Literal(Value),
    Aggregate(BoundAggregate),
}

#[derive(Debug, Clone)]
pub struct BoundComparison {
    pub left: BoundOperand,
    pub op: CompareOp,
    pub right: BoundOperand,
}

/// A bound predicate: one leaf, or two joined by a connective
#[derive(Debug, Clone)]
pub enum BoundPredicate {
    Single(BoundComparison),
    Pair {
        left: BoundComparison,
        connective: Connective,
        right: BoundComparison,
    },
}

impl BoundPredicate {
    pub fn leaves(&self) -> Vec<&BoundComparison> {
        match self {
            BoundPredicate::Single(c) => vec![c],
            BoundPredicate::Pair { left, right, .. } => vec![left, right],
        }
    }

    pub fn connective(&self) -> Option<Connective> {
        match self {
            BoundPredicate::Single(_) => None,
            BoundPredicate::Pair { connective, .. } => Some(*connective),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BoundProjection {
    Column(BoundColumn),
    Aggregate(BoundAggregate),
}

/// Join condition normalized so `left` sits on side 0 and `right` on side 1
#[derive(Debug, Clone)]
pub struct BoundJoin {
    pub left: BoundColumn,
    pub right: BoundColumn,
}

#[derive(Debug, Clone)]
pub struct BoundSelect {
    pub tables: Vec<BoundTable>,
    pub join: Option<BoundJoin>,
    pub projections: Vec<BoundProjection>,
    pub where_clause: Option<BoundPredicate>,
    pub group_by: Vec<BoundColumn>,
    pub having: Option<BoundPredicate>,
    pub order_by: Vec<(BoundColumn, bool)>,
    /// True when the select groups: an explicit GROUP BY, or aggregates
    /// turning the whole input into one group
    pub grouped: bool,
}

#[derive(Debug, Clone)]
pub struct BoundInsert {
    pub table: String,
    /// Full row in schema column order
    pub row: Row,
}

#[derive(Debug, Clone)]
pub struct BoundUpdate {
    pub table: String,
    /// (column position, new value) pairs
    pub assignments: Vec<(usize, Value)>,
    pub where_clause: Option<BoundPredicate>,
}

#[derive(Debug, Clone)]
pub struct BoundDelete {
    pub table: String,
    pub where_clause: Option<BoundPredicate>,
}

/// A DML statement after identifier resolution and type checking
#[derive(Debug, Clone)]
pub enum BoundStatement {
    Insert(BoundInsert),
    Select(BoundSelect),
    Update(BoundUpdate),
    Delete(BoundDelete),
}

/// The validator: AQT + catalog (+ store, for constraint lookups) → bound plan
pub struct Binder<'a> {
    catalog: &'a Catalog,
    store: &'a IndexStore,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a IndexStore) -> Self {
        Self { catalog, store }
    }

    /// Bind a DML statement. DDL statements are routed to the DDL manager
    /// and never reach the binder.
    pub fn bind(&self, stmt: &Statement) -> Result<BoundStatement> {
        match stmt {
            Statement::Insert(insert) => self.bind_insert(insert).map(BoundStatement::Insert),
            Statement::Select(select) => self.bind_select(select).map(BoundStatement::Select),
            Statement::Update(update) => self.bind_update(update).map(BoundStatement::Update),
            Statement::Delete(delete) => self.bind_delete(delete).map(BoundStatement::Delete),
            other => Err(Error::Internal(format!(
                "binder received a DDL statement: {}",
                other
            ))),
        }
    }

    // ========== SELECT ==========

    fn bind_select(&self, select: &Select) -> Result<BoundSelect> {
        let mut tables = vec![self.bind_table(&select.from.name, &select.from.label)?];
        let join = if let Some(join) = &select.join {
            tables.push(self.bind_table(&join.table.name, &join.table.label)?);
            Some(self.bind_join(&join.left, &join.right, &tables)?)
        } else {
            None
        };
        // In a join, result columns are qualified as `label.column`
        let qualify = tables.len() > 1;

        let mut projections = Vec::new();
        for proj in &select.projections {
            match proj {
                Projection::Wildcard => {
                    for (side, table) in tables.iter().enumerate() {
                        let def = self.catalog.table(&table.name)?;
                        for col in def.schema().columns() {
                            projections.push(BoundProjection::Column(BoundColumn {
                                side,
                                index: col.position,
                                data_type: col.data_type,
                                display: if qualify {
                                    format!("{}.{}", table.label, col.name)
                                } else {
                                    col.name.clone()
                                },
                            }));
                        }
                    }
                }
                Projection::Column(col) => {
                    projections.push(BoundProjection::Column(
                        self.resolve_column(col, &tables, qualify)?,
                    ));
                }
                Projection::Aggregate(agg) => {
                    projections.push(BoundProjection::Aggregate(
                        self.bind_aggregate(agg, &tables, qualify)?,
                    ));
                }
            }
        }

        let where_clause = select
            .where_clause
            .as_ref()
            .map(|p| self.bind_predicate(p, &tables, qualify, false))
            .transpose()?;

        let group_by: Vec<BoundColumn> = select
            .group_by
            .iter()
            .map(|c| self.resolve_column(c, &tables, qualify))
            .collect::<Result<_>>()?;

        let has_aggregates = projections
            .iter()
            .any(|p| matches!(p, BoundProjection::Aggregate(_)));
        let grouped = !group_by.is_empty() || has_aggregates;

        if !group_by.is_empty() {
            // Every non-aggregated projection must be a grouping column
            for proj in &projections {
                if let BoundProjection::Column(col) = proj {
                    if !group_by.iter().any(|g| g.side == col.side && g.index == col.index) {
                        return Err(Error::AggregationMisuse(format!(
                            "column '{}' must appear in GROUP BY or inside an aggregate",
                            col.display
                        )));
                    }
                }
            }
        } else if has_aggregates {
            // Aggregates without GROUP BY: the whole input is one group, so
            // plain columns have no single value to report
            for proj in &projections {
                if let BoundProjection::Column(col) = proj {
                    return Err(Error::AggregationMisuse(format!(
                        "column '{}' cannot be selected alongside aggregates without GROUP BY",
                        col.display
                    )));
                }
            }
        }

        let having = match &select.having {
            Some(pred) => {
                if !grouped {
                    return Err(Error::AggregationMisuse(
                        "HAVING requires GROUP BY or an aggregated select list".to_string(),
                    ));
                }
                let bound = self.bind_predicate(pred, &tables, qualify, true)?;
                // Plain columns in HAVING must be grouping columns
                for leaf in bound.leaves() {
                    for operand in [&leaf.left, &leaf.right] {
                        if let BoundOperand::Column(col) = operand {
                            if !group_by.iter().any(|g| g.side == col.side && g.index == col.index)
                            {
                                return Err(Error::AggregationMisuse(format!(
                                    "HAVING column '{}' must appear in GROUP BY",
                                    col.display
                                )));
                            }
                        }
                    }
                }
                Some(bound)
            }
            None => None,
        };

        let mut order_by = Vec::new();
        for item in &select.order_by {
            let col = self.resolve_column(&item.column, &tables, qualify)?;
            if grouped
                && !group_by
                    .iter()
                    .any(|g| g.side == col.side && g.index == col.index)
            {
                return Err(Error::AggregationMisuse(format!(
                    "ORDER BY column '{}' must appear in GROUP BY",
                    col.display
                )));
            }
            order_by.push((col, item.ascending));
        }

        Ok(BoundSelect {
            tables,
            join,
            projections,
            where_clause,
            group_by,
            having,
            order_by,
            grouped,
        })
    }

    fn bind_table(&self, name: &str, label: &str) -> Result<BoundTable> {
        let def = self.catalog.table(name)?;
        Ok(BoundTable {
            name: def.name().to_string(),
            label: label.to_string(),
            id: def.id,
        })
    }

    fn bind_join(
        &self,
        left: &ColumnRef,
        right: &ColumnRef,
        tables: &[BoundTable],
    ) -> Result<BoundJoin> {
        let a = self.resolve_column(left, tables, true)?;
        let b = self.resolve_column(right, tables, true)?;
        let (left, right) = match (a.side, b.side) {
            (0, 1) => (a, b),
            (1, 0) => (b, a),
            _ => {
                return Err(Error::InvalidJoin(format!(
                    "join condition must reference both tables, but '{}' and '{}' are on the same side",
                    a.display, b.display
                )))
            }
        };
        if left.data_type != right.data_type {
            return Err(Error::TypeMismatch {
                expected: left.data_type.to_string(),
                found: right.data_type.to_string(),
            });
        }
        Ok(BoundJoin { left, right })
    }

    /// Resolve a column reference against the bound tables.
    ///
    /// A qualifier must match a table label exactly; in a self-join only the
    /// synthesized `_L` / `_R` labels resolve. Bare names must be unique
    /// across the bound tables.
    fn resolve_column(
        &self,
        col: &ColumnRef,
        tables: &[BoundTable],
        qualify: bool,
    ) -> Result<BoundColumn> {
        let make = |side: usize, table: &BoundTable, def: &TableDef, index: usize| {
            let column = &def.schema().columns()[index];
            BoundColumn {
                side,
                index,
                data_type: column.data_type,
                display: if qualify {
                    format!("{}.{}", table.label, column.name)
                } else {
                    column.name.clone()
                },
            }
        };

        if let Some(qualifier) = &col.table {
            let (side, table) = tables
                .iter()
                .enumerate()
                .find(|(_, t)| &t.label == qualifier)
                .ok_or_else(|| Error::UnknownTable(qualifier.clone()))?;
            let def = self.catalog.table(&table.name)?;
            let index = def
                .schema()
                .column_index(&col.column)
                .ok_or_else(|| Error::UnknownColumn {
                    column: col.column.clone(),
                    scope: format!("table '{}'", qualifier),
                })?;
            return Ok(make(side, table, def, index));
        }

        let mut found = None;
        for (side, table) in tables.iter().enumerate() {
            let def = self.catalog.table(&table.name)?;
            if let Some(index) = def.schema().column_index(&col.column) {
                if found.is_some() {
                    return Err(Error::AmbiguousColumn(col.column.clone()));
                }
                found = Some(make(side, table, def, index));
            }
        }
        found.ok_or_else(|| Error::UnknownColumn {
            column: col.column.clone(),
            scope: if tables.len() == 1 {
                format!("table '{}'", tables[0].label)
            } else {
                format!("tables '{}' and '{}'", tables[0].label, tables[1].label)
            },
        })
    }

    fn bind_aggregate(
        &self,
        agg: &Aggregate,
        tables: &[BoundTable],
        qualify: bool,
    ) -> Result<BoundAggregate> {
        let column = self.resolve_column(&agg.column, tables, qualify)?;
        if agg.func == AggregateFunc::Sum && !column.data_type.is_numeric() {
            return Err(Error::TypeMismatch {
                expected: "INT or DOUBLE".to_string(),
                found: column.data_type.to_string(),
            });
        }
        Ok(BoundAggregate {
            func: agg.func,
            display: format!("{}({})", agg.func.keyword(), column.display),
            column,
        })
    }

    fn bind_predicate(
        &self,
        pred: &Predicate,
        tables: &[BoundTable],
        qualify: bool,
        allow_aggregates: bool,
    ) -> Result<BoundPredicate> {
        let bind_cmp = |cmp: &crate::sql::ast::Comparison| -> Result<BoundComparison> {
            let left = self.bind_operand(&cmp.left, tables, qualify, allow_aggregates)?;
            let right = self.bind_operand(&cmp.right, tables, qualify, allow_aggregates)?;

            let left_type = self.operand_type(&left);
            let right_type = self.operand_type(&right);
            if left_type != right_type {
                return Err(Error::TypeMismatch {
                    expected: left_type.to_string(),
                    found: right_type.to_string(),
                });
            }

            Ok(BoundComparison {
                left,
                op: cmp.op,
                right,
            })
        };

        Ok(match pred {
            Predicate::Single(cmp) => BoundPredicate::Single(bind_cmp(cmp)?),
            Predicate::Pair {
                left,
                connective,
                right,
            } => BoundPredicate::Pair {
                left: bind_cmp(left)?,
                connective: *connective,
                right: bind_cmp(right)?,
            },
        })
    }

    fn bind_operand(
        &self,
        operand: &Operand,
        tables: &[BoundTable],
        qualify: bool,
        allow_aggregates: bool,
    ) -> Result<BoundOperand> {
        match operand {
            Operand::Column(col) => Ok(BoundOperand::Column(
                self.resolve_column(col, tables, qualify)?,
            )),
            Operand::Literal(lit) => Ok(BoundOperand::Literal(literal_to_value(lit))),
            Operand::Aggregate(agg) => {
                if !allow_aggregates {
                    return Err(Error::AggregationMisuse(
                        "aggregates are only allowed in the select list and HAVING".to_string(),
                    ));
                }
                Ok(BoundOperand::Aggregate(
                    self.bind_aggregate(agg, tables, qualify)?,
                ))
            }
        }
    }

    fn operand_type(&self, operand: &BoundOperand) -> DataType {
        match operand {
            BoundOperand::Column(col) => col.data_type,
            BoundOperand::Literal(value) => value.data_type(),
            BoundOperand::Aggregate(agg) => agg.column.data_type,
        }
    }

    // ========== INSERT ==========

    fn bind_insert(&self, insert: &Insert) -> Result<BoundInsert> {
        let def = self.catalog.table(&insert.table)?;
        let schema = def.schema();

        // Rows carry no NULLs, so every column needs a value exactly once.
        let positions: Vec<usize> = match &insert.columns {
            Some(columns) => {
                let mut positions = Vec::with_capacity(columns.len());
                for name in columns {
                    let pos = schema.column_index(name).ok_or_else(|| Error::UnknownColumn {
                        column: name.clone(),
                        scope: format!("table '{}'", insert.table),
                    })?;
                    if positions.contains(&pos) {
                        return Err(Error::TypeMismatch {
                            expected: "each column listed once".to_string(),
                            found: format!("column '{}' listed twice", name),
                        });
                    }
                    positions.push(pos);
                }
                if positions.len() != schema.column_count() {
                    return Err(Error::TypeMismatch {
                        expected: format!("values for all {} columns", schema.column_count()),
                        found: format!("{} columns listed", positions.len()),
                    });
                }
                positions
            }
            None => (0..schema.column_count()).collect(),
        };

        if insert.values.len() != positions.len() {
            return Err(Error::TypeMismatch {
                expected: format!("{} values", positions.len()),
                found: format!("{} values", insert.values.len()),
            });
        }

        let mut values: Vec<Option<Value>> = vec![None; schema.column_count()];
        for (pos, literal) in positions.iter().zip(&insert.values) {
            let column = &schema.columns()[*pos];
            let value = literal_to_value(literal);
            if value.data_type() != column.data_type {
                return Err(Error::TypeMismatch {
                    expected: column.data_type.to_string(),
                    found: value.data_type().to_string(),
                });
            }
            values[*pos] = Some(value);
        }
        let row = Row::new(values.into_iter().map(|v| v.expect("all positions filled")).collect());

        // Primary key must be absent from the PK index
        let pk = def.primary_key_column();
        let pk_value = &row.values()[pk.position];
        if self.store.primary(&insert.table)?.get(pk_value)?.is_some() {
            return Err(Error::PKViolation(format!(
                "duplicate value {} for '{}.{}'",
                pk_value, insert.table, pk.name
            )));
        }

        // Every foreign-key value must exist in the referenced PK index
        for column in schema.columns() {
            let Some(fk) = &column.foreign_key else {
                continue;
            };
            let value = &row.values()[column.position];
            if self.store.primary(&fk.table)?.get(value)?.is_none() {
                return Err(Error::FKViolation(format!(
                    "value {} for '{}.{}' has no matching row in '{}.{}'",
                    value, insert.table, column.name, fk.table, fk.column
                )));
            }
        }

        Ok(BoundInsert {
            table: insert.table.clone(),
            row,
        })
    }

    // ========== UPDATE / DELETE ==========

    fn bind_update(&self, update: &Update) -> Result<BoundUpdate> {
        let def = self.catalog.table(&update.table)?;
        let tables = vec![self.bind_table(&update.table, &update.table)?];

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for (name, literal) in &update.assignments {
            let pos = def
                .schema()
                .column_index(name)
                .ok_or_else(|| Error::UnknownColumn {
                    column: name.clone(),
                    scope: format!("table '{}'", update.table),
                })?;
            let column = &def.schema().columns()[pos];
            let value = literal_to_value(literal);
            if value.data_type() != column.data_type {
                return Err(Error::TypeMismatch {
                    expected: column.data_type.to_string(),
                    found: value.data_type().to_string(),
                });
            }
            assignments.push((pos, value));
        }

        let where_clause = update
            .where_clause
            .as_ref()
            .map(|p| self.bind_predicate(p, &tables, false, false))
            .transpose()?;

        Ok(BoundUpdate {
            table: update.table.clone(),
            assignments,
            where_clause,
        })
    }

    fn bind_delete(&self, delete: &Delete) -> Result<BoundDelete> {
        self.catalog.table(&delete.table)?;
        let tables = vec![self.bind_table(&delete.table, &delete.table)?];

        let where_clause = delete
            .where_clause
            .as_ref()
            .map(|p| self.bind_predicate(p, &tables, false, false))
            .transpose()?;

        Ok(BoundDelete {
            table: delete.table.clone(),
            where_clause,
        })
    }
}

/// Convert a parsed literal to its runtime value
pub fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(v) => Value::Int(*v),
        Literal::Double(v) => Value::Double(*v),
        Literal::Str(v) => Value::Str(v.clone()),
    }
}
