//! DML executor
//!
//! Executes bound INSERT / SELECT / UPDATE / DELETE statements against the
//! catalog and the index store. The operator set is small and fixed: access
//! path → join → filter → group + aggregate → having → order → project.
//! Mutating statements roll their own writes back on failure; nothing here
//! offers cross-statement atomicity.

use std::collections::{HashMap, HashSet};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::catalog::{Catalog, DataType};
use crate::error::{Error, Result};
use crate::sql::ast::{AggregateFunc, CompareOp, Connective};
use crate::storage::{IndexStore, Row, Value};

use super::binder::{
    BoundAggregate, BoundColumn, BoundComparison, BoundDelete, BoundInsert, BoundOperand,
    BoundPredicate, BoundProjection, BoundSelect, BoundStatement, BoundUpdate,
};
use super::plan::{choose_access_path, AccessPath, IndexKind};

/// One result row: ordered (column, value) pairs, serialized as a JSON map
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    entries: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    /// Look up a value by column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
    }

    /// The (column, value) pairs in projection order
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Column names in projection order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(col, _)| col.as_str())
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (col, value) in &self.entries {
            map.serialize_entry(col, value)?;
        }
        map.end()
    }
}

/// Result of one executed DML statement
#[derive(Debug)]
pub enum StatementResult {
    /// SELECT output
    Rows(Vec<ResultRow>),
    /// Row count for INSERT / UPDATE / DELETE
    Affected(u64),
}

/// Running state of one aggregate within one group
#[derive(Debug, Clone)]
struct AggState {
    func: AggregateFunc,
    data_type: DataType,
    best: Option<Value>,
    sum_int: i64,
    sum_double: f64,
}

impl AggState {
    fn new(agg: &BoundAggregate) -> Self {
        Self {
            func: agg.func,
            data_type: agg.column.data_type,
            best: None,
            sum_int: 0,
            sum_double: 0.0,
        }
    }

    fn update(&mut self, value: &Value) {
        match self.func {
            AggregateFunc::Min => {
                if self.best.as_ref().map_or(true, |best| value < best) {
                    self.best = Some(value.clone());
                }
            }
            AggregateFunc::Max => {
                if self.best.as_ref().map_or(true, |best| value > best) {
                    self.best = Some(value.clone());
                }
            }
            AggregateFunc::Sum => match value {
                Value::Int(v) => self.sum_int += v,
                Value::Double(v) => self.sum_double += v,
                Value::Str(_) => {}
            },
        }
    }

    fn finish(&self) -> Value {
        match self.func {
            AggregateFunc::Min | AggregateFunc::Max => {
                let value = self
                    .best
                    .clone()
                    .expect("groups always aggregate at least one row");
                round_double(value)
            }
            AggregateFunc::Sum => match self.data_type {
                DataType::Int => Value::Int(self.sum_int),
                _ => round_double(Value::Double(self.sum_double)),
            },
        }
    }
}

/// Double aggregate outputs are reported to two decimal places
fn round_double(value: Value) -> Value {
    match value {
        Value::Double(v) => Value::Double((v * 100.0).round() / 100.0),
        other => other,
    }
}

/// One group under construction
#[derive(Debug)]
struct GroupState {
    key: Vec<Value>,
    aggs: Vec<AggState>,
}

/// Executes bound DML statements
pub struct DmlExecutor<'a> {
    catalog: &'a Catalog,
    store: &'a mut IndexStore,
    access_paths: Vec<AccessPath>,
}

impl<'a> DmlExecutor<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a mut IndexStore) -> Self {
        Self {
            catalog,
            store,
            access_paths: Vec::new(),
        }
    }

    /// Execute one bound statement
    pub fn execute(&mut self, stmt: &BoundStatement) -> Result<StatementResult> {
        match stmt {
            BoundStatement::Insert(insert) => self.execute_insert(insert),
            BoundStatement::Select(select) => self.execute_select(select).map(StatementResult::Rows),
            BoundStatement::Update(update) => self.execute_update(update),
            BoundStatement::Delete(delete) => self.execute_delete(delete),
        }
    }

    /// Debug hook: the access paths chosen for the most recent statement,
    /// one per base table in binding order.
    pub fn into_access_paths(self) -> Vec<AccessPath> {
        self.access_paths
    }

    // ========== Row access ==========

    /// Materialize the rows one access path yields, as (pk, row) pairs in
    /// path order (ascending key order).
    fn scan_side(&self, table: &str, path: &AccessPath) -> Result<Vec<(Value, Row)>> {
        match path {
            AccessPath::FullScan { .. } => {
                let primary = self.store.primary(table)?;
                Ok(primary
                    .full_scan()
                    .map(|(pk, row)| (pk.clone(), row.clone()))
                    .collect())
            }
            AccessPath::IndexRange {
                index: IndexKind::PrimaryKey,
                lower,
                upper,
                ..
            } => {
                let primary = self.store.primary(table)?;
                Ok(primary
                    .range(lower.clone(), upper.clone())?
                    .map(|(pk, row)| (pk.clone(), row.clone()))
                    .collect())
            }
            AccessPath::IndexRange {
                index: IndexKind::Secondary,
                column,
                lower,
                upper,
                ..
            } => {
                let secondary = self.store.secondary(table, column).ok_or_else(|| {
                    Error::Internal(format!("secondary index '{}.{}' is not open", table, column))
                })?;
                let primary = self.store.primary(table)?;
                let mut rows = Vec::new();
                for (_, pks) in secondary.range(lower.clone(), upper.clone())? {
                    for pk in pks {
                        let row = primary.get(pk)?.ok_or_else(|| {
                            Error::Internal(format!(
                                "index '{}.{}' references missing row {}",
                                table, column, pk
                            ))
                        })?;
                        rows.push((pk.clone(), row.clone()));
                    }
                }
                Ok(rows)
            }
        }
    }

    // ========== Predicate evaluation ==========

    fn operand_value<'r>(operand: &'r BoundOperand, rows: &'r [Row]) -> Result<&'r Value> {
        match operand {
            BoundOperand::Column(col) => Ok(&rows[col.side].values()[col.index]),
            BoundOperand::Literal(value) => Ok(value),
            BoundOperand::Aggregate(agg) => Err(Error::Internal(format!(
                "aggregate '{}' evaluated outside HAVING",
                agg.display
            ))),
        }
    }

    fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
        match op {
            CompareOp::Eq => left == right,
            CompareOp::Neq => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Gt => left > right,
        }
    }

    fn eval_comparison(cmp: &BoundComparison, rows: &[Row]) -> Result<bool> {
        let left = Self::operand_value(&cmp.left, rows)?;
        let right = Self::operand_value(&cmp.right, rows)?;
        Ok(Self::compare(cmp.op, left, right))
    }

    fn eval_predicate(pred: &BoundPredicate, rows: &[Row]) -> Result<bool> {
        match pred {
            BoundPredicate::Single(cmp) => Self::eval_comparison(cmp, rows),
            BoundPredicate::Pair {
                left,
                connective,
                right,
            } => {
                let l = Self::eval_comparison(left, rows)?;
                let r = Self::eval_comparison(right, rows)?;
                Ok(match connective {
                    Connective::And => l && r,
                    Connective::Or => l || r,
                })
            }
        }
    }

    // ========== SELECT ==========

    fn execute_select(&mut self, select: &BoundSelect) -> Result<Vec<ResultRow>> {
        let where_pred = select.where_clause.as_ref();
        let table0 = &select.tables[0];
        let path0 = choose_access_path(self.catalog, &table0.name, 0, where_pred);

        let mut tuples: Vec<Vec<Row>> = if let Some(join) = &select.join {
            let table1 = &select.tables[1];
            let path1 = choose_access_path(self.catalog, &table1.name, 1, where_pred);
            self.access_paths = vec![path0.clone(), path1.clone()];
            self.join_rows(select, join, &path0, &path1)?
        } else {
            self.access_paths = vec![path0.clone()];
            self.scan_side(&table0.name, &path0)?
                .into_iter()
                .map(|(_, row)| vec![row])
                .collect()
        };
        debug!(
            paths = ?self.access_paths,
            candidates = tuples.len(),
            "select access"
        );

        // Filter: the full predicate runs over every candidate, including
        // any conjunct the access path already consumed.
        if let Some(pred) = where_pred {
            let mut filtered = Vec::with_capacity(tuples.len());
            for rows in tuples {
                if Self::eval_predicate(pred, &rows)? {
                    filtered.push(rows);
                }
            }
            tuples = filtered;
        }

        if select.grouped {
            self.grouped_output(select, &tuples)
        } else {
            Self::ordered_output(select, tuples)
        }
    }

    /// Inner equi-join. The driver side is the one whose access path is more
    /// selective: an index range beats a scan, ties go to the left side. The
    /// probe side is looked up through its index on the join column when one
    /// exists, otherwise it is streamed once into an in-memory multimap.
    fn join_rows(
        &self,
        select: &BoundSelect,
        join: &super::binder::BoundJoin,
        path0: &AccessPath,
        path1: &AccessPath,
    ) -> Result<Vec<Vec<Row>>> {
        let driver = if path0.is_index_range() {
            0
        } else if path1.is_index_range() {
            1
        } else {
            0
        };

        let (driver_table, driver_path, driver_col, probe_table, probe_col) = if driver == 0 {
            (&select.tables[0], path0, &join.left, &select.tables[1], &join.right)
        } else {
            (&select.tables[1], path1, &join.right, &select.tables[0], &join.left)
        };

        let driver_rows = self.scan_side(&driver_table.name, driver_path)?;

        let probe_def = self.catalog.table(&probe_table.name)?;
        let probe_col_name = probe_def.schema().columns()[probe_col.index].name.clone();
        let probe_is_pk = probe_def.primary_key_column().name == probe_col_name;
        let probe_has_secondary = self.store.has_secondary(&probe_table.name, &probe_col_name);

        // Hash fallback: stream the probe side once, keyed by join column
        let hash: Option<HashMap<Value, Vec<Row>>> = if !probe_is_pk && !probe_has_secondary {
            let primary = self.store.primary(&probe_table.name)?;
            let mut map: HashMap<Value, Vec<Row>> = HashMap::new();
            for (_, row) in primary.full_scan() {
                map.entry(row.values()[probe_col.index].clone())
                    .or_default()
                    .push(row.clone());
            }
            Some(map)
        } else {
            None
        };

        let mut tuples = Vec::new();
        for (_, driver_row) in &driver_rows {
            let join_value = &driver_row.values()[driver_col.index];

            let matches: Vec<Row> = if probe_is_pk {
                let primary = self.store.primary(&probe_table.name)?;
                primary.get(join_value)?.cloned().into_iter().collect()
            } else if probe_has_secondary {
                let secondary = self
                    .store
                    .secondary(&probe_table.name, &probe_col_name)
                    .expect("checked above");
                let primary = self.store.primary(&probe_table.name)?;
                let mut rows = Vec::new();
                for pk in secondary.pks_for(join_value)? {
                    let row = primary.get(&pk)?.ok_or_else(|| {
                        Error::Internal(format!(
                            "index '{}.{}' references missing row {}",
                            probe_table.name, probe_col_name, pk
                        ))
                    })?;
                    rows.push(row.clone());
                }
                rows
            } else {
                hash.as_ref()
                    .expect("hash map built when no index exists")
                    .get(join_value)
                    .cloned()
                    .unwrap_or_default()
            };

            for probe_row in matches {
                // Tuples are always laid out [FROM side, JOIN side]
                let pair = if driver == 0 {
                    vec![driver_row.clone(), probe_row]
                } else {
                    vec![probe_row, driver_row.clone()]
                };
                tuples.push(pair);
            }
        }
        Ok(tuples)
    }

    /// Order + project for a non-grouped select
    fn ordered_output(select: &BoundSelect, mut tuples: Vec<Vec<Row>>) -> Result<Vec<ResultRow>> {
        // Stable sort so that ties preserve upstream order
        tuples.sort_by(|a, b| {
            for (col, ascending) in &select.order_by {
                let va = &a[col.side].values()[col.index];
                let vb = &b[col.side].values()[col.index];
                let cmp = va.cmp(vb);
                if cmp != std::cmp::Ordering::Equal {
                    return if *ascending { cmp } else { cmp.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });

        tuples
            .iter()
            .map(|rows| {
                let mut entries = Vec::with_capacity(select.projections.len());
                for proj in &select.projections {
                    match proj {
                        BoundProjection::Column(col) => {
                            entries.push((
                                col.display.clone(),
                                rows[col.side].values()[col.index].clone(),
                            ));
                        }
                        BoundProjection::Aggregate(agg) => {
                            return Err(Error::Internal(format!(
                                "aggregate '{}' in a non-grouped select",
                                agg.display
                            )))
                        }
                    }
                }
                Ok(ResultRow::new(entries))
            })
            .collect()
    }

    /// Group + aggregate + having + order + project
    fn grouped_output(
        &self,
        select: &BoundSelect,
        tuples: &[Vec<Row>],
    ) -> Result<Vec<ResultRow>> {
        let aggregates = collect_aggregates(select);

        // Hash rows into groups; groups keep first-seen (upstream) order
        let mut lookup: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut groups: Vec<GroupState> = Vec::new();
        for rows in tuples {
            let key: Vec<Value> = select
                .group_by
                .iter()
                .map(|col| rows[col.side].values()[col.index].clone())
                .collect();
            let slot = *lookup.entry(key.clone()).or_insert_with(|| {
                groups.push(GroupState {
                    key,
                    aggs: aggregates.iter().map(AggState::new).collect(),
                });
                groups.len() - 1
            });
            for (state, agg) in groups[slot].aggs.iter_mut().zip(&aggregates) {
                state.update(&rows[agg.column.side].values()[agg.column.index]);
            }
        }

        // Having: same predicate grammar, aggregate references allowed
        let mut kept: Vec<&GroupState> = Vec::new();
        for group in &groups {
            let keep = match &select.having {
                Some(pred) => Self::eval_having(pred, group, select, &aggregates)?,
                None => true,
            };
            if keep {
                kept.push(group);
            }
        }

        // Order by grouping columns; stable so ties keep first-seen order
        let key_position = |col: &BoundColumn| {
            select
                .group_by
                .iter()
                .position(|g| g.side == col.side && g.index == col.index)
                .expect("binder admits only grouping columns in ORDER BY")
        };
        kept.sort_by(|a, b| {
            for (col, ascending) in &select.order_by {
                let pos = key_position(col);
                let cmp = a.key[pos].cmp(&b.key[pos]);
                if cmp != std::cmp::Ordering::Equal {
                    return if *ascending { cmp } else { cmp.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });

        kept.iter()
            .map(|group| {
                let mut entries = Vec::with_capacity(select.projections.len());
                for proj in &select.projections {
                    match proj {
                        BoundProjection::Column(col) => {
                            entries.push((
                                col.display.clone(),
                                group.key[key_position(col)].clone(),
                            ));
                        }
                        BoundProjection::Aggregate(agg) => {
                            let slot = aggregate_slot(&aggregates, agg);
                            entries.push((agg.display.clone(), group.aggs[slot].finish()));
                        }
                    }
                }
                Ok(ResultRow::new(entries))
            })
            .collect()
    }

    fn eval_having(
        pred: &BoundPredicate,
        group: &GroupState,
        select: &BoundSelect,
        aggregates: &[BoundAggregate],
    ) -> Result<bool> {
        let value_of = |operand: &BoundOperand| -> Result<Value> {
            match operand {
                BoundOperand::Literal(value) => Ok(value.clone()),
                BoundOperand::Column(col) => {
                    let pos = select
                        .group_by
                        .iter()
                        .position(|g| g.side == col.side && g.index == col.index)
                        .ok_or_else(|| {
                            Error::Internal(format!(
                                "HAVING column '{}' is not a grouping column",
                                col.display
                            ))
                        })?;
                    Ok(group.key[pos].clone())
                }
                BoundOperand::Aggregate(agg) => {
                    let slot = aggregate_slot(aggregates, agg);
                    Ok(group.aggs[slot].finish())
                }
            }
        };
        let eval_cmp = |cmp: &BoundComparison| -> Result<bool> {
            let left = value_of(&cmp.left)?;
            let right = value_of(&cmp.right)?;
            Ok(Self::compare(cmp.op, &left, &right))
        };

        match pred {
            BoundPredicate::Single(cmp) => eval_cmp(cmp),
            BoundPredicate::Pair {
                left,
                connective,
                right,
            } => {
                let l = eval_cmp(left)?;
                let r = eval_cmp(right)?;
                Ok(match connective {
                    Connective::And => l && r,
                    Connective::Or => l || r,
                })
            }
        }
    }

    // ========== INSERT ==========

    fn execute_insert(&mut self, insert: &BoundInsert) -> Result<StatementResult> {
        let catalog = self.catalog;
        let def = catalog.table(&insert.table)?;
        let pk_pos = def
            .schema()
            .primary_key_position()
            .expect("every table has a primary key");
        let pk = insert.row.values()[pk_pos].clone();

        if self.store.primary(&insert.table)?.get(&pk)?.is_some() {
            return Err(Error::PKViolation(format!(
                "duplicate value {} for '{}.{}'",
                pk,
                insert.table,
                def.primary_key_column().name
            )));
        }
        self.store
            .primary_mut(&insert.table)?
            .put(pk.clone(), insert.row.clone())?;

        // Mirror the row into every secondary index; undo everything on failure
        let mut done: Vec<(String, Value)> = Vec::new();
        for index in catalog.indexes_for(&insert.table) {
            let pos = def
                .schema()
                .column_index(&index.column)
                .expect("catalog indexes reference existing columns");
            let value = insert.row.values()[pos].clone();
            let result = match self.store.secondary_mut(&insert.table, &index.column) {
                Some(secondary) => secondary.add_entry(value.clone(), pk.clone()),
                None => Err(Error::Internal(format!(
                    "secondary index '{}.{}' is not open",
                    insert.table, index.column
                ))),
            };
            if let Err(e) = result {
                for (column, value) in &done {
                    if let Some(secondary) = self.store.secondary_mut(&insert.table, column) {
                        secondary.remove_entry(value, &pk).ok();
                    }
                }
                if let Ok(primary) = self.store.primary_mut(&insert.table) {
                    primary.delete(&pk).ok();
                }
                return Err(e);
            }
            done.push((index.column.clone(), value));
        }

        Ok(StatementResult::Affected(1))
    }

    // ========== UPDATE ==========

    fn execute_update(&mut self, update: &BoundUpdate) -> Result<StatementResult> {
        let catalog = self.catalog;
        let def = catalog.table(&update.table)?;
        let pk_pos = def
            .schema()
            .primary_key_position()
            .expect("every table has a primary key");
        let pk_changes = update.assignments.iter().any(|(pos, _)| *pos == pk_pos);

        let pred = update.where_clause.as_ref();
        let path = choose_access_path(catalog, &update.table, 0, pred);
        self.access_paths = vec![path.clone()];

        // Snapshot the matched primary keys first so index writes cannot
        // disturb the iteration.
        let mut matched: Vec<(Value, Row)> = Vec::new();
        for (pk, row) in self.scan_side(&update.table, &path)? {
            let keep = match pred {
                Some(p) => Self::eval_predicate(p, std::slice::from_ref(&row))?,
                None => true,
            };
            if keep {
                matched.push((pk, row));
            }
        }

        let mut updates: Vec<(Value, Row, Value, Row)> = Vec::new();
        for (old_pk, old_row) in &matched {
            let mut new_row = old_row.clone();
            for (pos, value) in &update.assignments {
                new_row.set(*pos, value.clone());
            }
            let new_pk = new_row.values()[pk_pos].clone();
            updates.push((old_pk.clone(), old_row.clone(), new_pk, new_row));
        }

        // Validate every row before touching storage: no partial write
        if pk_changes {
            let vacated: HashSet<&Value> = updates
                .iter()
                .filter(|(old_pk, _, new_pk, _)| old_pk != new_pk)
                .map(|(old_pk, ..)| old_pk)
                .collect();
            let referencing = catalog.referencing_foreign_keys(&update.table);
            let mut taken: HashSet<&Value> = HashSet::new();
            for (old_pk, _, new_pk, _) in &updates {
                if old_pk == new_pk {
                    continue;
                }
                for (ref_table, fk_column) in &referencing {
                    if !self
                        .referencing_pks(ref_table, fk_column, old_pk)?
                        .is_empty()
                    {
                        return Err(Error::FKViolation(format!(
                            "cannot update primary key {}: referenced by '{}.{}'",
                            old_pk, ref_table, fk_column
                        )));
                    }
                }
                let occupied = self.store.primary(&update.table)?.get(new_pk)?.is_some();
                if (occupied && !vacated.contains(new_pk)) || !taken.insert(new_pk) {
                    return Err(Error::PKViolation(format!(
                        "duplicate value {} for '{}.{}'",
                        new_pk,
                        update.table,
                        def.primary_key_column().name
                    )));
                }
            }
        }

        // Updated foreign-key values must resolve
        for (pos, value) in &update.assignments {
            let column = &def.schema().columns()[*pos];
            if let Some(fk) = &column.foreign_key {
                if !updates.is_empty()
                    && self.store.primary(&fk.table)?.get(value)?.is_none()
                {
                    return Err(Error::FKViolation(format!(
                        "value {} for '{}.{}' has no matching row in '{}.{}'",
                        value, update.table, column.name, fk.table, fk.column
                    )));
                }
            }
        }

        // Apply: rewrite index entries for changed columns, then the row
        let index_columns: Vec<(String, usize)> = catalog
            .indexes_for(&update.table)
            .iter()
            .map(|index| {
                let pos = def
                    .schema()
                    .column_index(&index.column)
                    .expect("catalog indexes reference existing columns");
                (index.column.clone(), pos)
            })
            .collect();

        for (old_pk, old_row, new_pk, new_row) in &updates {
            for (column, pos) in &index_columns {
                let old_value = &old_row.values()[*pos];
                let new_value = &new_row.values()[*pos];
                if old_value == new_value && old_pk == new_pk {
                    continue;
                }
                let secondary = self
                    .store
                    .secondary_mut(&update.table, column)
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "secondary index '{}.{}' is not open",
                            update.table, column
                        ))
                    })?;
                secondary.remove_entry(old_value, old_pk)?;
                secondary.add_entry(new_value.clone(), new_pk.clone())?;
            }

            let primary = self.store.primary_mut(&update.table)?;
            if old_pk != new_pk {
                primary.delete(old_pk)?;
            }
            primary.put(new_pk.clone(), new_row.clone())?;
        }

        Ok(StatementResult::Affected(updates.len() as u64))
    }

    // ========== DELETE ==========

    fn execute_delete(&mut self, delete: &BoundDelete) -> Result<StatementResult> {
        let catalog = self.catalog;
        let pred = delete.where_clause.as_ref();
        let path = choose_access_path(catalog, &delete.table, 0, pred);
        self.access_paths = vec![path.clone()];

        let mut matched: Vec<(Value, Row)> = Vec::new();
        for (pk, row) in self.scan_side(&delete.table, &path)? {
            let keep = match pred {
                Some(p) => Self::eval_predicate(p, std::slice::from_ref(&row))?,
                None => true,
            };
            if keep {
                matched.push((pk, row));
            }
        }
        let doomed: HashSet<&Value> = matched.iter().map(|(pk, _)| pk).collect();

        // Refuse before removing anything if a surviving FK row still
        // references any doomed primary key.
        let referencing = catalog.referencing_foreign_keys(&delete.table);
        for (pk, _) in &matched {
            for (ref_table, fk_column) in &referencing {
                let mut refs = self.referencing_pks(ref_table, fk_column, pk)?;
                if ref_table == &delete.table {
                    refs.retain(|ref_pk| !doomed.contains(ref_pk));
                }
                if !refs.is_empty() {
                    return Err(Error::FKViolation(format!(
                        "cannot delete row {}: referenced by '{}.{}'",
                        pk, ref_table, fk_column
                    )));
                }
            }
        }

        let def = catalog.table(&delete.table)?;
        let index_columns: Vec<(String, usize)> = catalog
            .indexes_for(&delete.table)
            .iter()
            .map(|index| {
                let pos = def
                    .schema()
                    .column_index(&index.column)
                    .expect("catalog indexes reference existing columns");
                (index.column.clone(), pos)
            })
            .collect();

        for (pk, row) in &matched {
            for (column, pos) in &index_columns {
                let secondary = self
                    .store
                    .secondary_mut(&delete.table, column)
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "secondary index '{}.{}' is not open",
                            delete.table, column
                        ))
                    })?;
                secondary.remove_entry(&row.values()[*pos], pk)?;
            }
            self.store.primary_mut(&delete.table)?.delete(pk)?;
        }

        Ok(StatementResult::Affected(matched.len() as u64))
    }

    /// Primary keys of rows in `table` whose `fk_column` equals `target`,
    /// through the column's index when one exists.
    fn referencing_pks(&self, table: &str, fk_column: &str, target: &Value) -> Result<Vec<Value>> {
        if let Some(secondary) = self.store.secondary(table, fk_column) {
            return secondary.pks_for(target);
        }
        let def = self.catalog.table(table)?;
        let pos = def
            .schema()
            .column_index(fk_column)
            .ok_or_else(|| Error::Internal(format!("missing column '{}.{}'", table, fk_column)))?;
        let primary = self.store.primary(table)?;
        Ok(primary
            .full_scan()
            .filter(|(_, row)| &row.values()[pos] == target)
            .map(|(pk, _)| pk.clone())
            .collect())
    }
}

/// All aggregates a grouped select computes: those projected plus those the
/// HAVING clause references, deduplicated.
fn collect_aggregates(select: &BoundSelect) -> Vec<BoundAggregate> {
    let mut aggregates: Vec<BoundAggregate> = Vec::new();
    let mut push = |agg: &BoundAggregate| {
        if !aggregates.iter().any(|a| {
            a.func == agg.func
                && a.column.side == agg.column.side
                && a.column.index == agg.column.index
        }) {
            aggregates.push(agg.clone());
        }
    };
    for proj in &select.projections {
        if let BoundProjection::Aggregate(agg) = proj {
            push(agg);
        }
    }
    if let Some(having) = &select.having {
        for leaf in having.leaves() {
            for operand in [&leaf.left, &leaf.right] {
                if let BoundOperand::Aggregate(agg) = operand {
                    push(agg);
                }
            }
        }
    }
    aggregates
}

fn aggregate_slot(aggregates: &[BoundAggregate], agg: &BoundAggregate) -> usize {
    aggregates
        .iter()
        .position(|a| {
            a.func == agg.func
                && a.column.side == agg.column.side
                && a.column.index == agg.column.index
        })
        .expect("every referenced aggregate is collected")
}
