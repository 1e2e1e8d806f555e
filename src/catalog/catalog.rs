//! System catalog for RivetDB
//!
//! This module manages metadata about tables and indexes and enforces the
//! schema invariants: unique table names, unique columns, exactly one
//! primary key per table, well-formed foreign keys, and referential safety
//! of DROP TABLE. The catalog is an in-memory structure backed by a
//! `catalog.json` snapshot.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::schema::{IndexDef, Schema, TableDef};
use crate::error::{Error, Result};

/// System catalog - owns all schema metadata
#[derive(Debug, Default)]
pub struct Catalog {
    /// Table definitions by name
    tables: HashMap<String, TableDef>,
    /// Index definitions by (table, column)
    indexes: HashMap<(String, String), IndexDef>,
    /// Next table ID
    next_table_id: u32,
    /// Next index ID
    next_index_id: u32,
}

/// Serializable snapshot of the catalog
#[derive(Serialize, Deserialize)]
struct CatalogSnapshot {
    tables: Vec<TableDef>,
    indexes: Vec<IndexDef>,
    next_table_id: u32,
    next_index_id: u32,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            indexes: HashMap::new(),
            next_table_id: 1,
            next_index_id: 1,
        }
    }

    /// Create a new table, enforcing every schema invariant.
    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<&TableDef> {
        if self.tables.contains_key(name) {
            return Err(Error::DdlFailed(format!("table '{}' already exists", name)));
        }

        // Column names unique within the table
        let mut seen = std::collections::HashSet::new();
        for col in schema.columns() {
            if !seen.insert(col.name.as_str()) {
                return Err(Error::DdlFailed(format!(
                    "duplicate column '{}' in table '{}'",
                    col.name, name
                )));
            }
        }

        // Exactly one primary key
        let pk_count = schema.columns().iter().filter(|c| c.primary_key).count();
        if pk_count != 1 {
            return Err(Error::DdlFailed(format!(
                "table '{}' must declare exactly one PRIMARY KEY column, found {}",
                name, pk_count
            )));
        }

        // Foreign keys must target the primary key of an existing table with
        // an equal type. A table may reference itself.
        for col in schema.columns() {
            let Some(fk) = &col.foreign_key else {
                continue;
            };
            let target = if fk.table == name {
                // Self-reference resolves against the schema being created
                None
            } else {
                Some(self.table(&fk.table)?)
            };
            let target_schema = target.map(TableDef::schema).unwrap_or(&schema);
            let ref_col = target_schema.column(&fk.column).ok_or_else(|| {
                Error::UnknownColumn {
                    column: fk.column.clone(),
                    scope: format!("table '{}'", fk.table),
                }
            })?;
            if !ref_col.primary_key {
                return Err(Error::FKViolation(format!(
                    "foreign key '{}.{}' must reference a primary key, but '{}.{}' is not one",
                    name, col.name, fk.table, fk.column
                )));
            }
            if ref_col.data_type != col.data_type {
                return Err(Error::TypeMismatch {
                    expected: ref_col.data_type.to_string(),
                    found: col.data_type.to_string(),
                });
            }
        }

        let table = TableDef::new(name, schema, self.next_table_id);
        self.next_table_id += 1;
        self.tables.insert(name.to_string(), table);
        Ok(&self.tables[name])
    }

    /// Remove a table and all of its index definitions.
    ///
    /// Refuses when any *other* table holds a foreign key referencing this
    /// table. Returns the removed table definition together with the removed
    /// secondary index definitions so the caller can clean up storage.
    pub fn drop_table(&mut self, name: &str) -> Result<(TableDef, Vec<IndexDef>)> {
        if !self.tables.contains_key(name) {
            return Err(Error::UnknownTable(name.to_string()));
        }

        for (table, column) in self.referencing_foreign_keys(name) {
            if table != name {
                return Err(Error::FKViolation(format!(
                    "cannot drop table '{}': referenced by foreign key '{}.{}'",
                    name, table, column
                )));
            }
        }

        let table = self.tables.remove(name).expect("existence checked above");
        let mut dropped_indexes = Vec::new();
        self.indexes.retain(|(t, _), def| {
            if t == name {
                dropped_indexes.push(def.clone());
                false
            } else {
                true
            }
        });
        Ok((table, dropped_indexes))
    }

    /// Register a user index on (table, column).
    ///
    /// The primary-key column carries an implicit index, so indexing it again
    /// is rejected as a duplicate.
    pub fn create_index(&mut self, name: &str, table: &str, column: &str) -> Result<&IndexDef> {
        let table_def = self.table(table)?;
        let col = table_def.column(column).ok_or_else(|| Error::UnknownColumn {
            column: column.to_string(),
            scope: format!("table '{}'", table),
        })?;
        if col.primary_key {
            return Err(Error::DdlFailed(format!(
                "column '{}.{}' is the primary key and already indexed",
                table, column
            )));
        }
        let key = (table.to_string(), column.to_string());
        if self.indexes.contains_key(&key) {
            return Err(Error::DdlFailed(format!(
                "index on '{}.{}' already exists",
                table, column
            )));
        }
        if self
            .indexes
            .values()
            .any(|idx| idx.table == table && idx.name == name)
        {
            return Err(Error::DdlFailed(format!(
                "index '{}' already exists on table '{}'",
                name, table
            )));
        }

        let def = IndexDef {
            name: name.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            id: self.next_index_id,
        };
        self.next_index_id += 1;
        self.indexes.insert(key.clone(), def);
        Ok(&self.indexes[&key])
    }

    /// Remove a user index by name. The implicit primary-key index cannot be
    /// addressed here and therefore cannot be dropped.
    pub fn drop_index(&mut self, name: &str, table: &str) -> Result<IndexDef> {
        let key = self
            .indexes
            .iter()
            .find(|(_, def)| def.table == table && def.name == name)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| {
                Error::DdlFailed(format!("index '{}' not found on table '{}'", name, table))
            })?;
        Ok(self.indexes.remove(&key).expect("key found above"))
    }

    /// Look up a table by name
    pub fn table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// All table definitions, in unspecified order
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Table names in sorted order
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// User indexes defined on a table
    pub fn indexes_for(&self, table: &str) -> Vec<&IndexDef> {
        let mut defs: Vec<&IndexDef> = self
            .indexes
            .values()
            .filter(|idx| idx.table == table)
            .collect();
        defs.sort_by_key(|idx| idx.id);
        defs
    }

    /// Whether (table, column) is covered by an index: the implicit
    /// primary-key index or a user index.
    pub fn is_indexed(&self, table: &str, column: &str) -> bool {
        if let Ok(def) = self.table(table) {
            if def.primary_key_column().name == column {
                return true;
            }
        }
        self.indexes
            .contains_key(&(table.to_string(), column.to_string()))
    }

    /// Every (table, fk_column) across the catalog whose foreign key targets
    /// the given table, including self-references.
    pub fn referencing_foreign_keys(&self, target: &str) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for table in self.tables.values() {
            for col in table.schema().columns() {
                if let Some(fk) = &col.foreign_key {
                    if fk.table == target {
                        refs.push((table.name.clone(), col.name.clone()));
                    }
                }
            }
        }
        refs.sort();
        refs
    }

    /// Save the catalog snapshot to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tables: Vec<TableDef> = self.tables.values().cloned().collect();
        tables.sort_by_key(|t| t.id);
        let mut indexes: Vec<IndexDef> = self.indexes.values().cloned().collect();
        indexes.sort_by_key(|i| i.id);

        let snapshot = CatalogSnapshot {
            tables,
            indexes,
            next_table_id: self.next_table_id,
            next_index_id: self.next_index_id,
        };
        let json =
            serde_json::to_string_pretty(&snapshot).map_err(|e| Error::Internal(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a catalog snapshot from disk
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let snapshot: CatalogSnapshot =
            serde_json::from_str(&json).map_err(|e| Error::StorageCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut tables = HashMap::new();
        for table in snapshot.tables {
            tables.insert(table.name.clone(), table);
        }
        let mut indexes = HashMap::new();
        for index in snapshot.indexes {
            indexes.insert((index.table.clone(), index.column.clone()), index);
        }

        Ok(Self {
            tables,
            indexes,
            next_table_id: snapshot.next_table_id,
            next_index_id: snapshot.next_index_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    fn users_schema() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("name", DataType::Str, 1),
        ])
    }

    #[test]
    fn test_create_and_get_table() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();

        let table = catalog.table("users").unwrap();
        assert_eq!(table.name(), "users");
        assert_eq!(table.schema().column_count(), 2);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();

        let result = catalog.create_table("users", users_schema());
        assert!(matches!(result, Err(Error::DdlFailed(_))));
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let mut catalog = Catalog::new();
        let schema = Schema::from_columns(vec![Column::new("id", DataType::Int, 0)]);
        let result = catalog.create_table("users", schema);
        assert!(matches!(result, Err(Error::DdlFailed(_))));
    }

    #[test]
    fn test_fk_must_reference_primary_key() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();

        // name is not the primary key of users
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("owner", DataType::Str, 1).foreign_key("users", "name"),
        ]);
        let result = catalog.create_table("pets", schema);
        assert!(matches!(result, Err(Error::FKViolation(_))));
    }

    #[test]
    fn test_fk_type_must_match() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();

        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("owner", DataType::Str, 1).foreign_key("users", "id"),
        ]);
        let result = catalog.create_table("pets", schema);
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_drop_table_blocked_by_reference() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("owner", DataType::Int, 1).foreign_key("users", "id"),
        ]);
        catalog.create_table("pets", schema).unwrap();

        let result = catalog.drop_table("users");
        assert!(matches!(result, Err(Error::FKViolation(_))));

        catalog.drop_table("pets").unwrap();
        catalog.drop_table("users").unwrap();
        assert!(!catalog.table_exists("users"));
    }

    #[test]
    fn test_self_reference_does_not_block_drop() {
        let mut catalog = Catalog::new();
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Int, 0).primary_key(true),
            Column::new("parent", DataType::Int, 1).foreign_key("nodes", "id"),
        ]);
        catalog.create_table("nodes", schema).unwrap();

        assert!(catalog.drop_table("nodes").is_ok());
    }

    #[test]
    fn test_index_lifecycle() {
        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();

        catalog.create_index("ix_name", "users", "name").unwrap();
        assert!(catalog.is_indexed("users", "name"));

        // Duplicate (table, column) rejected
        let dup = catalog.create_index("other", "users", "name");
        assert!(matches!(dup, Err(Error::DdlFailed(_))));

        // The primary key is implicitly indexed
        assert!(catalog.is_indexed("users", "id"));
        let pk_index = catalog.create_index("ix_id", "users", "id");
        assert!(matches!(pk_index, Err(Error::DdlFailed(_))));

        catalog.drop_index("ix_name", "users").unwrap();
        assert!(!catalog.is_indexed("users", "name"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let mut catalog = Catalog::new();
        catalog.create_table("users", users_schema()).unwrap();
        catalog.create_index("ix_name", "users", "name").unwrap();
        catalog.save(&path).unwrap();

        let loaded = Catalog::load(&path).unwrap();
        assert!(loaded.table_exists("users"));
        assert!(loaded.is_indexed("users", "name"));
        assert_eq!(loaded.indexes_for("users").len(), 1);
    }
}
