//! DDL manager
//!
//! Orchestrates CREATE / DROP TABLE and CREATE / DROP INDEX across the
//! catalog and the index store. Each operation is one catalog mutation plus
//! index-file work plus a catalog snapshot; when any later step fails the
//! catalog edit is rolled back and the failure surfaces as `DdlFailed`.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::info;

use crate::catalog::{Catalog, Column, Schema};
use crate::error::{Error, Result};
use crate::sql::ast::{CreateIndex, CreateTable, DropIndex, DropTable, Statement};
use crate::storage::{IndexStore, PkSet, Value};

/// Executes DDL statements against catalog + store
pub struct DdlManager<'a> {
    catalog: &'a mut Catalog,
    store: &'a mut IndexStore,
    catalog_path: PathBuf,
}

impl<'a> DdlManager<'a> {
    pub fn new(catalog: &'a mut Catalog, store: &'a mut IndexStore, catalog_path: PathBuf) -> Self {
        Self {
            catalog,
            store,
            catalog_path,
        }
    }

    /// Execute one DDL statement
    pub fn execute(&mut self, stmt: &Statement) -> Result<()> {
        match stmt {
            Statement::CreateTable(create) => self.create_table(create),
            Statement::DropTable(drop) => self.drop_table(drop),
            Statement::CreateIndex(create) => self.create_index(create),
            Statement::DropIndex(drop) => self.drop_index(drop),
            other => Err(Error::Internal(format!(
                "DDL manager received a DML statement: {}",
                other
            ))),
        }
    }

    fn create_table(&mut self, create: &CreateTable) -> Result<()> {
        let mut schema = Schema::new();
        for (position, col) in create.columns.iter().enumerate() {
            let mut column = Column::new(col.name.clone(), col.data_type, position)
                .primary_key(col.primary_key);
            if let Some(fk) = &col.foreign_key {
                column = column.foreign_key(fk.table.clone(), fk.column.clone());
            }
            schema.add_column(column);
        }

        self.catalog.create_table(&create.name, schema)?;
        let (pk_name, pk_type) = {
            let def = self.catalog.table(&create.name)?;
            let pk = def.primary_key_column();
            (pk.name.clone(), pk.data_type)
        };

        if let Err(e) = self.store.create_primary(&create.name, &pk_name, pk_type) {
            self.catalog.drop_table(&create.name).ok();
            return Err(Error::DdlFailed(format!(
                "CREATE TABLE '{}': {}",
                create.name, e
            )));
        }
        if let Err(e) = self.catalog.save(&self.catalog_path) {
            self.store.drop_primary(&create.name, &pk_name).ok();
            self.catalog.drop_table(&create.name).ok();
            return Err(Error::DdlFailed(format!(
                "CREATE TABLE '{}': {}",
                create.name, e
            )));
        }

        info!(table = %create.name, columns = create.columns.len(), "created table");
        Ok(())
    }

    fn drop_table(&mut self, drop: &DropTable) -> Result<()> {
        let (table, indexes) = self.catalog.drop_table(&drop.name)?;
        if let Err(e) = self.catalog.save(&self.catalog_path) {
            return Err(Error::DdlFailed(format!("DROP TABLE '{}': {}", drop.name, e)));
        }

        // The catalog no longer lists these files; a removal failure leaves
        // an orphan behind but cannot make the engine read stale data.
        let pk_name = table.primary_key_column().name.clone();
        self.store.drop_primary(&drop.name, &pk_name).ok();
        for index in &indexes {
            self.store.drop_secondary(&index.table, &index.column).ok();
        }

        info!(table = %drop.name, indexes = indexes.len(), "dropped table");
        Ok(())
    }

    fn create_index(&mut self, create: &CreateIndex) -> Result<()> {
        let (position, key_type) = {
            let def = self.catalog.table(&create.table)?;
            let col = def.column(&create.column).ok_or_else(|| Error::UnknownColumn {
                column: create.column.clone(),
                scope: format!("table '{}'", create.table),
            })?;
            (col.position, col.data_type)
        };

        self.catalog
            .create_index(&create.name, &create.table, &create.column)?;

        if let Err(e) = self
            .store
            .create_secondary(&create.table, &create.column, key_type)
        {
            self.catalog.drop_index(&create.name, &create.table).ok();
            return Err(Error::DdlFailed(format!(
                "CREATE INDEX '{}': {}",
                create.name, e
            )));
        }

        // Backfill from the primary index. The new index only becomes
        // externally visible once the build completes; a mid-build failure
        // removes the partial file.
        if let Err(e) = self.backfill(&create.table, &create.column, position) {
            self.store
                .drop_secondary(&create.table, &create.column)
                .ok();
            self.catalog.drop_index(&create.name, &create.table).ok();
            return Err(Error::DdlFailed(format!(
                "CREATE INDEX '{}': {}",
                create.name, e
            )));
        }

        if let Err(e) = self.catalog.save(&self.catalog_path) {
            self.store
                .drop_secondary(&create.table, &create.column)
                .ok();
            self.catalog.drop_index(&create.name, &create.table).ok();
            return Err(Error::DdlFailed(format!(
                "CREATE INDEX '{}': {}",
                create.name, e
            )));
        }

        info!(index = %create.name, table = %create.table, column = %create.column, "created index");
        Ok(())
    }

    fn backfill(&mut self, table: &str, column: &str, position: usize) -> Result<()> {
        let mut entries: HashMap<Value, PkSet> = HashMap::new();
        {
            let primary = self.store.primary(table)?;
            for (pk, row) in primary.full_scan() {
                entries
                    .entry(row.values()[position].clone())
                    .or_default()
                    .insert(pk.clone());
            }
        }
        let secondary = self
            .store
            .secondary_mut(table, column)
            .ok_or_else(|| Error::Internal(format!("index '{}.{}' vanished mid-build", table, column)))?;
        secondary.extend(entries)
    }

    fn drop_index(&mut self, drop: &DropIndex) -> Result<()> {
        let index = self.catalog.drop_index(&drop.name, &drop.table)?;
        if let Err(e) = self.catalog.save(&self.catalog_path) {
            return Err(Error::DdlFailed(format!("DROP INDEX '{}': {}", drop.name, e)));
        }
        self.store.drop_secondary(&index.table, &index.column).ok();

        info!(index = %drop.name, table = %drop.table, "dropped index");
        Ok(())
    }
}
