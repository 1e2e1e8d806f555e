//! Engine facade
//!
//! The single entry point: statement text in, result rows + diagnostics
//! out. One engine owns one data directory; calls are serialized by the
//! `&mut self` receiver, and a second engine on the same directory is
//! rejected by the store's lock.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::ddl::DdlManager;
use crate::error::Result;
use crate::executor::{AccessPath, Binder, DmlExecutor, ResultRow, StatementResult};
use crate::sql::ast::Statement;
use crate::sql::Parser;
use crate::storage::IndexStore;

/// The facade result shape
#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    /// Result rows for SELECT, null otherwise
    pub result: Option<Vec<ResultRow>>,
    /// Affected-row count for INSERT / UPDATE / DELETE, null otherwise
    pub rows_affected: Option<u64>,
    /// Wall-clock execution time in seconds
    pub runtime: f64,
    /// Rendered error, null on success
    pub error: Option<String>,
}

enum EngineOutput {
    Rows(Vec<ResultRow>),
    Affected(u64),
    Done,
}

/// A relational engine bound to one data directory
pub struct Engine {
    catalog: Catalog,
    store: IndexStore,
    catalog_path: PathBuf,
    last_access_paths: Vec<AccessPath>,
}

impl Engine {
    /// Open an engine over a data directory, creating it if empty.
    ///
    /// Reopens every index the catalog snapshot lists; a missing or corrupt
    /// index file fails the open with `StorageCorrupt`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let mut store = IndexStore::open(&data_dir)?;
        let catalog_path = data_dir.join("catalog.json");

        let catalog = if catalog_path.exists() {
            Catalog::load(&catalog_path)?
        } else {
            Catalog::new()
        };

        for table in catalog.tables() {
            let pk = table.primary_key_column();
            store.open_primary(table.name(), &pk.name, pk.data_type)?;
            for index in catalog.indexes_for(table.name()) {
                let column = table
                    .column(&index.column)
                    .expect("catalog indexes reference existing columns");
                store.open_secondary(&index.table, &index.column, column.data_type)?;
            }
        }

        info!(dir = %data_dir.display(), tables = catalog.table_names().len(), "engine opened");
        Ok(Self {
            catalog,
            store,
            catalog_path,
            last_access_paths: Vec::new(),
        })
    }

    /// Execute one statement. Never panics and never returns `Err`: every
    /// failure is rendered into the outcome's `error` field.
    pub fn execute(&mut self, text: &str) -> QueryOutcome {
        let started = Instant::now();
        let output = Parser::new(text)
            .and_then(|mut parser| parser.parse_single())
            .and_then(|stmt| self.run_statement(&stmt));
        Self::outcome(output, started)
    }

    /// Execute a sequence of semicolon-separated statements in order,
    /// reporting the last statement's result and the total runtime. The
    /// sequence stops at the first failure.
    pub fn execute_script(&mut self, text: &str) -> QueryOutcome {
        let started = Instant::now();
        let output = Parser::new(text)
            .and_then(|mut parser| parser.parse_all())
            .and_then(|stmts| {
                let mut last = EngineOutput::Done;
                for stmt in &stmts {
                    last = self.run_statement(stmt)?;
                }
                Ok(last)
            });
        Self::outcome(output, started)
    }

    fn outcome(output: Result<EngineOutput>, started: Instant) -> QueryOutcome {
        let runtime = started.elapsed().as_secs_f64();
        match output {
            Ok(EngineOutput::Rows(rows)) => QueryOutcome {
                result: Some(rows),
                rows_affected: None,
                runtime,
                error: None,
            },
            Ok(EngineOutput::Affected(count)) => QueryOutcome {
                result: None,
                rows_affected: Some(count),
                runtime,
                error: None,
            },
            Ok(EngineOutput::Done) => QueryOutcome {
                result: None,
                rows_affected: None,
                runtime,
                error: None,
            },
            Err(e) => QueryOutcome {
                result: None,
                rows_affected: None,
                runtime,
                error: Some(e.to_string()),
            },
        }
    }

    fn run_statement(&mut self, stmt: &Statement) -> Result<EngineOutput> {
        debug!(statement = %stmt, "executing");
        match stmt {
            Statement::CreateTable(_)
            | Statement::DropTable(_)
            | Statement::CreateIndex(_)
            | Statement::DropIndex(_) => {
                let mut ddl =
                    DdlManager::new(&mut self.catalog, &mut self.store, self.catalog_path.clone());
                ddl.execute(stmt)?;
                Ok(EngineOutput::Done)
            }
            _ => {
                let bound = Binder::new(&self.catalog, &self.store).bind(stmt)?;
                let mut executor = DmlExecutor::new(&self.catalog, &mut self.store);
                let result = executor.execute(&bound);
                self.last_access_paths = executor.into_access_paths();
                match result? {
                    StatementResult::Rows(rows) => Ok(EngineOutput::Rows(rows)),
                    StatementResult::Affected(count) => Ok(EngineOutput::Affected(count)),
                }
            }
        }
    }

    /// Debug hook: the access paths the most recent DML statement used, one
    /// per base table in binding order.
    pub fn last_access_paths(&self) -> &[AccessPath] {
        &self.last_access_paths
    }

    /// The catalog, for inspection
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
