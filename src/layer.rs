//! The dependency-injected context object tying the layer together.
//!
//! A [`DataLayer`] owns a shared [`Catalog`] and a [`StorageDriver`] and
//! exposes the produced surface: `query`, `merge`, `delete`,
//! `apply_edit_matrix`, and `describe`. Each call runs inside its own unit
//! of work: commit on success, rollback on any error, nothing shared
//! between calls.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::merge;
use crate::protocol;
use crate::query::{run_query, QueryRequest};
use crate::schema::{Catalog, TableStructure};
use crate::storage::{with_unit_of_work, StorageDriver};
use crate::value::Value;

/// Entry point for the tabular data layer.
///
/// Constructed explicitly and shared by reference; there is no hidden
/// global state. Cloning is cheap (two `Arc`s).
#[derive(Clone)]
pub struct DataLayer {
    catalog: Arc<Catalog>,
    driver: Arc<dyn StorageDriver>,
}

impl DataLayer {
    /// Creates a layer over a catalog and a storage driver.
    pub fn new(catalog: Arc<Catalog>, driver: Arc<dyn StorageDriver>) -> Self {
        Self { catalog, driver }
    }

    /// The catalog this layer resolves against.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs a matrix query, returning rows in the requested column order
    /// with the sentinel in unresolved positions.
    pub fn query(&self, request: &QueryRequest) -> Result<Vec<Vec<Value>>> {
        with_unit_of_work(self.driver.as_ref(), |uow| {
            run_query(&self.catalog, uow, request)
        })
    }

    /// Upserts an action-free matrix into `table`, returning one primary
    /// key per data row in input order.
    pub fn merge(&self, table: &str, matrix: &[Vec<Value>]) -> Result<Vec<Value>> {
        with_unit_of_work(self.driver.as_ref(), |uow| {
            merge::merge(&self.catalog, uow, table, matrix)
        })
    }

    /// Deletes rows of `table` by primary key.
    pub fn delete(&self, table: &str, ids: &[Value]) -> Result<()> {
        with_unit_of_work(self.driver.as_ref(), |uow| {
            merge::delete(&self.catalog, uow, table, ids)
        })
    }

    /// Applies an `MD`-tagged edit matrix: deletes first, then upserts,
    /// returning one result per data row (`"D"`, the upserted key, or an
    /// empty string), positionally aligned with the input.
    ///
    /// The two phases run as two separate units of work; a failure in the
    /// upsert phase does not roll back deletes already committed.
    pub fn apply_edit_matrix(&self, table: &str, matrix: &[Vec<Value>]) -> Result<Vec<Value>> {
        let batch = protocol::split_edit_matrix(matrix)?;
        debug!(
            table,
            deletes = batch.delete_ids.len(),
            upserts = batch.upsert_matrix.len().saturating_sub(1),
            "edit matrix split"
        );
        if !batch.delete_ids.is_empty() {
            self.delete(table, &batch.delete_ids)?;
        }
        let merged_ids = if batch.has_upserts() {
            self.merge(table, &batch.upsert_matrix)?
        } else {
            Vec::new()
        };
        protocol::assemble_results(&batch.actions, merged_ids)
    }

    /// Returns the table structure, restricted to `tables` when given.
    pub fn describe(&self, tables: Option<&[String]>) -> Result<TableStructure> {
        self.catalog.describe(tables)
    }
}
