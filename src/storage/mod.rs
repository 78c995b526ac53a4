//! Storage driver boundary: the minimal select/insert/update/delete surface
//! the engines consume, plus the unit-of-work scoping primitive.
//!
//! Every engine call acquires one unit of work on entry and releases it on
//! exit: commit on success, rollback on any error, never shared across
//! calls. Drivers own the actual transaction/session lifecycle.

pub mod memory;

use std::collections::BTreeMap;

use tracing::warn;

use crate::criteria::Predicate;
use crate::error::Result;
use crate::value::Value;

pub use memory::MemoryStorage;

/// A `(table, column)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Creates a column reference.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Join flavor of a resolved step. `right` relations are already rewritten
/// into a left outer join with swapped operands by the relation resolver,
/// so drivers only see these two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Inner join.
    Inner,
    /// Left outer join preserving the left operand.
    LeftOuter,
}

/// One resolved join clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    /// Join flavor.
    pub kind: JoinKind,
    /// Preserved/left operand.
    pub left: ColumnRef,
    /// Right operand.
    pub right: ColumnRef,
}

/// Executable query: projection, join chain, and optional filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    /// Projected columns, in output order. Duplicates allowed.
    pub projection: Vec<ColumnRef>,
    /// Join steps, in application order.
    pub joins: Vec<JoinStep>,
    /// Compiled predicate tree, if any.
    pub filter: Option<Predicate>,
}

/// Column → value assignments for one row of an insert or update.
pub type RowPatch = BTreeMap<String, Value>;

/// Handle for acquiring scoped units of work against a storage engine.
pub trait StorageDriver: Send + Sync {
    /// Opens a new unit of work. Each engine call holds exactly one.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;
}

/// One transactional scope over the storage engine.
///
/// Rows travel as `Vec<Value>` in the column order the call names; patches
/// travel as [`RowPatch`] maps. Any error aborts the scope via
/// [`UnitOfWork::rollback`] and propagates unmodified.
pub trait UnitOfWork {
    /// Executes a select plan, returning rows in the projection's column
    /// order and the engine's natural row order.
    fn select(&mut self, plan: &SelectPlan) -> Result<Vec<Vec<Value>>>;

    /// Returns every value of one column, in the engine's natural order.
    fn select_column(&mut self, table: &str, column: &str) -> Result<Vec<Value>>;

    /// Returns `columns` for rows whose `pk_column` value is in `ids`.
    fn select_where_in(
        &mut self,
        table: &str,
        columns: &[String],
        pk_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Vec<Value>>>;

    /// Inserts `rows`, returning the primary-key value of each inserted row
    /// in submission order (generated for autoincrement keys, echoed
    /// otherwise).
    fn insert_many(&mut self, table: &str, rows: &[RowPatch], pk_column: &str)
        -> Result<Vec<Value>>;

    /// Applies partial updates; each patch carries its `pk_column` value
    /// plus the fields to overwrite.
    fn update_many(&mut self, table: &str, patches: &[RowPatch], pk_column: &str) -> Result<()>;

    /// Deletes rows whose `pk_column` value is in `ids`, returning the
    /// number removed.
    fn delete_where_in(&mut self, table: &str, pk_column: &str, ids: &[Value]) -> Result<usize>;

    /// Makes the scope's writes durable.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the scope's writes.
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Acquire a unit of work, run `body`, commit on success, roll back on any
/// error, always release.
pub fn with_unit_of_work<T, F>(driver: &dyn StorageDriver, body: F) -> Result<T>
where
    F: FnOnce(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut uow = driver.begin()?;
    match body(uow.as_mut()) {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback() {
                warn!(error = %rollback_err, "rollback failed while unwinding");
            }
            Err(err)
        }
    }
}
