//! In-memory reference implementation of the storage driver.
//!
//! Gives the layer executable semantics without an external engine: tables
//! live in a shared map guarded by a `parking_lot` lock, and each unit of
//! work operates on a snapshot that replaces the shared state on commit and
//! is dropped on rollback. Commits are last-write-wins between concurrent
//! units of work; the driver is a reference engine and test substrate, not
//! a production store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::Catalog;
use crate::storage::{JoinKind, JoinStep, RowPatch, SelectPlan, StorageDriver, UnitOfWork};
use crate::value::Value;

type Row = BTreeMap<String, Value>;
/// Table name → row bound during join execution.
type JoinedRow = BTreeMap<String, Row>;

#[derive(Debug, Clone)]
struct TableData {
    rows: Vec<Row>,
    next_id: i64,
}

impl Default for TableData {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
        }
    }
}

/// Shared in-memory table store.
pub struct MemoryStorage {
    tables: Arc<RwLock<HashMap<String, TableData>>>,
}

impl MemoryStorage {
    /// Creates an empty store with one table per catalog entry.
    pub fn new(catalog: &Catalog) -> Self {
        let tables = catalog
            .structure()
            .keys()
            .map(|table| (table.clone(), TableData::default()))
            .collect();
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }
}

impl StorageDriver for MemoryStorage {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        let working = self.tables.read().clone();
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.tables),
            working,
        }))
    }
}

struct MemoryUnitOfWork {
    shared: Arc<RwLock<HashMap<String, TableData>>>,
    working: HashMap<String, TableData>,
}

impl MemoryUnitOfWork {
    fn table(&self, name: &str) -> Result<&TableData> {
        self.working
            .get(name)
            .ok_or_else(|| Error::Storage(format!("no such table '{name}'")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.working
            .get_mut(name)
            .ok_or_else(|| Error::Storage(format!("no such table '{name}'")))
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn select(&mut self, plan: &SelectPlan) -> Result<Vec<Vec<Value>>> {
        if plan.projection.is_empty() {
            return Ok(Vec::new());
        }
        let mut needed: Vec<&str> = Vec::new();
        for column in &plan.projection {
            if !needed.contains(&column.table.as_str()) {
                needed.push(&column.table);
            }
        }
        let base = needed[0];
        let mut joined: Vec<JoinedRow> = self
            .table(base)?
            .rows
            .iter()
            .map(|row| singleton(base, row.clone()))
            .collect();
        let mut bound: HashSet<String> = HashSet::new();
        bound.insert(base.to_owned());

        // Steps whose operands are not bound yet are deferred, so a chain
        // composes no matter which direction the caller declared it in.
        let mut pending: Vec<JoinStep> = plan.joins.clone();
        while let Some(position) = pending
            .iter()
            .position(|s| bound.contains(&s.left.table) || bound.contains(&s.right.table))
        {
            let step = pending.remove(position);
            joined = apply_join(&self.working, joined, &mut bound, &step)?;
        }
        while !pending.is_empty() {
            let step = pending.remove(0);
            joined = cross_join(&self.working, joined, &mut bound, &step.left.table)?;
            joined = apply_join(&self.working, joined, &mut bound, &step)?;
        }
        for table in needed {
            if !bound.contains(table) {
                joined = cross_join(&self.working, joined, &mut bound, table)?;
            }
        }

        if let Some(filter) = &plan.filter {
            joined.retain(|row| {
                filter.matches(&|table: &str, column: &str| {
                    row.get(table)
                        .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
                })
            });
        }

        Ok(joined
            .iter()
            .map(|row| {
                plan.projection
                    .iter()
                    .map(|column| {
                        row.get(&column.table)
                            .and_then(|r| r.get(&column.column))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .collect())
    }

    fn select_column(&mut self, table: &str, column: &str) -> Result<Vec<Value>> {
        Ok(self
            .table(table)?
            .rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
            .collect())
    }

    fn select_where_in(
        &mut self,
        table: &str,
        columns: &[String],
        pk_column: &str,
        ids: &[Value],
    ) -> Result<Vec<Vec<Value>>> {
        let wanted: HashSet<&Value> = ids.iter().collect();
        Ok(self
            .table(table)?
            .rows
            .iter()
            .filter(|row| row.get(pk_column).is_some_and(|id| wanted.contains(id)))
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }

    fn insert_many(
        &mut self,
        table: &str,
        rows: &[RowPatch],
        pk_column: &str,
    ) -> Result<Vec<Value>> {
        let data = self.table_mut(table)?;
        let mut keys = Vec::with_capacity(rows.len());
        for patch in rows {
            let mut row: Row = patch.clone();
            let provided = row.get(pk_column).filter(|v| !v.is_null()).cloned();
            let id = match provided {
                Some(id) => {
                    if let Value::Int(i) = id {
                        data.next_id = data.next_id.max(i + 1);
                    }
                    id
                }
                None => {
                    let id = Value::Int(data.next_id);
                    data.next_id += 1;
                    row.insert(pk_column.to_owned(), id.clone());
                    id
                }
            };
            data.rows.push(row);
            keys.push(id);
        }
        debug!(table, inserted = keys.len(), "memory insert batch");
        Ok(keys)
    }

    fn update_many(&mut self, table: &str, patches: &[RowPatch], pk_column: &str) -> Result<()> {
        let data = self.table_mut(table)?;
        for patch in patches {
            let id = patch
                .get(pk_column)
                .cloned()
                .ok_or_else(|| Error::Storage("update patch missing its primary key".into()))?;
            let row = data
                .rows
                .iter_mut()
                .find(|row| row.get(pk_column).is_some_and(|v| v.loosely_equals(&id)))
                .ok_or_else(|| Error::Storage(format!("no row with key {id} in '{table}'")))?;
            for (column, value) in patch {
                if column != pk_column {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        debug!(table, updated = patches.len(), "memory update batch");
        Ok(())
    }

    fn delete_where_in(&mut self, table: &str, pk_column: &str, ids: &[Value]) -> Result<usize> {
        let doomed: HashSet<&Value> = ids.iter().collect();
        let data = self.table_mut(table)?;
        let before = data.rows.len();
        data.rows
            .retain(|row| !row.get(pk_column).is_some_and(|id| doomed.contains(id)));
        let removed = before - data.rows.len();
        debug!(table, removed, "memory delete batch");
        Ok(removed)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        *self.shared.write() = self.working;
        debug!("memory unit of work committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        debug!("memory unit of work rolled back");
        Ok(())
    }
}

fn singleton(table: &str, row: Row) -> JoinedRow {
    let mut joined = JoinedRow::new();
    joined.insert(table.to_owned(), row);
    joined
}

fn joined_cell(joined: &JoinedRow, table: &str, column: &str) -> Value {
    joined
        .get(table)
        .and_then(|row| row.get(column))
        .cloned()
        .unwrap_or(Value::Null)
}

/// NULLs never join.
fn join_matches(a: &Value, b: &Value) -> bool {
    !a.is_null() && !b.is_null() && a.loosely_equals(b)
}

fn apply_join(
    tables: &HashMap<String, TableData>,
    joined: Vec<JoinedRow>,
    bound: &mut HashSet<String>,
    step: &JoinStep,
) -> Result<Vec<JoinedRow>> {
    let left_bound = bound.contains(&step.left.table);
    let right_bound = bound.contains(&step.right.table);

    // Both sides already in the working set: the condition degenerates to a
    // row filter.
    if left_bound && right_bound {
        let filtered = joined
            .into_iter()
            .filter(|row| {
                join_matches(
                    &joined_cell(row, &step.left.table, &step.left.column),
                    &joined_cell(row, &step.right.table, &step.right.column),
                )
            })
            .collect();
        return Ok(filtered);
    }

    if left_bound {
        // Attach the right table; outer steps preserve the bound left side.
        let other = lookup_table(tables, &step.right.table)?;
        let mut out = Vec::new();
        for row in joined {
            let anchor = joined_cell(&row, &step.left.table, &step.left.column);
            let mut matched = false;
            for candidate in &other.rows {
                let value = candidate.get(&step.right.column).cloned().unwrap_or(Value::Null);
                if join_matches(&anchor, &value) {
                    let mut combined = row.clone();
                    combined.insert(step.right.table.clone(), candidate.clone());
                    out.push(combined);
                    matched = true;
                }
            }
            if !matched && step.kind == JoinKind::LeftOuter {
                out.push(row);
            }
        }
        bound.insert(step.right.table.clone());
        return Ok(out);
    }

    // Only the right side is bound. The incoming left table is the
    // preserved operand of an outer step, so it drives the output.
    let newcomers = lookup_table(tables, &step.left.table)?;
    let mut out = Vec::new();
    match step.kind {
        JoinKind::Inner => {
            for row in &joined {
                let anchor = joined_cell(row, &step.right.table, &step.right.column);
                for candidate in &newcomers.rows {
                    let value = candidate.get(&step.left.column).cloned().unwrap_or(Value::Null);
                    if join_matches(&anchor, &value) {
                        let mut combined = row.clone();
                        combined.insert(step.left.table.clone(), candidate.clone());
                        out.push(combined);
                    }
                }
            }
        }
        JoinKind::LeftOuter => {
            for candidate in &newcomers.rows {
                let value = candidate.get(&step.left.column).cloned().unwrap_or(Value::Null);
                let mut matched = false;
                for row in &joined {
                    let anchor = joined_cell(row, &step.right.table, &step.right.column);
                    if join_matches(&value, &anchor) {
                        let mut combined = row.clone();
                        combined.insert(step.left.table.clone(), candidate.clone());
                        out.push(combined);
                        matched = true;
                    }
                }
                if !matched {
                    out.push(singleton(&step.left.table, candidate.clone()));
                }
            }
        }
    }
    bound.insert(step.left.table.clone());
    Ok(out)
}

fn cross_join(
    tables: &HashMap<String, TableData>,
    joined: Vec<JoinedRow>,
    bound: &mut HashSet<String>,
    table: &str,
) -> Result<Vec<JoinedRow>> {
    let other = lookup_table(tables, table)?;
    let mut out = Vec::with_capacity(joined.len() * other.rows.len().max(1));
    for row in &joined {
        for candidate in &other.rows {
            let mut combined = row.clone();
            combined.insert(table.to_owned(), candidate.clone());
            out.push(combined);
        }
    }
    bound.insert(table.to_owned());
    Ok(out)
}

fn lookup_table<'a>(
    tables: &'a HashMap<String, TableData>,
    name: &str,
) -> Result<&'a TableData> {
    tables
        .get(name)
        .ok_or_else(|| Error::Storage(format!("no such table '{name}'")))
}
