//! Diff-based batch merge (upsert) and batch delete engines.
//!
//! The merge contract: row 0 of the matrix is the header and must start
//! with the table's primary-key column; every following row upserts one
//! record, with `0`/absent keys meaning "new". Existing rows are diffed
//! field by field against storage and only changed fields are written.
//! All physical operations are bounded: id pages hold at most
//! [`MAX_BATCH_ASSIGNMENTS`] keys, and insert/update batches at most that
//! many total field-assignments, which keeps every statement under engine
//! parameter-count ceilings.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::Catalog;
use crate::storage::{RowPatch, UnitOfWork};
use crate::value::{coerce, Value};

/// Maximum keys per id page and field-assignments per physical write.
pub const MAX_BATCH_ASSIGNMENTS: usize = 900;

/// Where each input row ended up after partitioning.
enum Origin {
    /// Primary key already present; carries that key.
    Existing(Value),
    /// Not found in storage; key comes from the insert phase.
    New,
}

/// Groups row patches so no batch exceeds the assignment bound. A patch
/// larger than the bound still becomes its own batch rather than being
/// split mid-row.
struct AssignmentBatcher {
    batches: Vec<Vec<RowPatch>>,
    current_assignments: usize,
}

impl AssignmentBatcher {
    fn new() -> Self {
        Self {
            batches: Vec::new(),
            current_assignments: 0,
        }
    }

    fn push(&mut self, patch: RowPatch) {
        let assignments = patch.len();
        let overflow = self.current_assignments + assignments > MAX_BATCH_ASSIGNMENTS;
        if self.batches.is_empty() || overflow {
            self.batches.push(Vec::new());
            self.current_assignments = 0;
        }
        self.current_assignments += assignments;
        if let Some(batch) = self.batches.last_mut() {
            batch.push(patch);
        }
    }

    fn into_batches(self) -> Vec<Vec<RowPatch>> {
        self.batches
    }
}

/// Reconciles `matrix` against the current contents of `table`, returning
/// one primary-key value per data row, in input order.
///
/// Rows whose stored values already match the incoming values are skipped
/// entirely; no write occurs for them.
pub fn merge(
    catalog: &Catalog,
    uow: &mut dyn UnitOfWork,
    table: &str,
    matrix: &[Vec<Value>],
) -> Result<Vec<Value>> {
    let specs = catalog.table(table)?;
    let pk_column = catalog.primary_key(table)?.to_owned();
    let autoincrement = catalog.column(table, &pk_column)?.autoincrement;

    let Some(header) = matrix.first() else {
        return Err(Error::Validation("merge matrix is empty".into()));
    };
    match header.first() {
        Some(Value::Text(first)) if *first == pk_column => {}
        _ => {
            return Err(Error::Validation(format!(
                "first matrix column must be the primary key '{pk_column}'"
            )))
        }
    }

    // Accepted columns: header entries present in the table, in header
    // order, paired with their positions in the incoming rows.
    let mut accepted: Vec<(usize, String)> = Vec::new();
    for (position, cell) in header.iter().enumerate() {
        if let Value::Text(name) = cell {
            if specs.contains_key(name) {
                accepted.push((position, name.clone()));
            }
        }
    }
    let columns: Vec<String> = accepted.iter().map(|(_, name)| name.clone()).collect();

    let mut coerced_rows: Vec<Vec<Value>> = Vec::with_capacity(matrix.len().saturating_sub(1));
    for (row_index, row) in matrix.iter().enumerate().skip(1) {
        if row.len() != header.len() {
            return Err(Error::Validation(format!(
                "matrix row {row_index} has {} cells, header has {}",
                row.len(),
                header.len()
            )));
        }
        let coerced = accepted
            .iter()
            .map(|(position, name)| {
                let ty = catalog.logical_type(table, name)?;
                Ok(coerce(row[*position].clone(), ty))
            })
            .collect::<Result<Vec<Value>>>()?;
        coerced_rows.push(coerced);
    }
    if coerced_rows.is_empty() {
        return Ok(Vec::new());
    }

    // Partition against a full key scan, preserving input order.
    let known: HashSet<Value> = uow.select_column(table, &pk_column)?.into_iter().collect();
    let mut origins = Vec::with_capacity(coerced_rows.len());
    let mut existing_rows = Vec::new();
    let mut new_rows = Vec::new();
    for row in coerced_rows {
        let id = row[0].clone();
        if known.contains(&id) {
            origins.push(Origin::Existing(id));
            existing_rows.push(row);
        } else {
            origins.push(Origin::New);
            new_rows.push(row);
        }
    }
    debug!(
        table,
        existing = existing_rows.len(),
        new = new_rows.len(),
        "merge partition"
    );

    if !existing_rows.is_empty() {
        update_existing(uow, table, &pk_column, &columns, &existing_rows)?;
    }

    let mut generated = VecDeque::new();
    if !new_rows.is_empty() {
        let mut batcher = AssignmentBatcher::new();
        for row in &new_rows {
            let mut patch = RowPatch::new();
            for (name, value) in columns.iter().zip(row) {
                if autoincrement && name == &pk_column {
                    continue;
                }
                patch.insert(name.clone(), value.clone());
            }
            batcher.push(patch);
        }
        let batches = batcher.into_batches();
        debug!(table, batches = batches.len(), "merge insert batches");
        for batch in &batches {
            generated.extend(uow.insert_many(table, batch, &pk_column)?);
        }
    }

    origins
        .into_iter()
        .map(|origin| match origin {
            Origin::Existing(id) => Ok(id),
            Origin::New => generated
                .pop_front()
                .ok_or_else(|| Error::Storage("insert returned fewer keys than rows".into())),
        })
        .collect()
}

fn update_existing(
    uow: &mut dyn UnitOfWork,
    table: &str,
    pk_column: &str,
    columns: &[String],
    existing_rows: &[Vec<Value>],
) -> Result<()> {
    // Fetch current values in bounded pages, keyed by primary key; result
    // order is the engine's to choose.
    let ids: Vec<Value> = existing_rows.iter().map(|row| row[0].clone()).collect();
    let mut current: HashMap<Value, Vec<Value>> = HashMap::with_capacity(ids.len());
    for page in ids.chunks(MAX_BATCH_ASSIGNMENTS) {
        for row in uow.select_where_in(table, columns, pk_column, page)? {
            current.insert(row[0].clone(), row);
        }
    }

    let mut batcher = AssignmentBatcher::new();
    let mut unchanged = 0usize;
    for row in existing_rows {
        let id = &row[0];
        let stored = current
            .get(id)
            .ok_or_else(|| Error::Storage(format!("row with key {id} vanished during merge")))?;
        let mut patch = RowPatch::new();
        patch.insert(pk_column.to_owned(), id.clone());
        for (index, column) in columns.iter().enumerate().skip(1) {
            if row[index] != stored[index] {
                patch.insert(column.clone(), row[index].clone());
            }
        }
        if patch.len() > 1 {
            batcher.push(patch);
        } else {
            unchanged += 1;
        }
    }

    let batches = batcher.into_batches();
    debug!(
        table,
        batches = batches.len(),
        unchanged,
        "merge update batches"
    );
    for batch in &batches {
        uow.update_many(table, batch, pk_column)?;
    }
    Ok(())
}

/// Deletes the rows of `table` whose primary key is in `ids`, in pages of
/// at most [`MAX_BATCH_ASSIGNMENTS`] keys per statement.
pub fn delete(
    catalog: &Catalog,
    uow: &mut dyn UnitOfWork,
    table: &str,
    ids: &[Value],
) -> Result<()> {
    let pk_column = catalog.primary_key(table)?.to_owned();
    if ids.is_empty() {
        return Err(Error::Validation("delete id list is empty".into()));
    }
    let ty = catalog.logical_type(table, &pk_column)?;
    let coerced: Vec<Value> = ids.iter().map(|id| coerce(id.clone(), ty)).collect();
    for page in coerced.chunks(MAX_BATCH_ASSIGNMENTS) {
        let removed = uow.delete_where_in(table, &pk_column, page)?;
        debug!(table, removed, page = page.len(), "delete page");
    }
    Ok(())
}
