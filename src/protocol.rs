//! The outward-facing bulk-edit contract: an edit matrix whose trailing
//! `MD` column tags each row with an action code.
//!
//! `A` upserts the row, `D` deletes it by its primary-key cell, an empty
//! code is a no-op. The adapter splits the matrix into a delete list and an
//! upsert sub-matrix, and reassembles the engines' outputs into one result
//! list positionally aligned with the input.

use crate::error::{Error, Result};
use crate::value::Value;

/// Name of the mandatory trailing action-code column.
pub const ACTION_COLUMN: &str = "MD";

/// Per-row action parsed from the `MD` cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `A`: insert or update the row.
    Upsert,
    /// `D`: delete the row by its primary-key cell.
    Delete,
    /// Empty cell: leave the row alone.
    None,
}

impl Action {
    /// Parses an action cell, case-insensitively, trimming whitespace.
    /// `row_index` feeds the error message.
    fn parse(cell: &Value, row_index: usize) -> Result<Self> {
        let code = match cell {
            Value::Null => String::new(),
            Value::Text(text) => text.trim().to_ascii_uppercase(),
            other => other.to_string(),
        };
        match code.as_str() {
            "A" => Ok(Action::Upsert),
            "D" => Ok(Action::Delete),
            "" => Ok(Action::None),
            other => Err(Error::Validation(format!(
                "row {row_index}: action code '{other}' must be 'A', 'D', or empty"
            ))),
        }
    }
}

/// An edit matrix split into its two engine inputs, plus the per-row action
/// tags needed to reassemble results.
#[derive(Debug, Clone, PartialEq)]
pub struct EditBatch {
    /// Action of each data row, in input order.
    pub actions: Vec<Action>,
    /// Primary-key cells of the `D` rows.
    pub delete_ids: Vec<Value>,
    /// Upsert sub-matrix (header without the `MD` column, then the `A`
    /// rows); empty when no row is tagged `A`.
    pub upsert_matrix: Vec<Vec<Value>>,
}

impl EditBatch {
    /// True when no row asked for an upsert.
    pub fn has_upserts(&self) -> bool {
        self.upsert_matrix.len() > 1
    }
}

/// Validates and splits an edit matrix.
///
/// The header's last cell must be literally `MD`; every data row must match
/// the header's width and carry a valid action code in its last cell.
pub fn split_edit_matrix(matrix: &[Vec<Value>]) -> Result<EditBatch> {
    let Some(header) = matrix.first() else {
        return Err(Error::Validation("edit matrix is empty".into()));
    };
    match header.last() {
        Some(Value::Text(name)) if name == ACTION_COLUMN => {}
        _ => {
            return Err(Error::Validation(format!(
                "last header column must be '{ACTION_COLUMN}'"
            )))
        }
    }
    if header.len() < 2 {
        return Err(Error::Validation(
            "edit matrix header names no data columns".into(),
        ));
    }

    let upsert_header: Vec<Value> = header[..header.len() - 1].to_vec();
    let mut actions = Vec::with_capacity(matrix.len() - 1);
    let mut delete_ids = Vec::new();
    let mut upsert_rows = Vec::new();
    for (row_index, row) in matrix.iter().enumerate().skip(1) {
        if row.len() != header.len() {
            return Err(Error::Validation(format!(
                "row {row_index} has {} cells, header has {}",
                row.len(),
                header.len()
            )));
        }
        let action = Action::parse(&row[row.len() - 1], row_index)?;
        match action {
            Action::Delete => delete_ids.push(row[0].clone()),
            Action::Upsert => upsert_rows.push(row[..row.len() - 1].to_vec()),
            Action::None => {}
        }
        actions.push(action);
    }

    let upsert_matrix = if upsert_rows.is_empty() {
        Vec::new()
    } else {
        let mut m = Vec::with_capacity(upsert_rows.len() + 1);
        m.push(upsert_header);
        m.extend(upsert_rows);
        m
    };
    Ok(EditBatch {
        actions,
        delete_ids,
        upsert_matrix,
    })
}

/// Reassembles the result list from the action tags and the merge engine's
/// ids: `D` rows emit the literal `"D"`, no-op rows an empty string, `A`
/// rows consume the merged ids first-in-first-out.
pub fn assemble_results(actions: &[Action], merged_ids: Vec<Value>) -> Result<Vec<Value>> {
    let mut remaining = merged_ids.into_iter();
    let results = actions
        .iter()
        .map(|action| match action {
            Action::Delete => Ok(Value::Text("D".into())),
            Action::None => Ok(Value::Text(String::new())),
            Action::Upsert => remaining
                .next()
                .ok_or_else(|| Error::Storage("merge returned fewer ids than upsert rows".into())),
        })
        .collect::<Result<Vec<Value>>>()?;
    Ok(results)
}
