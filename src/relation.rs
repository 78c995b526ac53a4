//! Declared join relations and their resolution into an ordered join chain.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Catalog;
use crate::storage::{ColumnRef, JoinKind, JoinStep};
use crate::value::Value;

/// Join flavor of a declared relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Inner join.
    Inner,
    /// Left outer join anchored on `table_a`.
    Left,
    /// Right outer join, modeled as a left outer join with swapped
    /// operands. Downstream column positions depend on this exact
    /// rewriting, so it is part of the contract.
    Right,
}

impl JoinType {
    /// Parses a join keyword, case-insensitively.
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            other => Err(Error::Validation(format!(
                "join type '{other}' must be 'inner', 'left', or 'right'"
            ))),
        }
    }
}

/// An edge between two tables on named columns, supplied per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Left-hand table.
    pub table_a: String,
    /// Right-hand table.
    pub table_b: String,
    /// Join column on `table_a`.
    pub column_a: String,
    /// Join column on `table_b`.
    pub column_b: String,
    /// Join flavor.
    pub join_type: JoinType,
}

impl Relation {
    /// Creates a relation.
    pub fn new(
        table_a: impl Into<String>,
        table_b: impl Into<String>,
        column_a: impl Into<String>,
        column_b: impl Into<String>,
        join_type: JoinType,
    ) -> Self {
        Self {
            table_a: table_a.into(),
            table_b: table_b.into(),
            column_a: column_a.into(),
            column_b: column_b.into(),
            join_type,
        }
    }

    /// Parses a relation from a matrix row of 4 or 5 text cells:
    /// `[table_a, table_b, column_a, column_b, join_type?]`, with the join
    /// type defaulting to `inner`.
    pub fn from_row(row: &[Value]) -> Result<Self> {
        if row.len() != 4 && row.len() != 5 {
            return Err(Error::Validation(format!(
                "relation row needs 4 or 5 cells, got {}",
                row.len()
            )));
        }
        let mut cells = Vec::with_capacity(row.len());
        for cell in row {
            let Value::Text(text) = cell else {
                return Err(Error::Validation(
                    "relation row cells must be text".into(),
                ));
            };
            cells.push(text.clone());
        }
        let join_type = match cells.get(4) {
            Some(kind) => JoinType::parse(kind)?,
            None => JoinType::Inner,
        };
        Ok(Self {
            table_a: cells[0].clone(),
            table_b: cells[1].clone(),
            column_a: cells[2].clone(),
            column_b: cells[3].clone(),
            join_type,
        })
    }
}

/// Expands declared relations into the join chain handed to the driver.
///
/// Relations are applied in reverse declaration order so chained joins
/// compose regardless of dependency direction; every referenced table and
/// column is validated before any query executes.
pub fn resolve_joins(catalog: &Catalog, relations: &[Relation]) -> Result<Vec<JoinStep>> {
    let mut steps = Vec::with_capacity(relations.len());
    for relation in relations.iter().rev() {
        catalog.column(&relation.table_a, &relation.column_a)?;
        catalog.column(&relation.table_b, &relation.column_b)?;
        let a = ColumnRef::new(&relation.table_a, &relation.column_a);
        let b = ColumnRef::new(&relation.table_b, &relation.column_b);
        let step = match relation.join_type {
            JoinType::Inner => JoinStep {
                kind: JoinKind::Inner,
                left: a,
                right: b,
            },
            JoinType::Left => JoinStep {
                kind: JoinKind::LeftOuter,
                left: a,
                right: b,
            },
            JoinType::Right => JoinStep {
                kind: JoinKind::LeftOuter,
                left: b,
                right: a,
            },
        };
        steps.push(step);
    }
    Ok(steps)
}
