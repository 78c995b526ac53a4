//! Query assembly: projection mapping, join-chain attachment, criteria
//! compilation, and sentinel remapping of results.

use tracing::debug;

use crate::criteria;
use crate::error::{Error, Result};
use crate::relation::{resolve_joins, Relation};
use crate::schema::Catalog;
use crate::storage::{ColumnRef, SelectPlan, UnitOfWork};
use crate::value::Value;

/// One matrix query: parallel column/table lists naming the projection,
/// plus optional criteria and join relations.
///
/// The column and table lists are positional twins: entry `i` of each names
/// one requested `(table, column)` pair, duplicates allowed. Pairs that do
/// not resolve to a real column come back as the sentinel text, at their
/// original position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Requested column names.
    pub columns: Vec<String>,
    /// Table of each requested column, same length as `columns`.
    pub tables: Vec<String>,
    /// Criterion matrix: row 0 names columns, following rows are
    /// OR-alternatives.
    pub criteria: Option<Vec<Vec<Value>>>,
    /// Table binding of each criterion column; defaults to the first
    /// projection table for every column.
    pub criteria_tables: Option<Vec<String>>,
    /// Join relations, applied as declared.
    pub relations: Vec<Relation>,
    /// Placeholder for unresolved projection pairs.
    pub sentinel: String,
}

impl QueryRequest {
    /// Creates a request over the given projection with no criteria,
    /// no relations, and the default `-` sentinel.
    pub fn new(columns: Vec<String>, tables: Vec<String>) -> Self {
        Self {
            columns,
            tables,
            criteria: None,
            criteria_tables: None,
            relations: Vec::new(),
            sentinel: "-".to_owned(),
        }
    }

    /// Attaches a criterion matrix.
    pub fn with_criteria(mut self, criteria: Vec<Vec<Value>>) -> Self {
        self.criteria = Some(criteria);
        self
    }

    /// Binds criterion columns to tables explicitly.
    pub fn with_criteria_tables(mut self, tables: Vec<String>) -> Self {
        self.criteria_tables = Some(tables);
        self
    }

    /// Attaches join relations.
    pub fn with_relations(mut self, relations: Vec<Relation>) -> Self {
        self.relations = relations;
        self
    }

    /// Overrides the sentinel for unresolved projection pairs.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }
}

/// Compiles and executes one query inside the given unit of work, returning
/// the result matrix in the caller's column order.
///
/// Every referenced table is validated before anything executes; rows come
/// back in the engine's natural order with no implicit ORDER BY.
pub fn run_query(
    catalog: &Catalog,
    uow: &mut dyn UnitOfWork,
    request: &QueryRequest,
) -> Result<Vec<Vec<Value>>> {
    if request.columns.len() != request.tables.len() {
        return Err(Error::Validation(format!(
            "{} columns paired with {} tables",
            request.columns.len(),
            request.tables.len()
        )));
    }
    if request.tables.is_empty() {
        return Err(Error::Validation("query names no columns".into()));
    }
    for table in &request.tables {
        if !catalog.has_table(table) {
            return Err(Error::UnknownTable(table.clone()));
        }
    }

    // Positional map: Some(index into the real projection) per requested
    // pair, None where the sentinel goes.
    let mut projection = Vec::new();
    let mut positions = Vec::with_capacity(request.columns.len());
    for (column, table) in request.columns.iter().zip(&request.tables) {
        if catalog.has_column(table, column) {
            positions.push(Some(projection.len()));
            projection.push(ColumnRef::new(table, column));
        } else {
            positions.push(None);
        }
    }
    if projection.is_empty() {
        return Err(Error::Validation(
            "no requested column resolved against the catalog".into(),
        ));
    }

    let joins = resolve_joins(catalog, &request.relations)?;

    let filter = match &request.criteria {
        Some(matrix) => {
            let default_bindings;
            let bindings = match &request.criteria_tables {
                Some(tables) => tables.as_slice(),
                None => {
                    let width = matrix.first().map_or(0, Vec::len);
                    default_bindings = vec![request.tables[0].clone(); width];
                    default_bindings.as_slice()
                }
            };
            criteria::compile(catalog, matrix, bindings)?
        }
        None => None,
    };

    let plan = SelectPlan {
        projection,
        joins,
        filter,
    };
    let rows = uow.select(&plan)?;
    debug!(
        columns = request.columns.len(),
        resolved = plan.projection.len(),
        rows = rows.len(),
        "query executed"
    );

    let sentinel = Value::Text(request.sentinel.clone());
    Ok(rows
        .into_iter()
        .map(|row| {
            positions
                .iter()
                .map(|position| match position {
                    Some(index) => row.get(*index).cloned().unwrap_or(Value::Null),
                    None => sentinel.clone(),
                })
                .collect()
        })
        .collect())
}
