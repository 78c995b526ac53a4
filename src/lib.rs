//! Schema-driven tabular data layer.
//!
//! Callers describe tables, columns, join relations, and row-level filter
//! criteria as plain matrices (arrays of arrays) instead of a query
//! language; the layer compiles them into relational operations and
//! returns matrices. A spreadsheet-style bulk-edit protocol reconciles an
//! action-tagged matrix against storage with field-level diffs and bounded
//! write batches.
//!
//! ```
//! use std::sync::Arc;
//! use gridbase::{DataLayer, MemoryStorage, QueryRequest, SchemaBuilder, Value};
//!
//! let catalog = Arc::new(
//!     SchemaBuilder::new()
//!         .table("users")
//!         .primary_key("id", "INTEGER")
//!         .required("name", "VARCHAR(50)")
//!         .column("age", "INTEGER")
//!         .finish()
//!         .build()?,
//! );
//! let driver = Arc::new(MemoryStorage::new(&catalog));
//! let layer = DataLayer::new(catalog, driver);
//!
//! layer.merge(
//!     "users",
//!     &[
//!         vec!["id".into(), "name".into(), "age".into()],
//!         vec![Value::Int(0), "Ana".into(), Value::Int(31)],
//!     ],
//! )?;
//!
//! let request = QueryRequest::new(
//!     vec!["name".into()],
//!     vec!["users".into()],
//! )
//! .with_criteria(vec![vec!["age".into()], vec![">=30".into()]]);
//! let rows = layer.query(&request)?;
//! assert_eq!(rows, vec![vec![Value::Text("Ana".into())]]);
//! # Ok::<(), gridbase::Error>(())
//! ```

#![warn(missing_docs)]

pub mod criteria;
pub mod error;
pub mod layer;
pub mod merge;
pub mod protocol;
pub mod query;
pub mod relation;
pub mod schema;
pub mod storage;
pub mod value;

pub use error::{Error, ErrorKind, Result};
pub use layer::DataLayer;
pub use merge::MAX_BATCH_ASSIGNMENTS;
pub use query::QueryRequest;
pub use relation::{JoinType, Relation};
pub use schema::{Catalog, ColumnSpec, SchemaBuilder, SchemaRegistry, TableStructure};
pub use storage::{
    ColumnRef, JoinKind, JoinStep, MemoryStorage, RowPatch, SelectPlan, StorageDriver, UnitOfWork,
};
pub use value::{coerce, format_value, LogicalType, Value};
