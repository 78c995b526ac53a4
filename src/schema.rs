//! Table metadata: the schema registry boundary and the static catalog
//! built from it once at startup.
//!
//! The catalog replaces per-call dynamic model lookup: every table's column
//! specs, primary key, and pre-resolved logical types are materialized at
//! construction, the structure is immutable afterwards, and it is shared by
//! reference (`Arc`) between callers, so concurrent reads need no locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::LogicalType;

/// Metadata for a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Declared SQL type, e.g. `VARCHAR(50)` or `INTEGER`.
    pub logical_type: String,
    /// Column carries a uniqueness constraint.
    pub unique: bool,
    /// Column is the table's primary key.
    pub primary: bool,
    /// Column accepts NULL.
    pub nullable: bool,
    /// Primary key values are generated by the storage engine.
    pub autoincrement: bool,
}

/// Full table/column metadata: table name → column name → spec.
pub type TableStructure = BTreeMap<String, BTreeMap<String, ColumnSpec>>;

/// External collaborator that supplies table metadata and primary keys.
///
/// Implementations typically reflect a live database or a declarative model
/// layer; [`SchemaBuilder`] is the in-crate implementation for embedders
/// that declare tables programmatically.
pub trait SchemaRegistry {
    /// Returns the complete table structure.
    fn structure(&self) -> TableStructure;
    /// Returns the single primary-key column of `table`, if registered.
    fn primary_key(&self, table: &str) -> Option<String>;
}

/// Immutable, process-wide table metadata resolved once from a
/// [`SchemaRegistry`].
#[derive(Debug, Clone)]
pub struct Catalog {
    structure: TableStructure,
    primary_keys: BTreeMap<String, String>,
    types: BTreeMap<String, BTreeMap<String, LogicalType>>,
}

impl Catalog {
    /// Builds the catalog from a registry, validating the structural
    /// invariants up front: a non-empty structure and exactly one
    /// single-column primary key per table (composite keys unsupported).
    pub fn from_registry(registry: &dyn SchemaRegistry) -> Result<Self> {
        let structure = registry.structure();
        if structure.is_empty() {
            return Err(Error::Configuration(
                "schema registry returned an empty table structure".into(),
            ));
        }
        let mut primary_keys = BTreeMap::new();
        let mut types = BTreeMap::new();
        for (table, columns) in &structure {
            let pk = registry
                .primary_key(table)
                .ok_or_else(|| Error::MissingPrimaryKey(table.clone()))?;
            if !columns.contains_key(&pk) {
                return Err(Error::unknown_column(table.clone(), pk));
            }
            primary_keys.insert(table.clone(), pk);
            let resolved = columns
                .iter()
                .map(|(name, spec)| (name.clone(), LogicalType::from_declared(&spec.logical_type)))
                .collect();
            types.insert(table.clone(), resolved);
        }
        Ok(Self {
            structure,
            primary_keys,
            types,
        })
    }

    /// The full structure, for embedders that need raw metadata.
    pub fn structure(&self) -> &TableStructure {
        &self.structure
    }

    /// True when `table` exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.structure.contains_key(table)
    }

    /// True when `table.column` exists.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.structure
            .get(table)
            .is_some_and(|columns| columns.contains_key(column))
    }

    /// Column specs for `table`.
    pub fn table(&self, table: &str) -> Result<&BTreeMap<String, ColumnSpec>> {
        self.structure
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_owned()))
    }

    /// Spec for a single column.
    pub fn column(&self, table: &str, column: &str) -> Result<&ColumnSpec> {
        self.table(table)?
            .get(column)
            .ok_or_else(|| Error::unknown_column(table, column))
    }

    /// Primary-key column of `table`.
    pub fn primary_key(&self, table: &str) -> Result<&str> {
        if !self.has_table(table) {
            return Err(Error::UnknownTable(table.to_owned()));
        }
        self.primary_keys
            .get(table)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingPrimaryKey(table.to_owned()))
    }

    /// Pre-resolved logical type of `table.column`.
    pub fn logical_type(&self, table: &str, column: &str) -> Result<LogicalType> {
        self.types
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_owned()))?
            .get(column)
            .copied()
            .ok_or_else(|| Error::unknown_column(table, column))
    }

    /// Returns the structure restricted to `tables`, or the whole structure
    /// when no filter is given. Unknown names fail instead of being
    /// silently dropped.
    pub fn describe(&self, tables: Option<&[String]>) -> Result<TableStructure> {
        match tables {
            None => Ok(self.structure.clone()),
            Some(names) => {
                let mut subset = TableStructure::new();
                for name in names {
                    let columns = self.table(name)?;
                    subset.insert(name.clone(), columns.clone());
                }
                Ok(subset)
            }
        }
    }
}

/// Programmatic schema declaration.
///
/// Stands in for a reflective model layer: tests and embedders declare
/// tables fluently and build a [`Catalog`] from the result.
///
/// ```
/// use gridbase::schema::SchemaBuilder;
///
/// let catalog = SchemaBuilder::new()
///     .table("users")
///     .primary_key("id", "INTEGER")
///     .required("name", "VARCHAR(50)")
///     .column("age", "INTEGER")
///     .finish()
///     .build()?;
/// assert_eq!(catalog.primary_key("users")?, "id");
/// # Ok::<(), gridbase::Error>(())
/// ```
#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    structure: TableStructure,
    primary_keys: BTreeMap<String, String>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts declaring a table.
    pub fn table(self, name: impl Into<String>) -> TableBuilder {
        TableBuilder {
            parent: self,
            name: name.into(),
            columns: BTreeMap::new(),
            primary_key: None,
        }
    }

    /// Builds the immutable catalog.
    pub fn build(self) -> Result<Catalog> {
        Catalog::from_registry(&self)
    }
}

impl SchemaRegistry for SchemaBuilder {
    fn structure(&self) -> TableStructure {
        self.structure.clone()
    }

    fn primary_key(&self, table: &str) -> Option<String> {
        self.primary_keys.get(table).cloned()
    }
}

/// Column declarations for one table; created by [`SchemaBuilder::table`].
#[derive(Debug)]
pub struct TableBuilder {
    parent: SchemaBuilder,
    name: String,
    columns: BTreeMap<String, ColumnSpec>,
    primary_key: Option<String>,
}

impl TableBuilder {
    /// Declares the primary-key column. Integer-family keys are treated as
    /// engine-generated (autoincrement), mirroring the usual ORM default.
    pub fn primary_key(mut self, name: impl Into<String>, declared: impl Into<String>) -> Self {
        let name = name.into();
        let declared = declared.into();
        let autoincrement = LogicalType::from_declared(&declared) == LogicalType::Integer;
        self.primary_key = Some(name.clone());
        self.columns.insert(
            name,
            ColumnSpec {
                logical_type: declared,
                unique: false,
                primary: true,
                nullable: false,
                autoincrement,
            },
        );
        self
    }

    /// Declares a nullable column.
    pub fn column(mut self, name: impl Into<String>, declared: impl Into<String>) -> Self {
        self.columns.insert(
            name.into(),
            ColumnSpec {
                logical_type: declared.into(),
                unique: false,
                primary: false,
                nullable: true,
                autoincrement: false,
            },
        );
        self
    }

    /// Declares a NOT NULL column.
    pub fn required(mut self, name: impl Into<String>, declared: impl Into<String>) -> Self {
        self.columns.insert(
            name.into(),
            ColumnSpec {
                logical_type: declared.into(),
                unique: false,
                primary: false,
                nullable: false,
                autoincrement: false,
            },
        );
        self
    }

    /// Declares a NOT NULL column with a uniqueness constraint.
    pub fn unique(mut self, name: impl Into<String>, declared: impl Into<String>) -> Self {
        self.columns.insert(
            name.into(),
            ColumnSpec {
                logical_type: declared.into(),
                unique: true,
                primary: false,
                nullable: false,
                autoincrement: false,
            },
        );
        self
    }

    /// Finishes the table and returns to the schema builder.
    pub fn finish(self) -> SchemaBuilder {
        let mut parent = self.parent;
        if let Some(pk) = self.primary_key {
            parent.primary_keys.insert(self.name.clone(), pk);
        }
        parent.structure.insert(self.name, self.columns);
        parent
    }
}
