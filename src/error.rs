//! Error taxonomy shared across the crate.
//!
//! Schema and validation failures are the caller's fault and map to
//! 4xx-equivalent responses in an embedding service; storage failures are
//! system faults and map to 5xx. The split is exposed through
//! [`Error::kind`] so adapters can translate without matching every variant.

use thiserror::Error;

/// Convenience alias used by every fallible function in the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured errors produced by the tabular data layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Referenced table is absent from the catalog.
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    /// Referenced column is absent from its table.
    #[error("unknown column '{table}.{column}'")]
    UnknownColumn {
        /// Table the lookup ran against.
        table: String,
        /// Column that failed to resolve.
        column: String,
    },
    /// Table has no single-column primary key registered.
    #[error("table '{0}' has no primary key")]
    MissingPrimaryKey(String),
    /// Malformed matrix shape, bad header, invalid action code, empty id
    /// list. The message carries enough context (row index) to locate the
    /// offending input.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The layer itself was misconfigured (e.g. a logical type could not be
    /// resolved either directly or via the catalog).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Failure reported by the storage driver. Aborts the current unit of
    /// work and propagates unmodified; no automatic retry.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Coarse fault classification for adapter layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown table/column or missing primary key.
    Schema,
    /// Malformed caller input.
    Validation,
    /// Library misconfiguration.
    Configuration,
    /// Storage engine failure.
    Storage,
}

impl Error {
    /// Returns the fault family for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownTable(_) | Error::UnknownColumn { .. } | Error::MissingPrimaryKey(_) => {
                ErrorKind::Schema
            }
            Error::Validation(_) => ErrorKind::Validation,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True when the error is attributable to the caller's input rather
    /// than the system (the 4xx/5xx split).
    pub fn is_caller_fault(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Storage)
    }

    /// Builds an [`Error::UnknownColumn`] without repeating the struct
    /// literal at call sites.
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}
