//! QueryBackend trait definition.
//!
//! A backend turns a validated [`TemplateSide`] into concrete reads and
//! writes on a [`Connection`]. One implementation exists per
//! [`BackendKind`]; the engine selects it once per database at startup and
//! only talks to the trait afterwards.

use crate::connection::{Connection, ConnectionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use sync_core::{ChainError, CvChain, Row, SideOptions, TemplateSide, ValueError};

/// Backend implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Flat tables addressed by plain columns
    Generic,
    /// Node / relation / field-collection schema
    Structured,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Structured => f.write_str("structured"),
        }
    }
}

/// Global deletion policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Mark rows deleted, archived or unpublished
    #[default]
    Soft,
    /// Remove rows
    Hard,
}

/// What a delete removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// Only the leaf value
    #[default]
    Value,
    /// The whole containing entity
    Key,
}

/// Result of one backend write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    /// Some statements took effect, manual follow-up may be needed
    PartialSuccess,
    Failure,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

/// A single-column write: key chain and a one-entry value chain, both bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    pub side: &'a TemplateSide,
    pub key: CvChain,
    pub value: CvChain,
}

impl<'a> WriteRequest<'a> {
    pub fn new(side: &'a TemplateSide, key: CvChain, value: CvChain) -> Self {
        Self { side, key, value }
    }

    /// Check the one-entry value chain invariant of write operations.
    pub fn ensure_single_value(&self, operation: &str) -> Result<(), BackendError> {
        if self.value.len() == 1 {
            Ok(())
        } else {
            Err(BackendError::Invariant(format!(
                "{operation} called with {} value entries, expected exactly 1",
                self.value.len()
            )))
        }
    }
}

/// Error raised by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A read failed at the connection level
    #[error("Read failed: {0}")]
    Connection(#[from] ConnectionError),

    /// A value read from the database does not fit its data type
    #[error("Invalid value: {0}")]
    Value(#[from] ValueError),

    /// The side arguments do not fit this backend
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Side options are missing or not valid for this backend
    #[error("Invalid {backend} backend options: {message}")]
    Options {
        backend: BackendKind,
        message: String,
    },

    /// A caller broke an internal contract
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

impl BackendError {
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// Trait for reading and writing template sides.
///
/// # Errors
///
/// Write operations only return `Err` for [`BackendError::Invariant`]. Every
/// I/O failure or unresolvable data is logged and reported as
/// [`WriteOutcome::Failure`] so that the run continues with other columns.
/// Reads return `Err` on any failure; the caller stops its template loop.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Validate one template side and produce its typed arguments.
    ///
    /// Runs at startup, before any database I/O.
    fn prepare(
        &self,
        key: CvChain,
        value: CvChain,
        options: &SideOptions,
    ) -> Result<TemplateSide, BackendError>;

    /// Read all rows of a side, key columns first, grouped by key.
    async fn read(
        &self,
        conn: &mut dyn Connection,
        side: &TemplateSide,
    ) -> Result<Vec<Row>, BackendError>;

    /// Overwrite a value; falls back to `insert` when nothing was updated.
    async fn update(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError>;

    /// Add a value, creating missing containers where the backend can.
    async fn insert(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
    ) -> Result<WriteOutcome, BackendError>;

    /// Remove a value or its whole containing entity.
    async fn delete(
        &self,
        conn: &mut dyn Connection,
        request: &WriteRequest<'_>,
        scope: DeleteScope,
    ) -> Result<WriteOutcome, BackendError>;
}
