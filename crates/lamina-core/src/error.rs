//! Error types for Lamina.
//!
//! A single unified error type covers every public operation. Error codes
//! follow the pattern `LAMINA-XXX` for easy debugging and log correlation.

use thiserror::Error;

/// Result type alias for Lamina operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Lamina operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
#[derive(Error, Debug)]
pub enum Error {
    /// A column with this name already exists with a different kind (LAMINA-001).
    #[error("[LAMINA-001] Schema conflict on column '{0}'")]
    SchemaConflict(String),

    /// Column not found (LAMINA-002).
    #[error("[LAMINA-002] Unknown column '{0}'")]
    UnknownColumn(String),

    /// Column kind does not match the requested accessor (LAMINA-003).
    #[error("[LAMINA-003] Type mismatch on column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column the accessor was bound to.
        column: String,
        /// Kind the accessor expected.
        expected: &'static str,
        /// Kind the column actually has.
        actual: &'static str,
    },

    /// Primary key already maps to a different live row (LAMINA-004).
    #[error("[LAMINA-004] Duplicate primary key {0}")]
    DuplicateKey(i64),

    /// Primary key is not present in the collection (LAMINA-005).
    #[error("[LAMINA-005] Unknown primary key {0}")]
    UnknownKey(i64),

    /// A keyed operation was issued but no primary-key column exists (LAMINA-006).
    #[error("[LAMINA-006] Collection has no primary-key column")]
    MissingPrimaryKey,

    /// A snapshot frame or commit buffer failed to decode (LAMINA-007).
    #[error("[LAMINA-007] Corrupt data: {0}")]
    Corrupt(String),

    /// The commit-log sink rejected a commit (LAMINA-008).
    ///
    /// The commit has already been applied in memory; the caller decides
    /// whether to retry, panic, or degrade.
    #[error("[LAMINA-008] Commit sink failure: {0}")]
    SinkFailure(String),

    /// Row index is not live (LAMINA-009).
    #[error("[LAMINA-009] Row {0} not found")]
    NotFound(u32),

    /// IO error (LAMINA-010).
    #[error("[LAMINA-010] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code (e.g., "LAMINA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SchemaConflict(_) => "LAMINA-001",
            Self::UnknownColumn(_) => "LAMINA-002",
            Self::TypeMismatch { .. } => "LAMINA-003",
            Self::DuplicateKey(_) => "LAMINA-004",
            Self::UnknownKey(_) => "LAMINA-005",
            Self::MissingPrimaryKey => "LAMINA-006",
            Self::Corrupt(_) => "LAMINA-007",
            Self::SinkFailure(_) => "LAMINA-008",
            Self::NotFound(_) => "LAMINA-009",
            Self::Io(_) => "LAMINA-010",
        }
    }

    /// Returns true if this error is recoverable.
    ///
    /// Non-recoverable errors indicate lost or damaged data.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Corrupt(_) | Self::Io(_))
    }
}
