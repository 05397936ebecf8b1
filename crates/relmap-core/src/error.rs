//! Error types for relmap operations.
//!
//! Two families live here. [`Error`] is the operational error returned from
//! every adapter-facing call and propagated unchanged through cascades.
//! [`MappingError`] describes programmer mistakes (a record whose schema
//! cannot be resolved, an inconsistent association) and is raised through
//! [`fault`], which panics.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors reported by the adapter
    Connection(ConnectionError),
    /// Query execution errors, including constraint violations
    Query(QueryError),
    /// Value conversion errors while scanning rows
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// No row matched a fetch, update or delete
    NotFound(NotFoundError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub table: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in the generated statement
    Syntax,
    /// Constraint violation (unique, foreign key, check)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Begin failed
    Begin,
    /// Commit failed
    Commit,
    /// Rollback failed
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotFoundError {
    pub table: String,
}

impl Error {
    /// Build a `NotFound` error for `table`.
    pub fn not_found(table: impl Into<String>) -> Self {
        Error::NotFound(NotFoundError {
            table: table.into(),
        })
    }

    /// Is this a not-found condition?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_unique_violation(),
            _ => false,
        }
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_foreign_key_violation(),
            _ => false,
        }
    }
}

impl QueryError {
    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::NotFound(e) => write!(f, "{}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record not found in '{}'", self.table)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A mistake in how a record type or mutation was put together.
///
/// These never come from the database. They are raised through [`fault`]
/// instead of being returned.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingError {
    /// Two fields resolve to the same column name.
    ConflictingField { record: String, field: String },
    /// No primary key could be inferred for the record.
    NoPrimaryKey { record: String },
    /// A single primary key was requested from a composite key.
    CompositePrimaryKey { record: String },
    /// A schema entry has no matching field accessor.
    MissingAccessor { record: String, index: usize },
    /// The reference field of an association does not exist on the owner.
    ReferenceNotFound { record: String, association: String, field: String },
    /// The foreign field of an association does not exist on the target.
    ForeignKeyNotFound { record: String, association: String, field: String },
    /// `autosave` cannot be combined with a through association.
    AutosaveThrough { record: String, association: String },
    /// No field or association with this name.
    UnknownField { record: String, field: String },
    /// The value cannot be assigned to the field.
    InvalidAssignment { record: String, field: String, value: String },
    /// Increment or decrement on a non-integer field.
    NotNumeric { record: String, field: String },
    /// The association is not of the kind the caller expects.
    WrongAssociationKind { record: String, association: String },
    /// An association's reference and foreign values disagree.
    InconsistentAssociation { record: String, association: String },
    /// A map tried to change the primary key of a persisted record.
    PrimaryKeyChange { record: String },
    /// A map entry names a has-many child that is not loaded.
    UnknownChild { record: String, association: String, key: String },
    /// A has-many association must be loaded before it can be updated.
    UnloadedHasMany { record: String, association: String },
    /// The number of child mutations does not match the collection.
    MutationMismatch { association: String, expected: usize, actual: usize },
    /// A preload path segment names an unknown association.
    InvalidPreloadPath { path: String },
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::ConflictingField { record, field } => {
                write!(f, "conflicting field ({field}) in struct {record}")
            }
            MappingError::NoPrimaryKey { record } => {
                write!(f, "failed to infer primary key for type {record}")
            }
            MappingError::CompositePrimaryKey { record } => {
                write!(f, "composite primary key is not supported for {record}")
            }
            MappingError::MissingAccessor { record, index } => {
                write!(f, "schema of {record} declares field {index} without an accessor")
            }
            MappingError::ReferenceNotFound { record, association, field } => write!(
                f,
                "references ({field}) field not found in {record}.{association}"
            ),
            MappingError::ForeignKeyNotFound { record, association, field } => write!(
                f,
                "foreign_key ({field}) field not found in {record}.{association}"
            ),
            MappingError::AutosaveThrough { record, association } => write!(
                f,
                "autosave is not supported for has one/has many through ({record}.{association})"
            ),
            MappingError::UnknownField { record, field } => {
                write!(f, "field named ({field}) is not found in {record}")
            }
            MappingError::InvalidAssignment { record, field, value } => {
                write!(f, "cannot assign {value} as {record}.{field}")
            }
            MappingError::NotNumeric { record, field } => {
                write!(f, "cannot increment or decrement non-integer field {record}.{field}")
            }
            MappingError::WrongAssociationKind { record, association } => {
                write!(f, "association {record}.{association} has the wrong kind for this access")
            }
            MappingError::InconsistentAssociation { record, association } => write!(
                f,
                "inconsistent reference and foreign key on {record}.{association}"
            ),
            MappingError::PrimaryKeyChange { record } => {
                write!(f, "cannot update primary key of a persisted {record}")
            }
            MappingError::UnknownChild { record, association, key } => write!(
                f,
                "cannot update {record}.{association} with key {key}: not loaded"
            ),
            MappingError::UnloadedHasMany { record, association } => write!(
                f,
                "cannot update has many {record}.{association} that is not loaded"
            ),
            MappingError::MutationMismatch { association, expected, actual } => write!(
                f,
                "invalid mutation for {association}: {actual} child mutations for {expected} records"
            ),
            MappingError::InvalidPreloadPath { path } => {
                write!(f, "invalid preload path ({path})")
            }
        }
    }
}

impl std::error::Error for MappingError {}

/// Raise a programmer error.
#[track_caller]
pub fn fault(err: MappingError) -> ! {
    panic!("relmap: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_helpers() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            table: Some("users".to_string()),
            sqlstate: Some("23505".to_string()),
            message: "duplicate key".to_string(),
            source: None,
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("users");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "record not found in 'users'");
    }

    #[test]
    fn query_error_display_carries_sqlstate() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            table: None,
            sqlstate: Some("23503".to_string()),
            message: "missing parent".to_string(),
            source: None,
        });
        assert!(err.is_foreign_key_violation());
        assert_eq!(
            err.to_string(),
            "Query error (SQLSTATE 23503): missing parent"
        );
        assert!(!Error::Cancelled.is_unique_violation());
    }

    #[test]
    #[should_panic(expected = "relmap: failed to infer primary key for type Ghost")]
    fn fault_panics_with_prefix() {
        fault(MappingError::NoPrimaryKey {
            record: "Ghost".to_string(),
        });
    }
}
