//! Error taxonomy shared by member and team repositories.
//!
//! # Invariants
//! - An absent row is `Ok(None)`, never an error, for lookups.
//! - `SQLITE_CONSTRAINT` failures become `ConstraintViolation`; every other
//!   engine failure becomes `StoreFault`.

use crate::db::DbError;
use crate::model::member::MemberId;
use crate::model::team::TeamId;
use crate::model::ValidationError;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Identity of the row an operation required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKey {
    Member(MemberId),
    Team(TeamId),
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member(id) => write!(f, "member {id}"),
            Self::Team(id) => write!(f, "team {id}"),
        }
    }
}

#[derive(Debug)]
pub enum RepoError {
    /// Entity failed field validation; nothing was written.
    Validation(ValidationError),
    /// A row addressed by id is required but missing.
    NotFound(EntityKey),
    /// More than one row matched where at most one is allowed.
    CardinalityViolation {
        operation: &'static str,
        found: usize,
    },
    /// Uniqueness or foreign-key failure on write.
    ConstraintViolation(rusqlite::Error),
    /// Connectivity, lock timeout, I/O and every other engine failure.
    StoreFault(DbError),
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be mapped to a model.
    InvalidData(String),
}

impl RepoError {
    /// Whether the store gave up waiting on a lock held by another connection.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::StoreFault(err) if err.is_busy())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(key) => write!(f, "{key} not found"),
            Self::CardinalityViolation { operation, found } => write!(
                f,
                "{operation} expected at most one result, found {found}"
            ),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::StoreFault(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::ConstraintViolation(err) => Some(err),
            Self::StoreFault(err) => Some(err),
            Self::NotFound(_)
            | Self::CardinalityViolation { .. }
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(value),
            _ => Self::StoreFault(DbError::Sqlite(value)),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::StoreFault(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKey, RepoError};
    use rusqlite::Connection;

    #[test]
    fn constraint_failures_are_classified_separately() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();

        let err: RepoError = conn
            .execute("INSERT INTO t VALUES ('a');", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepoError::ConstraintViolation(_)));

        let err: RepoError = conn
            .execute("INSERT INTO missing VALUES (1);", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepoError::StoreFault(_)));
        assert!(!err.is_lock_timeout());
    }

    #[test]
    fn display_names_the_operation_and_entity() {
        let err = RepoError::CardinalityViolation {
            operation: "find_optional_by_username",
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "find_optional_by_username expected at most one result, found 2"
        );
        assert_eq!(
            RepoError::NotFound(EntityKey::Team(9)).to_string(),
            "team 9 not found"
        );
    }
}
