use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Maps a diesel error, keeping unique and foreign key violations apart from
/// generic query failures so callers can answer with 409 instead of 500.
pub fn query_error(err: DieselError) -> DatabaseError {
    match err {
        DieselError::NotFound => DatabaseError::NotFound("row not found".to_string()),
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            DatabaseError::Conflict(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
            DatabaseError::Conflict(format!("foreign key violation: {}", info.message()))
        }
        other => DatabaseError::Query(other.to_string()),
    }
}

pub fn task_error(err: tokio::task::JoinError) -> DatabaseError {
    DatabaseError::Query(format!("database task failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found() {
        assert!(matches!(
            query_error(DieselError::NotFound),
            DatabaseError::NotFound(_)
        ));
    }

    #[test]
    fn other_errors_map_to_query() {
        assert!(matches!(
            query_error(DieselError::RollbackTransaction),
            DatabaseError::Query(_)
        ));
    }
}
