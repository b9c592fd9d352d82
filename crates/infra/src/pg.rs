//! Shared Postgres helpers.
//!
//! | SQLx Error | PostgreSQL Error Code | Rendered as |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `unique violation in <op>: ...` |
//! | Database (foreign key violation) | `23503` | `foreign key violation in <op>: ...` |
//! | Database (check constraint violation) | `23514` | `check violation in <op>: ...` |
//! | Database (other) | Any other | `database error in <op>: ...` |
//! | PoolClosed | N/A | `connection pool closed in <op>` |
//! | Other | N/A | `sqlx error in <op>: ...` |

use uuid::Uuid;

use stockorder_core::ProductId;

pub(crate) const UNIQUE_VIOLATION: &str = "23505";
pub(crate) const FOREIGN_KEY_VIOLATION: &str = "23503";
pub(crate) const CHECK_VIOLATION: &str = "23514";

/// Render an sqlx error with the operation it came from.
pub(crate) fn describe(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            let kind = match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => "unique violation",
                Some(FOREIGN_KEY_VIOLATION) => "foreign key violation",
                Some(CHECK_VIOLATION) => "check violation",
                _ => "database error",
            };
            format!("{} in {}: {}", kind, operation, db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {}", operation),
        other => format!("sqlx error in {}: {}", operation, other),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

pub(crate) fn uuids(ids: &[ProductId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}
