use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db)
            if db.message().contains("value too long")
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}

/// `alpha_calls.date` is a `TIMESTAMP` holding UTC wall-clock time.
pub(crate) fn to_naive_utc(at: OffsetDateTime) -> PrimitiveDateTime {
    let utc = at.to_offset(UtcOffset::UTC);
    PrimitiveDateTime::new(utc.date(), utc.time())
}

pub(crate) fn from_naive_utc(at: PrimitiveDateTime) -> OffsetDateTime {
    at.assume_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn naive_conversion_strips_offset_after_normalising() {
        let local = datetime!(2026-10-01 14:30:00).assume_offset(offset!(+2));
        let naive = to_naive_utc(local);
        assert_eq!(naive, datetime!(2026-10-01 12:30:00));
        assert_eq!(from_naive_utc(naive), local);
    }

    #[test]
    fn pool_timeouts_are_reported_as_timeouts() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            RepoError::Timeout
        ));
    }
}
