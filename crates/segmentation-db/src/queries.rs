//! Row-level primitives over an open connection or transaction.
//!
//! These encode no business rules beyond what the schema enforces; callers
//! compose them inside [`crate::SegmentStore::write`] / [`crate::SegmentStore::read`].

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use segmentation_common::{Error, Result, SegmentId, UserId};

use crate::models::{
    HistoryEntry, HistoryOperation, format_naive, format_timestamp, parse_timestamp,
};
use crate::store::is_unique_violation;

pub fn insert_user(conn: &Connection, name: &str) -> Result<UserId> {
    conn.execute("INSERT INTO users(name) VALUES (?1)", params![name])
        .map_err(|e| Error::Database(format!("failed to create user: {e}")))?;
    Ok(UserId::new(conn.last_insert_rowid()))
}

pub fn user_exists(conn: &Connection, user_id: UserId) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM users WHERE id = ?1",
        params![user_id.get()],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| Error::Database(format!("failed to query user with ID {user_id}: {e}")))
}

pub fn all_user_ids(conn: &Connection) -> Result<Vec<UserId>> {
    let mut stmt = conn
        .prepare("SELECT id FROM users")
        .map_err(|e| Error::Database(format!("failed to prepare user id query: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .map_err(|e| Error::Database(format!("failed to query user ids: {e}")))?;

    rows.map(|r| r.map(UserId::new))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect user ids: {e}")))
}

pub fn delete_user(conn: &Connection, user_id: UserId) -> Result<usize> {
    conn.execute("DELETE FROM users WHERE id = ?1", params![user_id.get()])
        .map_err(|e| Error::Database(format!("failed to delete user with ID {user_id}: {e}")))
}

pub fn delete_user_assignments(conn: &Connection, user_id: UserId) -> Result<usize> {
    conn.execute(
        "DELETE FROM user_segments WHERE user_id = ?1",
        params![user_id.get()],
    )
    .map_err(|e| {
        Error::Database(format!(
            "failed to delete segment assignments for user ID {user_id}: {e}"
        ))
    })
}

pub fn find_segment_id(conn: &Connection, slug: &str) -> Result<Option<SegmentId>> {
    conn.query_row(
        "SELECT id FROM segments WHERE slug = ?1",
        params![slug],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|id| id.map(SegmentId::new))
    .map_err(|e| Error::Database(format!("failed to query segment '{slug}': {e}")))
}

/// Insert a segment row. A slug collision, including one lost to a
/// concurrent writer, surfaces as `AlreadyExists`.
pub fn insert_segment(conn: &Connection, slug: &str) -> Result<SegmentId> {
    match conn.execute("INSERT INTO segments(slug) VALUES (?1)", params![slug]) {
        Ok(_) => Ok(SegmentId::new(conn.last_insert_rowid())),
        Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists(format!(
            "segment with slug '{slug}' already exists"
        ))),
        Err(e) => Err(Error::Database(format!("failed to insert segment: {e}"))),
    }
}

pub fn delete_segment(conn: &Connection, slug: &str) -> Result<Option<SegmentId>> {
    conn.query_row(
        "DELETE FROM segments WHERE slug = ?1 RETURNING id",
        params![slug],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|id| id.map(SegmentId::new))
    .map_err(|e| Error::Database(format!("failed to delete segment '{slug}': {e}")))
}

pub fn delete_segment_assignments(conn: &Connection, slug: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM user_segments WHERE segment_slug = ?1",
        params![slug],
    )
    .map_err(|e| {
        Error::Database(format!(
            "failed to delete assignments for segment '{slug}': {e}"
        ))
    })
}

/// Returns `false` when the pair was already assigned.
pub fn insert_assignment(
    conn: &Connection,
    user_id: UserId,
    slug: &str,
    expiration_date: Option<DateTime<Utc>>,
) -> Result<bool> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO user_segments(user_id, segment_slug, expiration_date)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, segment_slug) DO NOTHING",
        )
        .map_err(|e| Error::Database(format!("failed to prepare assignment insert: {e}")))?;

    let inserted = stmt
        .execute(params![
            user_id.get(),
            slug,
            expiration_date.map(format_timestamp)
        ])
        .map_err(|e| {
            Error::Database(format!(
                "failed to assign segment '{slug}' to user ID {user_id}: {e}"
            ))
        })?;

    Ok(inserted > 0)
}

/// Returns `false` when there was nothing to remove.
pub fn delete_assignment(conn: &Connection, user_id: UserId, slug: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM user_segments WHERE user_id = ?1 AND segment_slug = ?2",
        params![user_id.get(), slug],
    )
    .map(|n| n > 0)
    .map_err(|e| {
        Error::Database(format!(
            "failed to remove segment '{slug}' from user ID {user_id}: {e}"
        ))
    })
}

pub fn user_segment_slugs(conn: &Connection, user_id: UserId) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT s.slug FROM segments s
             JOIN user_segments us ON s.slug = us.segment_slug
             WHERE us.user_id = ?1",
        )
        .map_err(|e| Error::Database(format!("failed to prepare segment query: {e}")))?;

    let rows = stmt
        .query_map(params![user_id.get()], |row| row.get::<_, String>(0))
        .map_err(|e| {
            Error::Database(format!(
                "failed to query segments for user ID {user_id}: {e}"
            ))
        })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect segment rows: {e}")))
}

pub fn count_assignments(conn: &Connection, slug: &str) -> Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM user_segments WHERE segment_slug = ?1",
        params![slug],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(|e| Error::Database(format!("failed to count assignments for '{slug}': {e}")))
}

pub fn append_history(
    conn: &Connection,
    user_id: UserId,
    slug: &str,
    operation: HistoryOperation,
    at: DateTime<Utc>,
) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO user_segment_history(user_id, segment_slug, operation, operation_date)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(|e| Error::Database(format!("failed to prepare history insert: {e}")))?;

    stmt.execute(params![
        user_id.get(),
        slug,
        operation.as_str(),
        format_timestamp(at)
    ])
    .map_err(|e| Error::Database(format!("failed to log segment {}: {e}", operation.as_str())))?;

    Ok(())
}

/// History rows for one user with `start <= operation_date < end`, oldest first.
pub fn history_between(
    conn: &Connection,
    user_id: UserId,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, segment_slug, operation, operation_date
             FROM user_segment_history
             WHERE user_id = ?1 AND operation_date >= ?2 AND operation_date < ?3
             ORDER BY operation_date, id",
        )
        .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

    let rows = stmt
        .query_map(
            params![user_id.get(), format_naive(start), format_naive(end)],
            row_to_raw_history,
        )
        .map_err(|e| {
            Error::Database(format!(
                "failed to query history for user ID {user_id}: {e}"
            ))
        })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect history rows: {e}")))?
        .into_iter()
        .map(RawHistory::into_entry)
        .collect()
}

/// Full history of a user, oldest first.
pub fn history_for_user(conn: &Connection, user_id: UserId) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT user_id, segment_slug, operation, operation_date
             FROM user_segment_history
             WHERE user_id = ?1
             ORDER BY operation_date, id",
        )
        .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

    let rows = stmt
        .query_map(params![user_id.get()], row_to_raw_history)
        .map_err(|e| {
            Error::Database(format!(
                "failed to query history for user ID {user_id}: {e}"
            ))
        })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect history rows: {e}")))?
        .into_iter()
        .map(RawHistory::into_entry)
        .collect()
}

struct RawHistory {
    user_id: i64,
    segment_slug: String,
    operation: String,
    operation_date: String,
}

impl RawHistory {
    fn into_entry(self) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            user_id: UserId::new(self.user_id),
            segment_slug: self.segment_slug,
            operation: HistoryOperation::from_db(&self.operation)?,
            operation_date: parse_timestamp(&self.operation_date)?,
        })
    }
}

fn row_to_raw_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawHistory> {
    Ok(RawHistory {
        user_id: row.get(0)?,
        segment_slug: row.get(1)?,
        operation: row.get(2)?,
        operation_date: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SegmentStore;
    use chrono::TimeZone;

    #[test]
    fn duplicate_segment_slug_is_already_exists() {
        let store = SegmentStore::in_memory().unwrap();
        store.write(|tx| insert_segment(tx, "PROMO")).unwrap();

        let err = store.write(|tx| insert_segment(tx, "PROMO")).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn assignment_insert_is_idempotent() {
        let store = SegmentStore::in_memory().unwrap();
        let (first, second, count) = store
            .write(|tx| {
                let user = insert_user(tx, "John")?;
                insert_segment(tx, "PROMO")?;
                let first = insert_assignment(tx, user, "PROMO", None)?;
                let second = insert_assignment(tx, user, "PROMO", None)?;
                Ok((first, second, count_assignments(tx, "PROMO")?))
            })
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(count, 1);
    }

    #[test]
    fn assignment_requires_existing_segment() {
        let store = SegmentStore::in_memory().unwrap();
        let err = store
            .write(|tx| {
                let user = insert_user(tx, "John")?;
                insert_assignment(tx, user, "MISSING", None)
            })
            .unwrap_err();

        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn history_between_filters_by_half_open_month() {
        let store = SegmentStore::in_memory().unwrap();
        let user = store.write(|tx| insert_user(tx, "John")).unwrap();

        let stamps = [
            Utc.with_ymd_and_hms(2023, 7, 31, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2023, 8, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 8, 31, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2023, 9, 1, 0, 0, 0).unwrap(),
        ];
        store
            .write(|tx| {
                for at in stamps {
                    append_history(tx, user, "PROMO", HistoryOperation::Add, at)?;
                }
                Ok(())
            })
            .unwrap();

        let (start, end) = "2023-08".parse::<crate::YearMonth>().unwrap().bounds();
        let rows = store
            .read(|tx| history_between(tx, user, start, end))
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].operation_date, stamps[1]);
        assert_eq!(rows[1].operation_date, stamps[2]);
    }

    #[test]
    fn delete_segment_returns_internal_id() {
        let store = SegmentStore::in_memory().unwrap();
        let created = store.write(|tx| insert_segment(tx, "PROMO")).unwrap();

        let deleted = store.write(|tx| delete_segment(tx, "PROMO")).unwrap();
        assert_eq!(deleted, Some(created));

        let again = store.write(|tx| delete_segment(tx, "PROMO")).unwrap();
        assert_eq!(again, None);
    }
}
