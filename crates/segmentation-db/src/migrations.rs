/// A schema step applied when the store is opened.
///
/// Every statement is idempotent (`IF NOT EXISTS`), so re-running the schema
/// against an existing database is a no-op.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const SEGMENTATION_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "initial_schema",
    sql: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS user_segments (
            user_id INTEGER NOT NULL REFERENCES users(id),
            segment_slug TEXT NOT NULL REFERENCES segments(slug),
            expiration_date TEXT,
            PRIMARY KEY (user_id, segment_slug)
        );

        CREATE INDEX IF NOT EXISTS idx_user_segments_slug
            ON user_segments(segment_slug);

        CREATE TABLE IF NOT EXISTS user_segment_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            segment_slug TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('add', 'remove')),
            operation_date TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_user_date
            ON user_segment_history(user_id, operation_date);",
};

pub const MIGRATIONS: &[Migration] = &[SEGMENTATION_SCHEMA_V1];
