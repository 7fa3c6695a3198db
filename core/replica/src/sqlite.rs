//! SQLite-backed record store.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision,
//! `Z` suffix) so that lexical order matches chronological order and `MAX()`
//! works directly in SQL.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use notesync_common::{Error, Result, UserId};
use notesync_snapshot::{Entry, Media, Settings, SnapshotContents};

use crate::replica::{ImportBatch, ImportMode, RecordStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    entry_date TEXT,
    tags TEXT NOT NULL,
    mood TEXT,
    media_keys TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (user_id, key)
);

CREATE TABLE IF NOT EXISTS media (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    PRIMARY KEY (user_id, key)
);

CREATE TABLE IF NOT EXISTS settings (
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (user_id, key)
);

CREATE INDEX IF NOT EXISTS idx_entries_updated ON entries(user_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_media_updated ON media(user_id, updated_at);
"#;

const ENTRY_COLUMNS: &str = "key, title, body, entry_date, tags, mood, media_keys, created_at, updated_at, deleted_at";
const MEDIA_COLUMNS: &str = "key, entry_key, mime_type, data, created_at, updated_at, deleted_at";

/// Record store persisted in a SQLite database.
///
/// Blocking database work runs on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Create or open a record database at `db_path`.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(sql)?;
        conn.execute_batch(SCHEMA).map_err(sql)?;
        info!("Record store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Storage("Record store lock poisoned".to_string()))?;
            f(&mut guard).map_err(sql)
        })
        .await
        .map_err(|e| Error::Storage(format!("Blocking task failed: {}", e)))?
    }
}

fn sql(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

fn get_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion(idx, e))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let entry_date: Option<String> = row.get(3)?;
    let entry_date = entry_date
        .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| conversion(3, e)))
        .transpose()?;

    Ok(Entry {
        key: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        entry_date,
        tags: get_list(row, 4)?,
        mood: row.get(5)?,
        media_keys: get_list(row, 6)?,
        created_at: get_ts(row, 7)?,
        updated_at: get_ts(row, 8)?,
        deleted_at: get_opt_ts(row, 9)?,
    })
}

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<Media> {
    Ok(Media {
        key: row.get(0)?,
        entry_key: row.get(1)?,
        mime_type: row.get(2)?,
        data: row.get(3)?,
        created_at: get_ts(row, 4)?,
        updated_at: get_ts(row, 5)?,
        deleted_at: get_opt_ts(row, 6)?,
    })
}

fn upsert_entry(conn: &Connection, user: &str, entry: &Entry) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO entries
        (user_id, key, title, body, entry_date, tags, mood, media_keys, created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            user,
            entry.key,
            entry.title,
            entry.body,
            entry.entry_date.map(|d| d.format("%Y-%m-%d").to_string()),
            to_json(&entry.tags)?,
            entry.mood,
            to_json(&entry.media_keys)?,
            fmt_ts(entry.created_at),
            fmt_ts(entry.updated_at),
            entry.deleted_at.map(fmt_ts),
        ],
    )?;
    Ok(())
}

fn upsert_media(conn: &Connection, user: &str, media: &Media) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO media
        (user_id, key, entry_key, mime_type, data, created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            user,
            media.key,
            media.entry_key,
            media.mime_type,
            media.data,
            fmt_ts(media.created_at),
            fmt_ts(media.updated_at),
            media.deleted_at.map(fmt_ts),
        ],
    )?;
    Ok(())
}

fn upsert_setting(
    conn: &Connection,
    user: &str,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (user_id, key, value) VALUES (?1, ?2, ?3)",
        params![user, key, to_json(value)?],
    )?;
    Ok(())
}

fn apply_batch(tx: &Transaction<'_>, user: &str, batch: &ImportBatch) -> rusqlite::Result<()> {
    if batch.mode == ImportMode::Replace {
        for table in ["entries", "media", "settings"] {
            tx.execute(&format!("DELETE FROM {} WHERE user_id = ?1", table), [user])?;
        }
    }

    for entry in &batch.contents.entries {
        upsert_entry(tx, user, entry)?;
    }
    for media in &batch.contents.media {
        upsert_media(tx, user, media)?;
    }
    for (key, value) in &batch.contents.settings {
        upsert_setting(tx, user, key, value)?;
    }
    Ok(())
}

fn load_all(conn: &Connection, user: &str) -> rusqlite::Result<SnapshotContents> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM entries WHERE user_id = ?1 ORDER BY key",
        ENTRY_COLUMNS
    ))?;
    let entries = stmt
        .query_map([user], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM media WHERE user_id = ?1 ORDER BY key",
        MEDIA_COLUMNS
    ))?;
    let media = stmt
        .query_map([user], media_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT key, value FROM settings WHERE user_id = ?1")?;
    let mut settings = Settings::new();
    let rows = stmt.query_map([user], |row| {
        let key: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| conversion(1, e))?;
        Ok((key, value))
    })?;
    for row in rows {
        let (key, value) = row?;
        settings.insert(key, value);
    }

    Ok(SnapshotContents {
        entries,
        media,
        settings,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load(&self, user: &UserId) -> Result<SnapshotContents> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| load_all(conn, &user)).await
    }

    async fn latest_updated_at(&self, user: &UserId) -> Result<Option<DateTime<Utc>>> {
        let user = user.as_str().to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    r#"
                    SELECT MAX(updated_at) FROM (
                        SELECT updated_at FROM entries WHERE user_id = ?1
                        UNION ALL
                        SELECT updated_at FROM media WHERE user_id = ?1
                    )
                    "#,
                    [&user],
                    |row| row.get(0),
                )
            })
            .await?;

        raw.map(|r| {
            DateTime::parse_from_rfc3339(&r)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Storage(format!("Invalid timestamp {}: {}", r, e)))
        })
        .transpose()
    }

    async fn apply_import(&self, user: &UserId, batch: ImportBatch) -> Result<()> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            apply_batch(&tx, &user, &batch)?;
            tx.commit()?;
            debug!(
                "Applied import: {} entries, {} media",
                batch.contents.entries.len(),
                batch.contents.media.len()
            );
            Ok(())
        })
        .await
    }

    async fn get_entry(&self, user: &UserId, key: &str) -> Result<Option<Entry>> {
        let user = user.as_str().to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM entries WHERE user_id = ?1 AND key = ?2",
                    ENTRY_COLUMNS
                ),
                params![user, key],
                entry_from_row,
            )
            .optional()
        })
        .await
    }

    async fn put_entry(&self, user: &UserId, entry: Entry) -> Result<()> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| upsert_entry(conn, &user, &entry))
            .await
    }

    async fn put_media(&self, user: &UserId, media: Media) -> Result<()> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| upsert_media(conn, &user, &media))
            .await
    }

    async fn put_setting(&self, user: &UserId, key: &str, value: serde_json::Value) -> Result<()> {
        let user = user.as_str().to_string();
        let key = key.to_string();
        self.with_conn(move |conn| upsert_setting(conn, &user, &key, &value))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_entry_roundtrip() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let mut entry = Entry::new("e1", "Hello", "World", t0());
        entry.tags = vec!["a".to_string(), "b".to_string()];
        entry.mood = Some("calm".to_string());

        store.put_entry(&user(), entry.clone()).await.unwrap();

        let loaded = store.get_entry(&user(), "e1").await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(store.get_entry(&user(), "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_updated_at_spans_tables() {
        let store = SqliteRecordStore::in_memory().unwrap();
        assert_eq!(store.latest_updated_at(&user()).await.unwrap(), None);

        store
            .put_entry(&user(), Entry::new("e1", "", "", t0()))
            .await
            .unwrap();
        let later = t0() + Duration::milliseconds(1500);
        store
            .put_media(
                &user(),
                Media {
                    key: "m1".to_string(),
                    entry_key: "e1".to_string(),
                    mime_type: "image/png".to_string(),
                    data: vec![1, 2, 3],
                    created_at: later,
                    updated_at: later,
                    deleted_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.latest_updated_at(&user()).await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn test_replace_clears_existing() {
        let store = SqliteRecordStore::in_memory().unwrap();
        store
            .put_entry(&user(), Entry::new("old", "", "", t0()))
            .await
            .unwrap();
        store
            .put_setting(&user(), "theme", serde_json::json!("dark"))
            .await
            .unwrap();

        let batch = ImportBatch {
            mode: ImportMode::Replace,
            contents: SnapshotContents {
                entries: vec![Entry::new("new", "", "", t0())],
                ..Default::default()
            },
        };
        store.apply_import(&user(), batch).await.unwrap();

        let contents = store.load(&user()).await.unwrap();
        assert_eq!(contents.entries.len(), 1);
        assert_eq!(contents.entries[0].key, "new");
        assert!(contents.settings.is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.db");

        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store
                .put_entry(&user(), Entry::new("e1", "kept", "", t0()))
                .await
                .unwrap();
        }

        let store = SqliteRecordStore::open(&path).unwrap();
        let loaded = store.get_entry(&user(), "e1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "kept");
    }
}
