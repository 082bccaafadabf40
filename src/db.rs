use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OptionalExtension, Params, Row};

use crate::error::{StoreError, StoreResult};
use crate::models::{DownloadRecord, DownloadStats, Platform};

/// Database schema version.
///
/// Bump this when introducing a new migration.
const SCHEMA_VERSION: i64 = 2;

/// Columns added after the first released table shape. Existing stores get them
/// via `ALTER TABLE` and a backfill with the migration timestamp.
const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

const RECORD_COLUMNS: &str =
    "id, url, title, file_path, platform, is_finished, created_at, updated_at";

const CREATE_URL_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_downloads_url_unique ON downloads(url)";

/// Legacy timestamp layout written by older revisions.
const LEGACY_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// `LEGACY_TS_FORMAT` as a GLOB pattern, for rewriting old rows in SQL.
const LEGACY_TS_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9] [0-9][0-9]:[0-9][0-9]:[0-9][0-9]";

/// Download history store.
///
/// Notes:
/// - This uses `rusqlite::Connection`, which is not `Sync`.
/// - Keep access on the owning thread; the session mediator is the only writer.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the store at `path` and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // pragmatic defaults for a desktop app:
        // - WAL so a reader never blocks the shutdown save
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    /// Open a throwaway store, mostly for tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Take ownership of an existing connection and bring its schema up to date.
    pub fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a record for `url`.
    ///
    /// Returns `Ok(None)` when the URL is already stored; the existing row is
    /// left untouched.
    pub fn insert_download(
        &mut self,
        url: &str,
        title: Option<&str>,
        file_path: Option<&str>,
        platform: Option<Platform>,
        finished: bool,
    ) -> StoreResult<Option<i64>> {
        let now = Utc::now();
        self.insert_row(url, title, file_path, platform, finished, now, now)
    }

    /// Persist an in-memory record, keeping its timestamps.
    pub fn insert_record(&mut self, record: &DownloadRecord) -> StoreResult<Option<i64>> {
        self.insert_row(
            &record.url,
            record.title.as_deref(),
            record.file_path.as_deref(),
            record.platform,
            record.finished,
            record.created_at,
            record.updated_at.max(record.created_at),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_row(
        &mut self,
        url: &str,
        title: Option<&str>,
        file_path: Option<&str>,
        platform: Option<Platform>,
        finished: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<i64>> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::EmptyUrl);
        }

        let created = format_ts(created_at);
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO downloads (
              url, title, file_path, platform,
              download_time, is_finished,
              created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, ?7)
            "#,
            params![
                url,
                title.map(str::trim).unwrap_or_default(),
                file_path.map(str::trim).unwrap_or_default(),
                platform.map(Platform::as_str).unwrap_or_default(),
                created,
                finished,
                format_ts(updated_at),
            ],
        )?;

        if inserted == 0 {
            log::debug!("url already stored, skipping insert: {}", url);
            return Ok(None);
        }

        let id = self.conn.last_insert_rowid();
        log::info!("inserted download record {} for {}", id, url);
        Ok(Some(id))
    }

    /// Update the completion flag (and the resolved path, when given) for `url`.
    ///
    /// Returns whether a row matched.
    pub fn update_status(
        &mut self,
        url: &str,
        finished: bool,
        file_path: Option<&str>,
    ) -> StoreResult<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE downloads
            SET is_finished = ?2,
                file_path = COALESCE(?3, file_path),
                updated_at = MAX(?4, created_at)
            WHERE url = ?1
            "#,
            params![url.trim(), finished, file_path, format_ts(Utc::now())],
        )?;

        if changed == 0 {
            log::warn!("no download record to update for {}", url);
        }
        Ok(changed > 0)
    }

    /// Retrieve a record by id.
    pub fn get_download(&self, id: i64) -> StoreResult<Option<DownloadRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM downloads WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], row_to_record)
            .optional()?;
        Ok(row)
    }

    /// Delete a record by id. Returns whether a row was removed.
    pub fn delete_download(&mut self, id: i64) -> StoreResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM downloads WHERE id = ?1", params![id])?;
        if removed == 0 {
            log::warn!("no download record with id {}", id);
        }
        Ok(removed > 0)
    }

    /// Remove every record. Returns the number of rows removed.
    pub fn clear_all(&mut self) -> StoreResult<usize> {
        let removed = self.conn.execute("DELETE FROM downloads", [])?;
        log::info!("cleared {} download records", removed);
        Ok(removed)
    }

    /// All records, newest first.
    pub fn list_all(&self) -> StoreResult<Vec<DownloadRecord>> {
        self.query_records("ORDER BY created_at DESC, id DESC", [])
    }

    pub fn list_by_platform(&self, platform: Platform) -> StoreResult<Vec<DownloadRecord>> {
        self.query_records(
            "WHERE lower(platform) = ?1 ORDER BY created_at DESC, id DESC",
            params![platform.as_str()],
        )
    }

    /// Finished records, most recently completed first.
    pub fn list_finished(&self) -> StoreResult<Vec<DownloadRecord>> {
        self.query_records(
            "WHERE is_finished = 1 ORDER BY updated_at DESC, id DESC",
            [],
        )
    }

    pub fn list_unfinished(&self) -> StoreResult<Vec<DownloadRecord>> {
        self.query_records(
            "WHERE is_finished = 0 ORDER BY created_at DESC, id DESC",
            [],
        )
    }

    /// Case-insensitive substring search over title, URL and platform.
    pub fn search(&self, keyword: &str) -> StoreResult<Vec<DownloadRecord>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(keyword));
        self.query_records(
            r#"
            WHERE title LIKE ?1 ESCAPE '\'
               OR url LIKE ?1 ESCAPE '\'
               OR platform LIKE ?1 ESCAPE '\'
            ORDER BY created_at DESC, id DESC
            "#,
            params![pattern],
        )
    }

    pub fn stats(&self) -> StoreResult<DownloadStats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM downloads", [], |r| r.get(0))?;
        let finished: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM downloads WHERE is_finished = 1",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT lower(platform), COUNT(*)
            FROM downloads
            WHERE platform != ''
            GROUP BY lower(platform)
            "#,
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;

        let mut per_platform = BTreeMap::new();
        for row in rows {
            let (platform, count) = row?;
            per_platform.insert(platform, count as u64);
        }

        Ok(DownloadStats::new(total as u64, finished as u64, per_platform))
    }

    /// Copy the live database to `dest` using SQLite's online backup.
    pub fn backup_to(&self, dest: impl AsRef<Path>) -> StoreResult<()> {
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.conn
            .backup(DatabaseName::Main, dest, None::<fn(rusqlite::backup::Progress)>)?;
        log::info!("database backed up to {}", dest.display());
        Ok(())
    }

    /// Replace the live database with the contents of `src`, then re-run migrations
    /// so older backups come back in the current shape.
    pub fn restore_from(&mut self, src: impl AsRef<Path>) -> StoreResult<()> {
        let src = src.as_ref();
        if !src.exists() {
            return Err(StoreError::BackupMissing(src.to_path_buf()));
        }
        self.conn
            .restore(DatabaseName::Main, src, None::<fn(rusqlite::backup::Progress)>)?;
        migrate(&mut self.conn)?;
        log::info!("database restored from {}", src.display());
        Ok(())
    }

    /// Reclaim free pages and rebuild indexes.
    pub fn optimize(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("VACUUM; REINDEX;")?;
        log::info!("database optimized");
        Ok(())
    }

    fn query_records<P: Params>(&self, tail: &str, params: P) -> StoreResult<Vec<DownloadRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM downloads {tail}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_record)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

/// Helper function to convert a database row to a `DownloadRecord`.
fn row_to_record(row: &Row) -> rusqlite::Result<DownloadRecord> {
    let id: i64 = row.get(0)?;
    let url: String = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let file_path: Option<String> = row.get(3)?;
    let platform: Option<String> = row.get(4)?;
    let finished: Option<bool> = row.get(5)?;
    let created_at: Option<String> = row.get(6)?;
    let updated_at: Option<String> = row.get(7)?;

    let created_at = parse_ts(6, "created_at", created_at.unwrap_or_default())?;
    let updated_at = parse_ts(7, "updated_at", updated_at.unwrap_or_default())?;

    Ok(DownloadRecord {
        id: Some(id),
        url,
        title: non_empty(title),
        file_path: non_empty(file_path),
        platform: platform.as_deref().and_then(Platform::from_tag),
        finished: finished.unwrap_or(false),
        created_at,
        updated_at: updated_at.max(created_at),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, column: &'static str, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, LEGACY_TS_FORMAT) {
        return Ok(naive.and_utc());
    }
    Err(rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StoreError::BadTimestamp { column, value: raw }),
    ))
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Apply migrations to bring database to current schema.
fn migrate(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            r#"SELECT value FROM meta WHERE key = 'schema_version'"#,
            [],
            |r| r.get(0),
        )
        .optional()?;

    let current_version: i64 = existing
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    if current_version < 1 {
        migration_v1(&tx)?;
        set_schema_version(&tx, 1)?;
    }
    if current_version < 2 {
        migration_v2(&tx)?;
        set_schema_version(&tx, 2)?;
    }
    tx.commit()?;

    Ok(())
}

fn set_schema_version(conn: &Connection, v: i64) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO meta(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![v.to_string()],
    )?;
    Ok(())
}

/// The first released table shape. Stores written before schema tracking
/// already have this table, so creation is conditional.
fn migration_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS downloads (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          url TEXT NOT NULL,
          title TEXT DEFAULT '',
          file_path TEXT DEFAULT '',
          platform TEXT DEFAULT '',
          download_time TEXT DEFAULT '',
          is_finished BOOLEAN DEFAULT 0
        );
        "#,
    )?;
    Ok(())
}

/// Timestamps, URL uniqueness and lookup indexes.
fn migration_v2(conn: &Connection) -> StoreResult<()> {
    let columns = table_columns(conn, "downloads")?;
    let now = format_ts(Utc::now());

    for column in TIMESTAMP_COLUMNS {
        if !columns.iter().any(|c| c == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE downloads ADD COLUMN {column} TEXT DEFAULT ''"
            ))?;
            log::info!("added column downloads.{}", column);
        }
        let filled = conn.execute(
            &format!("UPDATE downloads SET {column} = ?1 WHERE {column} IS NULL OR {column} = ''"),
            params![now],
        )?;
        if filled > 0 {
            log::info!("backfilled downloads.{} on {} rows", column, filled);
        }
        // text ordering only matches time ordering with a single layout
        let rewritten = conn.execute(
            &format!(
                "UPDATE downloads SET {column} = replace({column}, ' ', 'T') || '.000Z' \
                 WHERE {column} GLOB ?1"
            ),
            params![LEGACY_TS_GLOB],
        )?;
        if rewritten > 0 {
            log::info!("rewrote {} legacy timestamps in downloads.{}", rewritten, column);
        }
    }

    ensure_unique_url_index(conn)?;

    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_downloads_platform ON downloads(platform);
        CREATE INDEX IF NOT EXISTS idx_downloads_finished ON downloads(is_finished);
        CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads(created_at);
        "#,
    )?;
    Ok(())
}

/// Create the unique URL index, collapsing pre-existing duplicates to the
/// earliest inserted row when the first attempt hits a constraint violation.
fn ensure_unique_url_index(conn: &Connection) -> StoreResult<()> {
    match conn.execute_batch(CREATE_URL_INDEX) {
        Ok(()) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            log::warn!("duplicate urls found, keeping the earliest row per url");
            let removed = conn.execute(
                r#"
                DELETE FROM downloads
                WHERE id NOT IN (
                  SELECT MIN(id) FROM downloads GROUP BY url
                )
                "#,
                [],
            )?;
            log::info!("removed {} duplicate download rows", removed);
            conn.execute_batch(CREATE_URL_INDEX)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(1))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_rows(db: &Db) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM downloads", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn blank_url_is_rejected() {
        let mut db = Db::open_in_memory().unwrap();
        let err = db.insert_download("   ", None, None, None, false).unwrap_err();
        assert!(matches!(err, StoreError::EmptyUrl));
        assert_eq!(count_rows(&db), 0);
    }

    #[test]
    fn duplicate_url_insert_is_a_noop() {
        let mut db = Db::open_in_memory().unwrap();
        let url = "https://www.youtube.com/watch?v=abc123";
        let first = db
            .insert_download(url, Some("first"), None, Some(Platform::Youtube), false)
            .unwrap();
        let second = db
            .insert_download(url, Some("second"), None, Some(Platform::Youtube), true)
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(count_rows(&db), 1);

        let rec = db.get_download(first.unwrap()).unwrap().unwrap();
        assert_eq!(rec.title.as_deref(), Some("first"));
        assert!(!rec.finished);
    }

    #[test]
    fn update_status_sets_path_and_flag() {
        let mut db = Db::open_in_memory().unwrap();
        let url = "https://b23.tv/xyz";
        let id = db
            .insert_download(url, None, None, Some(Platform::Bilibili), false)
            .unwrap()
            .unwrap();

        assert!(db.update_status(url, true, Some("/dl/x.mp4")).unwrap());
        assert!(!db.update_status("https://nowhere", true, None).unwrap());

        let rec = db.get_download(id).unwrap().unwrap();
        assert!(rec.finished);
        assert_eq!(rec.file_path.as_deref(), Some("/dl/x.mp4"));
        assert!(rec.updated_at >= rec.created_at);

        // path is kept when not provided
        assert!(db.update_status(url, true, None).unwrap());
        let rec = db.get_download(id).unwrap().unwrap();
        assert_eq!(rec.file_path.as_deref(), Some("/dl/x.mp4"));
    }

    #[test]
    fn delete_and_clear_report_counts() {
        let mut db = Db::open_in_memory().unwrap();
        let a = db
            .insert_download("https://a.example/1", None, None, None, false)
            .unwrap()
            .unwrap();
        db.insert_download("https://a.example/2", None, None, None, false)
            .unwrap();
        db.insert_download("https://a.example/3", None, None, None, false)
            .unwrap();

        assert!(db.delete_download(a).unwrap());
        assert!(!db.delete_download(a).unwrap());
        assert_eq!(db.clear_all().unwrap(), 2);
        assert!(db.list_all().unwrap().is_empty());
    }

    #[test]
    fn list_filters_and_ordering() {
        let mut db = Db::open_in_memory().unwrap();
        let yt = Some(Platform::Youtube);
        let bili = Some(Platform::Bilibili);
        db.insert_download("https://youtu.be/one", None, None, yt, false)
            .unwrap();
        db.insert_download("https://youtu.be/two", None, Some("/x/two.mp4"), yt, true)
            .unwrap();
        db.insert_download("https://b23.tv/three", None, None, bili, false)
            .unwrap();

        let all = db.list_all().unwrap();
        let urls: Vec<_> = all.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://b23.tv/three", "https://youtu.be/two", "https://youtu.be/one"]
        );

        assert_eq!(db.list_by_platform(Platform::Youtube).unwrap().len(), 2);
        assert_eq!(db.list_by_platform(Platform::Bilibili).unwrap().len(), 1);
        assert_eq!(db.list_finished().unwrap().len(), 1);
        assert_eq!(db.list_unfinished().unwrap().len(), 2);
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let mut db = Db::open_in_memory().unwrap();
        db.insert_download(
            "https://www.youtube.com/watch?v=abc",
            Some("Rust Talk"),
            None,
            Some(Platform::Youtube),
            false,
        )
        .unwrap();
        db.insert_download(
            "https://www.bilibili.com/video/BV1xx411c7mD",
            Some("100% fun"),
            None,
            Some(Platform::Bilibili),
            false,
        )
        .unwrap();

        assert_eq!(db.search("rust talk").unwrap().len(), 1);
        assert_eq!(db.search("BILIBILI").unwrap().len(), 1);
        assert_eq!(db.search("youtube").unwrap().len(), 1);
        assert_eq!(db.search("100%").unwrap().len(), 1);
        // wildcard characters in the keyword are literal
        assert!(db.search("_").unwrap().is_empty());
        assert!(db.search("  ").unwrap().is_empty());
    }

    #[test]
    fn stats_on_empty_store() {
        let db = Db::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.finished, 0);
        assert_eq!(stats.unfinished, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.per_platform.is_empty());
    }

    #[test]
    fn stats_counts_platforms() {
        let mut db = Db::open_in_memory().unwrap();
        db.insert_download("https://youtu.be/a", None, None, Some(Platform::Youtube), true)
            .unwrap();
        db.insert_download("https://youtu.be/b", None, None, Some(Platform::Youtube), false)
            .unwrap();
        db.insert_download("https://b23.tv/c", None, None, Some(Platform::Bilibili), true)
            .unwrap();
        db.insert_download("https://example.com/d", None, None, None, false)
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.finished, 2);
        assert_eq!(stats.unfinished, 2);
        assert_eq!(stats.per_platform.get("youtube"), Some(&2));
        assert_eq!(stats.per_platform.get("bilibili"), Some(&1));
        assert_eq!(stats.per_platform.len(), 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn migration_collapses_duplicates_and_adds_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE downloads (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL,
              title TEXT DEFAULT '',
              file_path TEXT DEFAULT '',
              platform TEXT DEFAULT '',
              download_time TEXT DEFAULT '',
              is_finished BOOLEAN DEFAULT 0
            );
            INSERT INTO downloads (url, title, platform, download_time, is_finished)
              VALUES ('https://youtu.be/a', 'first a', 'YouTube', '2024-01-01 10:00:00', 1);
            INSERT INTO downloads (url, title) VALUES ('https://youtu.be/b', 'only b');
            INSERT INTO downloads (url, title) VALUES ('https://youtu.be/a', 'second a');
            INSERT INTO downloads (url, title) VALUES ('https://youtu.be/a', 'third a');
            "#,
        )
        .unwrap();

        let mut db = Db::from_connection(conn).unwrap();

        let columns = table_columns(db.conn(), "downloads").unwrap();
        assert!(columns.iter().any(|c| c == "created_at"));
        assert!(columns.iter().any(|c| c == "updated_at"));

        let mut ids: Vec<i64> = db.list_all().unwrap().iter().filter_map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);

        let a = db.get_download(1).unwrap().unwrap();
        assert_eq!(a.title.as_deref(), Some("first a"));
        assert_eq!(a.platform, Some(Platform::Youtube));
        assert!(a.finished);

        // uniqueness now enforced by the index
        assert!(db
            .insert_download("https://youtu.be/a", None, None, None, false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn migration_rewrites_legacy_timestamps() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE downloads (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL,
              title TEXT DEFAULT '',
              file_path TEXT DEFAULT '',
              platform TEXT DEFAULT '',
              download_time TEXT DEFAULT '',
              is_finished BOOLEAN DEFAULT 0,
              created_at TEXT DEFAULT '',
              updated_at TEXT DEFAULT ''
            );
            INSERT INTO downloads (url, created_at, updated_at)
              VALUES ('https://youtu.be/early', '2024-01-01T09:00:00.000Z', '2024-01-01T09:00:00.000Z');
            INSERT INTO downloads (url, created_at, updated_at)
              VALUES ('https://youtu.be/late', '2024-01-01 10:00:00', '2024-01-01 10:00:00');
            "#,
        )
        .unwrap();

        let db = Db::from_connection(conn).unwrap();

        let raw: String = db
            .conn()
            .query_row(
                "SELECT created_at FROM downloads WHERE url = 'https://youtu.be/late'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(raw, "2024-01-01T10:00:00.000Z");

        let urls: Vec<String> = db.list_all().unwrap().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://youtu.be/late", "https://youtu.be/early"]);
    }

    #[test]
    fn migration_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             INSERT INTO meta VALUES ('schema_version', '99');",
        )
        .unwrap();
        let err = Db::from_connection(conn).err().unwrap();
        assert!(matches!(err, StoreError::SchemaTooNew { found: 99, .. }));
    }

    #[test]
    fn backup_and_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path().join("history.sqlite3")).unwrap();
        db.insert_download("https://youtu.be/keep", None, None, Some(Platform::Youtube), true)
            .unwrap();

        let backup = dir.path().join("backups").join("history.bak");
        db.backup_to(&backup).unwrap();
        assert!(backup.exists());

        db.clear_all().unwrap();
        assert!(db.list_all().unwrap().is_empty());

        db.restore_from(&backup).unwrap();
        let all = db.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url, "https://youtu.be/keep");

        let missing = db.restore_from(dir.path().join("nope.bak")).unwrap_err();
        assert!(matches!(missing, StoreError::BackupMissing(_)));
    }

    #[test]
    fn insert_record_keeps_timestamps() {
        let mut db = Db::open_in_memory().unwrap();
        let mut rec = DownloadRecord::new("https://youtu.be/ts", Some(Platform::Youtube));
        rec.mark_finished(Some("/dl/ts.mp4"));

        let id = db.insert_record(&rec).unwrap().unwrap();
        let stored = db.get_download(id).unwrap().unwrap();
        assert_eq!(
            stored.created_at.timestamp_millis(),
            rec.created_at.timestamp_millis()
        );
        assert!(stored.finished);
        assert_eq!(stored.file_path.as_deref(), Some("/dl/ts.mp4"));
    }

    #[test]
    fn optimize_runs_on_populated_store() {
        let mut db = Db::open_in_memory().unwrap();
        db.insert_download("https://youtu.be/v", None, None, None, false)
            .unwrap();
        db.optimize().unwrap();
        assert_eq!(db.list_all().unwrap().len(), 1);
    }
}
