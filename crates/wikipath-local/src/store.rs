//! Durable segment and search-history store.
//!
//! Single-file SQLite database in WAL mode, so many readers stay live while
//! one writer is active. Every operation opens its own short-lived
//! connection; writers retry with bounded backoff when the database is
//! busy. Async callers wrap these blocking calls in `spawn_blocking`.
//!
//! Keys (`start_page`, `end_page`) are stored in normalized form; the
//! `segment_path` JSON keeps canonical titles.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;
use wikipath_core::{
    Error, Result, SearchRecord, SearchRecordDetail, SearchStats, Segment,
};

use crate::now_epoch_s;

const BUSY_RETRY_ATTEMPTS: u32 = 3;
const BUSY_RETRY_BASE: Duration = Duration::from_millis(100);
const BUSY_TIMEOUT: Duration = Duration::from_secs(20);

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS path_segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_page TEXT NOT NULL,
    end_page TEXT NOT NULL,
    segment_path TEXT NOT NULL,
    hops INTEGER NOT NULL,
    use_count INTEGER NOT NULL DEFAULT 1,
    last_used INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_path_segments_lookup
    ON path_segments(start_page, end_page);
CREATE INDEX IF NOT EXISTS idx_path_segments_start_page ON path_segments(start_page);
CREATE INDEX IF NOT EXISTS idx_path_segments_end_page ON path_segments(end_page);
CREATE INDEX IF NOT EXISTS idx_path_segments_last_used ON path_segments(last_used DESC);

CREATE TABLE IF NOT EXISTS searches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_term TEXT NOT NULL,
    end_term TEXT NOT NULL,
    path TEXT NOT NULL,
    hops INTEGER NOT NULL,
    pages_checked INTEGER NOT NULL,
    success INTEGER NOT NULL,
    error_message TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_searches_start_term ON searches(start_term);
CREATE INDEX IF NOT EXISTS idx_searches_end_term ON searches(end_term);
CREATE INDEX IF NOT EXISTS idx_searches_created_at ON searches(created_at DESC);

CREATE TABLE IF NOT EXISTS search_paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    hops INTEGER NOT NULL,
    diversity_score REAL,
    path_order INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (search_id) REFERENCES searches (id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_search_paths_search_id ON search_paths(search_id);
";

#[derive(Debug, Clone)]
pub struct SegmentStore {
    db_path: PathBuf,
}

impl SegmentStore {
    /// Opens (creating if needed) the database at `db_path` and applies the
    /// schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        let conn = store.conn()?;
        // WAL returns the new mode as a row, so this is a query.
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| {
            row.get::<_, String>(0)
        })
        .map_err(store_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(store_err)?;
        Ok(store)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(store_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(store_err)?;
        Ok(conn)
    }

    /// Writers retry on `SQLITE_BUSY`/`SQLITE_LOCKED` with exponential
    /// backoff; each attempt runs on a fresh connection.
    fn with_busy_retry<T>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            let mut conn = self.conn()?;
            match f(&mut conn) {
                Ok(v) => return Ok(v),
                Err(e) if is_busy(&e) && attempt + 1 < BUSY_RETRY_ATTEMPTS => {
                    let pause = BUSY_RETRY_BASE * 2u32.saturating_pow(attempt);
                    warn!(op, attempt, pause_ms = pause.as_millis() as u64,
                        "database busy, retrying");
                    std::thread::sleep(pause);
                    attempt += 1;
                }
                Err(e) => return Err(store_err(e)),
            }
        }
    }

    // ----- segments -----

    /// Reads a segment path; a hit also bumps `use_count` and refreshes
    /// `last_used`.
    pub fn get(&self, start: &str, end: &str) -> Result<Option<Vec<String>>> {
        let now = now_epoch_s();
        let json = self.with_busy_retry("segment get", |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT segment_path FROM path_segments
                     WHERE start_page = ?1 AND end_page = ?2",
                    params![start, end],
                    |row| row.get(0),
                )
                .optional()?;
            if json.is_some() {
                conn.execute(
                    "UPDATE path_segments
                     SET use_count = use_count + 1, last_used = ?3
                     WHERE start_page = ?1 AND end_page = ?2",
                    params![start, end, now],
                )?;
            }
            Ok(json)
        })?;
        json.map(|j| parse_path(&j)).transpose()
    }

    /// Inserts a segment, or bumps the counters of an existing one. An
    /// existing `segment_path` is never replaced.
    pub fn put(&self, start: &str, end: &str, path: &[String]) -> Result<()> {
        let json = serde_json::to_string(path).map_err(|e| Error::Store(e.to_string()))?;
        let hops = path.len().saturating_sub(1);
        let now = now_epoch_s();
        self.with_busy_retry("segment put", |conn| {
            conn.execute(
                "INSERT INTO path_segments
                     (start_page, end_page, segment_path, hops, use_count, last_used, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 ON CONFLICT(start_page, end_page) DO UPDATE SET
                     use_count = use_count + 1,
                     last_used = excluded.last_used",
                params![start, end, json, hops, now],
            )?;
            Ok(())
        })
    }

    /// `put` semantics for a whole batch, atomic in one transaction.
    pub fn bulk_put(&self, segments: &[(String, String, Vec<String>)]) -> Result<usize> {
        if segments.is_empty() {
            return Ok(0);
        }
        let now = now_epoch_s();
        let rows: Vec<(String, String, String, usize)> = segments
            .iter()
            .map(|(s, e, p)| {
                serde_json::to_string(p)
                    .map(|json| (s.clone(), e.clone(), json, p.len().saturating_sub(1)))
                    .map_err(|e| Error::Store(e.to_string()))
            })
            .collect::<Result<_>>()?;
        self.with_busy_retry("segment bulk put", |conn| {
            let tx = conn.transaction()?;
            for (start, end, json, hops) in &rows {
                tx.execute(
                    "INSERT INTO path_segments
                         (start_page, end_page, segment_path, hops, use_count, last_used, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                     ON CONFLICT(start_page, end_page) DO UPDATE SET
                         use_count = use_count + 1,
                         last_used = excluded.last_used",
                    params![start, end, json, hops, now],
                )?;
            }
            tx.commit()?;
            Ok(rows.len())
        })
    }

    /// Most-used pages reachable from `page` via a single cached segment.
    pub fn neighbors_out(&self, page: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT end_page FROM path_segments
                 WHERE start_page = ?1 ORDER BY use_count DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![page, limit], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    /// Most-used pages with a cached segment ending at `page`.
    pub fn neighbors_in(&self, page: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT start_page FROM path_segments
                 WHERE end_page = ?1 ORDER BY use_count DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![page, limit], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    /// Epoch seconds at which the segment was first cached.
    pub fn created_at(&self, start: &str, end: &str) -> Result<Option<u64>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT created_at FROM path_segments
             WHERE start_page = ?1 AND end_page = ?2",
            params![start, end],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_err)
    }

    /// Most-recently-used segments, for cache warming.
    pub fn recent(&self, limit: usize) -> Result<Vec<Segment>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT start_page, end_page, segment_path, hops, use_count, last_used, created_at
                 FROM path_segments
                 ORDER BY last_used DESC, use_count DESC LIMIT ?1",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, usize>(3)?,
                    row.get::<_, u64>(4)?,
                    row.get::<_, u64>(5)?,
                    row.get::<_, u64>(6)?,
                ))
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for (start, end, json, hops, use_count, last_used, created_at) in rows {
            out.push(Segment {
                start,
                end,
                path: parse_path(&json)?,
                hops,
                use_count,
                last_used,
                created_at,
            });
        }
        Ok(out)
    }

    /// Deletes segments older than `max_age`, then keeps only the `cap`
    /// most-recently-used rows. Returns the number of rows removed.
    pub fn prune(&self, max_age: Duration, cap: usize) -> Result<usize> {
        let cutoff = now_epoch_s().saturating_sub(max_age.as_secs());
        self.with_busy_retry("segment prune", |conn| {
            let aged = conn.execute(
                "DELETE FROM path_segments WHERE last_used < ?1",
                params![cutoff],
            )?;
            let over_cap = conn.execute(
                "DELETE FROM path_segments WHERE id NOT IN (
                     SELECT id FROM path_segments ORDER BY last_used DESC LIMIT ?1
                 )",
                params![cap],
            )?;
            Ok(aged + over_cap)
        })
    }

    pub fn segment_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM path_segments", [], |row| row.get(0))
            .map_err(store_err)
    }

    // ----- search history -----

    /// Records one search attempt; returns the history row id.
    pub fn save_search(
        &self,
        start_term: &str,
        end_term: &str,
        path: &[String],
        hops: usize,
        pages_checked: usize,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<i64> {
        let json = serde_json::to_string(path).map_err(|e| Error::Store(e.to_string()))?;
        let now = now_epoch_s();
        self.with_busy_retry("save search", |conn| {
            conn.execute(
                "INSERT INTO searches
                     (start_term, end_term, path, hops, pages_checked, success, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    start_term,
                    end_term,
                    json,
                    hops,
                    pages_checked,
                    success as i64,
                    error_message,
                    now
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Stores the full k-diverse result set under a search row.
    pub fn save_search_paths(
        &self,
        search_id: i64,
        paths: &[(Vec<String>, Option<f64>)],
    ) -> Result<()> {
        let now = now_epoch_s();
        let rows: Vec<(String, usize, Option<f64>)> = paths
            .iter()
            .map(|(p, score)| {
                serde_json::to_string(p)
                    .map(|json| (json, p.len().saturating_sub(1), *score))
                    .map_err(|e| Error::Store(e.to_string()))
            })
            .collect::<Result<_>>()?;
        self.with_busy_retry("save search paths", |conn| {
            let tx = conn.transaction()?;
            for (order, (json, hops, score)) in rows.iter().enumerate() {
                tx.execute(
                    "INSERT INTO search_paths
                         (search_id, path, hops, diversity_score, path_order, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![search_id, json, hops, score, order, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn list_searches(
        &self,
        query: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchRecord>> {
        let conn = self.conn()?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(SearchRecord {
                id: row.get(0)?,
                start_term: row.get(1)?,
                end_term: row.get(2)?,
                hops: row.get(3)?,
                pages_checked: row.get(4)?,
                success: row.get::<_, i64>(5)? != 0,
                created_at: row.get(6)?,
            })
        };
        let rows = if let Some(q) = query {
            let pattern = format!("%{q}%");
            let mut stmt = conn
                .prepare(
                    "SELECT id, start_term, end_term, hops, pages_checked, success, created_at
                     FROM searches
                     WHERE start_term LIKE ?1 OR end_term LIKE ?1
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![pattern, limit, offset], map_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows.map_err(store_err)?
        } else {
            let mut stmt = conn
                .prepare(
                    "SELECT id, start_term, end_term, hops, pages_checked, success, created_at
                     FROM searches
                     ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map(params![limit, offset], map_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows.map_err(store_err)?
        };
        Ok(rows)
    }

    pub fn get_search(&self, id: i64) -> Result<Option<SearchRecordDetail>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, start_term, end_term, hops, pages_checked, success, created_at,
                        path, error_message
                 FROM searches WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        SearchRecord {
                            id: row.get(0)?,
                            start_term: row.get(1)?,
                            end_term: row.get(2)?,
                            hops: row.get(3)?,
                            pages_checked: row.get(4)?,
                            success: row.get::<_, i64>(5)? != 0,
                            created_at: row.get(6)?,
                        },
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?;

        row.map(|(record, json, error_message)| {
            Ok(SearchRecordDetail {
                record,
                path: parse_path(&json)?,
                error_message,
            })
        })
        .transpose()
    }

    pub fn stats(&self) -> Result<SearchStats> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(success), 0),
                    AVG(CASE WHEN success = 1 THEN hops END),
                    AVG(pages_checked)
             FROM searches",
            [],
            |row| {
                Ok(SearchStats {
                    total_searches: row.get(0)?,
                    successful_searches: row.get(1)?,
                    avg_hops: row.get(2)?,
                    avg_pages_checked: row.get(3)?,
                })
            },
        )
        .map_err(store_err)
    }
}

fn parse_path(json: &str) -> Result<Vec<String>> {
    serde_json::from_str(json).map_err(|e| Error::Store(format!("corrupt stored path: {e}")))
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SegmentStore) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = SegmentStore::open(dir.path().join("segments.db")).expect("open store");
        (dir, store)
    }

    fn path(titles: &[&str]) -> Vec<String> {
        titles.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn put_get_round_trip_bumps_counters() {
        let (_dir, store) = temp_store();
        store.put("a", "c", &path(&["A", "B", "C"])).unwrap();

        let got = store.get("a", "c").unwrap().unwrap();
        assert_eq!(got, path(&["A", "B", "C"]));
        assert_eq!(store.get("a", "x").unwrap(), None);

        // First get bumped use_count to 2; a repeat put bumps again but
        // never rewrites the stored path.
        store.put("a", "c", &path(&["A", "Z", "C"])).unwrap();
        let seg = &store.recent(10).unwrap()[0];
        assert_eq!(seg.path, path(&["A", "B", "C"]));
        assert_eq!(seg.use_count, 3);
    }

    #[test]
    fn bulk_put_is_idempotent_on_paths() {
        let (_dir, store) = temp_store();
        let segments = vec![
            ("a".to_string(), "b".to_string(), path(&["A", "B"])),
            ("b".to_string(), "c".to_string(), path(&["B", "C"])),
        ];
        assert_eq!(store.bulk_put(&segments).unwrap(), 2);
        assert_eq!(store.bulk_put(&segments).unwrap(), 2);
        assert_eq!(store.segment_count().unwrap(), 2);

        let seg = store
            .recent(10)
            .unwrap()
            .into_iter()
            .find(|s| s.start == "a")
            .unwrap();
        assert_eq!(seg.use_count, 2);
    }

    #[test]
    fn neighbors_rank_by_use_count() {
        let (_dir, store) = temp_store();
        store.put("a", "b", &path(&["A", "B"])).unwrap();
        store.put("a", "c", &path(&["A", "C"])).unwrap();
        // Make a→c the hotter segment.
        store.get("a", "c").unwrap();
        store.get("a", "c").unwrap();

        assert_eq!(store.neighbors_out("a", 10).unwrap(), vec!["c", "b"]);
        assert_eq!(store.neighbors_in("b", 10).unwrap(), vec!["a"]);
        assert_eq!(store.neighbors_out("a", 1).unwrap(), vec!["c"]);
    }

    #[test]
    fn prune_by_age_then_cap() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            store
                .put(&format!("s{i}"), "e", &path(&[&format!("S{i}"), "E"]))
                .unwrap();
        }
        // Nothing is old enough to age out, so only the cap applies.
        let removed = store.prune(Duration::from_secs(3600), 2).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.segment_count().unwrap(), 2);

        // Backdate one survivor past the age limit.
        let conn = store.conn().unwrap();
        conn.execute(
            "UPDATE path_segments SET last_used = 1
             WHERE id = (SELECT id FROM path_segments LIMIT 1)",
            [],
        )
        .unwrap();
        drop(conn);
        let removed = store.prune(Duration::from_secs(3600), 10).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.segment_count().unwrap(), 1);
    }

    #[test]
    fn search_history_round_trip() {
        let (_dir, store) = temp_store();
        let id = store
            .save_search("python", "philosophy", &path(&["Python", "Philosophy"]), 1, 12, true, None)
            .unwrap();
        store
            .save_search("nope", "nothing", &[], 0, 40, false, Some("no path found within 6 hops"))
            .unwrap();

        let all = store.list_searches(None, 10, 0).unwrap();
        assert_eq!(all.len(), 2);
        // Most recent first.
        assert_eq!(all[0].start_term, "nope");

        let filtered = store.list_searches(Some("python"), 10, 0).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].success);

        let detail = store.get_search(id).unwrap().unwrap();
        assert_eq!(detail.path, path(&["Python", "Philosophy"]));
        assert_eq!(detail.error_message, None);
        assert_eq!(store.get_search(9999).unwrap().map(|d| d.record.id), None);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_searches, 2);
        assert_eq!(stats.successful_searches, 1);
        assert_eq!(stats.avg_hops, Some(1.0));
        assert_eq!(stats.avg_pages_checked, Some(26.0));
    }

    #[test]
    fn save_search_paths_keeps_order() {
        let (_dir, store) = temp_store();
        let id = store
            .save_search("a", "z", &path(&["A", "Z"]), 1, 3, true, None)
            .unwrap();
        store
            .save_search_paths(
                id,
                &[
                    (path(&["A", "Z"]), None),
                    (path(&["A", "B", "Z"]), Some(0.5)),
                ],
            )
            .unwrap();

        let conn = store.conn().unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM search_paths WHERE search_id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }
}
