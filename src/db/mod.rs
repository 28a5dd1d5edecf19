//! Storage layer (§4.1): a pooled `SQLite` connection with WAL + FTS5,
//! zlib-compressed content, and the upsert/search/relation contract the rest
//! of the crate is built on.
//!
//! Grounded in the teacher's `db/mod.rs` (pool shape, batched upserts) and
//! `examples/original_source/app/db.py` (compressed content behind a
//! decompressing view/FTS mirror, `upsert_files`/`upsert_symbols`/
//! `delete_unseen_files` contract, `get_symbol_block`'s `end_line <= 0`
//! fallback).

pub mod pragmas;
pub mod rows;
pub mod schema;

use crate::error::{DbError, DbResult};
use crate::types::RelType;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rows::{FileRow, RelationRow, SymbolRow};
use rusqlite::functions::FunctionFlags;
use rusqlite::OptionalExtension;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

/// A raw, unranked hit from the FTS or LIKE backend, before the hybrid
/// scorer in `services::search` applies boosts and orders them.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub path: String,
    pub repo: String,
    pub content: String,
    pub base_score: f64,
    pub mtime: i64,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct SymbolHit {
    pub path: String,
    pub repo: String,
    pub name: String,
    pub kind: String,
    pub line: i64,
    pub snippet: String,
    pub docstring: String,
    pub mtime: i64,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct SymbolBlock {
    pub name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    pub metadata_json: String,
    pub docstring: String,
}

#[derive(Debug, Clone)]
pub struct RelationHit {
    pub from_path: String,
    pub from_symbol: String,
    pub to_path: String,
    pub to_symbol: String,
    pub rel_type: RelType,
    pub line: i64,
}

#[derive(Debug, Clone)]
pub struct FileListRow {
    pub repo: String,
    pub path: String,
    pub mtime: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStatus {
    pub total_files: i64,
    pub last_scan_time: i64,
    pub db_size_bytes: i64,
}

pub(crate) fn compress(text: &str) -> Vec<u8> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(6));
    encoder
        .write_all(text.as_bytes())
        .expect("writing to an in-memory buffer cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory zlib stream cannot fail")
}

pub(crate) fn decompress(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut decoder = ZlibDecoder::new(data);
    let mut out = String::new();
    match decoder.read_to_string(&mut out) {
        Ok(_) => out,
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    }
}

fn configure_connection(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    pragmas::apply_pragmas(conn)?;
    conn.create_scalar_function(
        "sari_decompress",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let blob = ctx.get::<Vec<u8>>(0)?;
            Ok(decompress(&blob))
        },
    )?;
    schema::init_schema(conn)?;
    Ok(())
}

/// Pooled connection to the per-workspace index database.
///
/// Writes are additionally serialized through `write_lock` on top of r2d2's
/// pool: WAL allows concurrent readers during a write, but `upsert_*` calls
/// from the indexer and an interactive `index_file` tool call must not
/// interleave their transactions against the same paths.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    write_lock: std::sync::Mutex<()>,
    fts_enabled: bool,
    path: Option<std::path::PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if the connection pool cannot be built.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Migration(e.to_string()))?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder().max_size(4).min_idle(Some(1)).build(manager)?;
        let fts_enabled = probe_fts(&pool)?;
        Ok(Self {
            pool,
            write_lock: std::sync::Mutex::new(()),
            fts_enabled,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory database for tests.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if the connection pool cannot be built.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder().max_size(1).build(manager)?;
        let fts_enabled = probe_fts(&pool)?;
        Ok(Self {
            pool,
            write_lock: std::sync::Mutex::new(()),
            fts_enabled,
            path: None,
        })
    }

    #[must_use]
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    fn conn(&self) -> DbResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Inserts or updates a batch of files in one transaction.
    ///
    /// Per row, the write only lands if `incoming.mtime >= stored.mtime`
    /// (§3 upsert monotonicity, §8 invariant 1) — a scan racing an
    /// already-applied newer write is a silent no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn upsert_files(&self, rows: &[FileRow], last_seen: i64) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files(path, repo, mtime, size, content_compressed, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                   repo = excluded.repo,
                   mtime = excluded.mtime,
                   size = excluded.size,
                   content_compressed = excluded.content_compressed,
                   last_seen = excluded.last_seen
                 WHERE excluded.mtime >= files.mtime",
            )?;
            for row in rows {
                let blob = compress(&row.content);
                stmt.execute(rusqlite::params![
                    row.path, row.repo, row.mtime, row.size, blob, last_seen
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replaces all symbols for each touched path atomically (delete-then-insert
    /// per path keeps stale symbols from a shrunk file from lingering, §3).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn upsert_symbols(&self, rows: &[SymbolRow]) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let paths: HashSet<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut del = tx.prepare("DELETE FROM symbols WHERE path = ?1")?;
            for path in &paths {
                del.execute([path])?;
            }
            let mut ins = tx.prepare(
                "INSERT INTO symbols(path, name, kind, line, end_line, content, parent_name, metadata_json, docstring, symbol_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for row in rows {
                let symbol_id = row.symbol_id().as_u64() as i64;
                ins.execute(rusqlite::params![
                    row.path,
                    row.name,
                    row.kind,
                    row.line,
                    row.end_line,
                    row.content,
                    row.parent_name,
                    row.metadata_json,
                    row.docstring,
                    symbol_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Replaces all outgoing relations for each touched `from_path`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn upsert_relations(&self, rows: &[RelationRow]) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let paths: HashSet<&str> = rows.iter().map(|r| r.from_path.as_str()).collect();
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut del = tx.prepare("DELETE FROM symbol_relations WHERE from_path = ?1")?;
            for path in &paths {
                del.execute([path])?;
            }
            let mut ins = tx.prepare(
                "INSERT INTO symbol_relations(from_path, from_symbol, from_symbol_id, to_path, to_symbol, to_symbol_id, rel_type, line)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for row in rows {
                ins.execute(rusqlite::params![
                    row.from_path,
                    row.from_symbol,
                    row.from_symbol_id.as_u64() as i64,
                    row.to_path,
                    row.to_symbol,
                    row.to_symbol_id.as_u64() as i64,
                    row.rel_type.as_str(),
                    row.line
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Bumps `last_seen` for files revisited in a scan without otherwise
    /// needing re-upsert (§4.3).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn update_last_seen(&self, paths: &[String], timestamp: i64) -> DbResult<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE files SET last_seen = ?1 WHERE path = ?2")?;
            for path in paths {
                stmt.execute(rusqlite::params![timestamp, path])?;
            }
        }
        tx.commit()?;
        Ok(paths.len())
    }

    /// Deletes every file not seen in the most recent full scan (§3, §8
    /// invariant 4). Relies on `ON DELETE CASCADE` (with `foreign_keys=ON`)
    /// to drop symbols/relations for the same paths.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn delete_unseen_files(&self, scan_ts: i64) -> DbResult<usize> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM files WHERE last_seen < ?1", [scan_ts])?;
        Ok(count)
    }

    /// Deletes a single file by path (used by `index_file` re-index and by
    /// the proxy's manual refresh path).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn delete_file(&self, path: &str) -> DbResult<bool> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM files WHERE path = ?1", [path])?;
        Ok(count > 0)
    }

    /// Records a file the commit pipeline could not index (§4.3 DLQ).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn record_failed_task(&self, path: &str, reason: &str, attempted_at: i64) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO failed_tasks(path, reason, attempted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET reason = excluded.reason, attempted_at = excluded.attempted_at",
            rusqlite::params![path, reason, attempted_at],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn failed_task_count(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(1) FROM failed_tasks", [], |r| r.get(0))?)
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn clear_failed_task(&self, path: &str) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM failed_tasks WHERE path = ?1", [path])?;
        Ok(())
    }

    /// Returns `(repo, mtime, size, content)` for a single file, if indexed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_file(&self, path: &str) -> DbResult<Option<(String, i64, i64, String)>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT repo, mtime, size, content_compressed FROM files WHERE path = ?1",
                [path],
                |r| {
                    let blob: Vec<u8> = r.get(3)?;
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?, blob))
                },
            )
            .optional()?;
        Ok(row.map(|(repo, mtime, size, blob)| (repo, mtime, size, decompress(&blob))))
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_file_meta(&self, path: &str) -> DbResult<Option<(i64, i64)>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT mtime, size FROM files WHERE path = ?1", [path], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_symbol_block(&self, path: &str, name: &str) -> DbResult<Option<SymbolBlock>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT s.line, s.end_line, s.metadata_json, s.docstring, f.content_compressed
                 FROM symbols s JOIN files f ON s.path = f.path
                 WHERE s.path = ?1 AND s.name = ?2
                 ORDER BY s.line ASC LIMIT 1",
                rusqlite::params![path, name],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((line_start, mut line_end, metadata_json, docstring, blob)) = row else {
            return Ok(None);
        };
        // §4.1: when extraction couldn't determine an end line, fall back to
        // ten lines after the start rather than returning an empty block.
        if line_end <= 0 {
            line_end = line_start + 10;
        }
        let content = decompress(&blob);
        let lines: Vec<&str> = content.lines().collect();
        let start_idx = (line_start - 1).max(0) as usize;
        let end_idx = (line_end as usize).min(lines.len());
        let block = lines
            .get(start_idx..end_idx.max(start_idx))
            .unwrap_or(&[])
            .join("\n");

        Ok(Some(SymbolBlock {
            name: name.to_string(),
            start_line: line_start,
            end_line: line_end,
            content: block,
            metadata_json,
            docstring,
        }))
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn search_symbols(&self, query: &str, repo: Option<&str>, limit: usize) -> DbResult<Vec<SymbolHit>> {
        let conn = self.conn()?;
        let pattern = format!("%{query}%");
        let sql = if repo.is_some() {
            "SELECT s.path, f.repo, s.name, s.kind, s.line, s.content, s.docstring, f.mtime, f.size
             FROM symbols s JOIN files f ON s.path = f.path
             WHERE s.name LIKE ?1 AND f.repo = ?2
             ORDER BY length(s.name) ASC, s.path ASC LIMIT ?3"
        } else {
            "SELECT s.path, f.repo, s.name, s.kind, s.line, s.content, s.docstring, f.mtime, f.size
             FROM symbols s JOIN files f ON s.path = f.path
             WHERE s.name LIKE ?1
             ORDER BY length(s.name) ASC, s.path ASC LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row| -> rusqlite::Result<SymbolHit> {
            Ok(SymbolHit {
                path: r.get(0)?,
                repo: r.get(1)?,
                name: r.get(2)?,
                kind: r.get(3)?,
                line: r.get(4)?,
                snippet: r.get(5)?,
                docstring: r.get(6)?,
                mtime: r.get(7)?,
                size: r.get(8)?,
            })
        };
        let rows = if let Some(repo) = repo {
            stmt.query_map(rusqlite::params![pattern, repo, limit as i64], map_row)?
        } else {
            stmt.query_map(rusqlite::params![pattern, limit as i64], map_row)?
        };
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// FTS5 BM25 search over the decompressed content mirror. Returns an
    /// empty vec when FTS is unavailable rather than erroring — callers
    /// branch on `fts_enabled()` instead of catching exceptions (§4.2
    /// REDESIGN FLAG).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure other than FTS
    /// unavailability.
    pub fn fts_search(&self, match_query: &str, repo: Option<&str>, limit: usize) -> DbResult<Vec<RawHit>> {
        if !self.fts_enabled {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = if repo.is_some() {
            "SELECT f.path, f.repo, sari_decompress(f.content_compressed), bm25(files_fts), f.mtime, f.size
             FROM files_fts JOIN files f ON f.rowid = files_fts.rowid
             WHERE files_fts MATCH ?1 AND f.repo = ?2
             ORDER BY bm25(files_fts) LIMIT ?3"
        } else {
            "SELECT f.path, f.repo, sari_decompress(f.content_compressed), bm25(files_fts), f.mtime, f.size
             FROM files_fts JOIN files f ON f.rowid = files_fts.rowid
             WHERE files_fts MATCH ?1
             ORDER BY bm25(files_fts) LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row| -> rusqlite::Result<RawHit> {
            let bm25: f64 = r.get(3)?;
            Ok(RawHit {
                path: r.get(0)?,
                repo: r.get(1)?,
                content: r.get(2)?,
                base_score: bm25.abs(),
                mtime: r.get(4)?,
                size: r.get(5)?,
            })
        };
        let rows = if let Some(repo) = repo {
            stmt.query_map(rusqlite::params![match_query, repo, limit as i64], map_row)?
        } else {
            stmt.query_map(rusqlite::params![match_query, limit as i64], map_row)?
        };
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// `LIKE`-based fallback path, used when FTS is unavailable or the query
    /// contains characters FTS5's tokenizer mishandles (non-ASCII/CJK, raw
    /// regex source text), per §4.2.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn like_search(&self, term: &str, repo: Option<&str>, limit: usize) -> DbResult<Vec<RawHit>> {
        let conn = self.conn()?;
        let pattern = format!("%{term}%");
        let sql = if repo.is_some() {
            "SELECT path, repo, sari_decompress(content_compressed), mtime, size
             FROM files WHERE sari_decompress(content_compressed) LIKE ?1 AND repo = ?2
             ORDER BY mtime DESC LIMIT ?3"
        } else {
            "SELECT path, repo, sari_decompress(content_compressed), mtime, size
             FROM files WHERE sari_decompress(content_compressed) LIKE ?1
             ORDER BY mtime DESC LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row| -> rusqlite::Result<RawHit> {
            Ok(RawHit {
                path: r.get(0)?,
                repo: r.get(1)?,
                content: r.get(2)?,
                base_score: 1.0,
                mtime: r.get(3)?,
                size: r.get(4)?,
            })
        };
        let rows = if let Some(repo) = repo {
            stmt.query_map(rusqlite::params![pattern, repo, limit as i64], map_row)?
        } else {
            stmt.query_map(rusqlite::params![pattern, limit as i64], map_row)?
        };
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn list_files(
        &self,
        repo: Option<&str>,
        path_like: Option<&str>,
        include_hidden: bool,
        limit: usize,
        offset: usize,
    ) -> DbResult<(Vec<FileListRow>, i64)> {
        let conn = self.conn()?;
        let mut clauses = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(repo) = repo {
            clauses.push("repo = ?".to_string());
            params.push(Box::new(repo.to_string()));
        }
        if !include_hidden {
            clauses.push("path NOT LIKE '%/.%'".to_string());
            clauses.push("path NOT LIKE '.%'".to_string());
        }
        if let Some(pattern) = path_like {
            clauses.push("path LIKE ?".to_string());
            params.push(Box::new(pattern.to_string()));
        }
        let where_sql = if clauses.is_empty() {
            "1=1".to_string()
        } else {
            clauses.join(" AND ")
        };

        let count_sql = format!("SELECT COUNT(1) FROM files WHERE {where_sql}");
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(std::convert::AsRef::as_ref).collect();
        let total: i64 = conn.query_row(&count_sql, param_refs.as_slice(), |r| r.get(0))?;

        let data_sql = format!(
            "SELECT repo, path, mtime, size FROM files WHERE {where_sql} ORDER BY repo, path LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&data_sql)?;
        let mut all_params = param_refs;
        let limit_i64 = limit as i64;
        let offset_i64 = offset as i64;
        all_params.push(&limit_i64);
        all_params.push(&offset_i64);
        let rows = stmt.query_map(all_params.as_slice(), |r| {
            Ok(FileListRow {
                repo: r.get(0)?,
                path: r.get(1)?,
                mtime: r.get(2)?,
                size: r.get(3)?,
            })
        })?;
        Ok((rows.filter_map(std::result::Result::ok).collect(), total))
    }

    /// File counts grouped by repo, used for `list_files`'s repo summary and
    /// `repo_candidates`' denominator.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn repo_file_counts(&self) -> DbResult<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT repo, COUNT(1) FROM files GROUP BY repo ORDER BY COUNT(1) DESC")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// Per-repo hit counts for `term`, used by `repo_candidates` to rank
    /// repos by how many of their files match (§4.2).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn repo_hit_counts(&self, term: &str) -> DbResult<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let pattern = format!("%{term}%");
        let mut stmt = conn.prepare(
            "SELECT repo, COUNT(1) FROM files WHERE sari_decompress(content_compressed) LIKE ?1 OR path LIKE ?1
             GROUP BY repo ORDER BY COUNT(1) DESC",
        )?;
        let rows = stmt.query_map([&pattern], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_callers(&self, symbol_name: &str) -> DbResult<Vec<RelationHit>> {
        self.relations_to(symbol_name, &[RelType::Calls])
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_implementations(&self, symbol_name: &str) -> DbResult<Vec<RelationHit>> {
        self.relations_to(symbol_name, &[RelType::Implements, RelType::Extends])
    }

    fn relations_to(&self, symbol_name: &str, rel_types: &[RelType]) -> DbResult<Vec<RelationHit>> {
        let conn = self.conn()?;
        let placeholders: Vec<String> = (0..rel_types.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT from_path, from_symbol, to_path, to_symbol, rel_type, line
             FROM symbol_relations WHERE to_symbol = ?1 AND rel_type IN ({})
             ORDER BY from_path, line",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&symbol_name];
        let type_strs: Vec<&str> = rel_types.iter().map(|r| r.as_str()).collect();
        for t in &type_strs {
            params.push(t);
        }
        let rows = stmt.query_map(params.as_slice(), |r| {
            let rel_type_str: String = r.get(4)?;
            Ok(RelationHit {
                from_path: r.get(0)?,
                from_symbol: r.get(1)?,
                to_path: r.get(2)?,
                to_symbol: r.get(3)?,
                rel_type: rel_type_str.parse().unwrap_or(RelType::Calls),
                line: r.get(5)?,
            })
        })?;
        Ok(rows.filter_map(std::result::Result::ok).collect())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn upsert_repo_meta(
        &self,
        repo_name: &str,
        tags: &str,
        domain: &str,
        description: &str,
        priority: i64,
    ) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO repo_meta(repo_name, tags, domain, description, priority) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(repo_name) DO UPDATE SET tags=excluded.tags, domain=excluded.domain, description=excluded.description, priority=excluded.priority",
            rusqlite::params![repo_name, tags, domain, description, priority],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_repo_priority(&self, repo_name: &str) -> DbResult<i64> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT priority FROM repo_meta WHERE repo_name = ?1", [repo_name], |r| {
                r.get(0)
            })
            .optional()?
            .unwrap_or(0))
    }

    /// Comma-separated tags for `repo_name`, or empty string if the repo has
    /// no `repo_meta` row (used by the search ranker's tag-match boost).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_repo_tags(&self, repo_name: &str) -> DbResult<String> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT tags FROM repo_meta WHERE repo_name = ?1", [repo_name], |r| {
                r.get(0)
            })
            .optional()?
            .unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn file_count(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(1) FROM files", [], |r| r.get(0))?)
    }

    /// # Errors
    ///
    /// Returns `DbError::Sqlite` on any statement failure.
    pub fn get_index_status(&self) -> DbResult<IndexStatus> {
        let conn = self.conn()?;
        let (total_files, last_scan_time): (i64, Option<i64>) =
            conn.query_row("SELECT COUNT(1), MAX(mtime) FROM files", [], |r| Ok((r.get(0)?, r.get(1)?)))?;
        let db_size_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len() as i64);
        Ok(IndexStatus {
            total_files,
            last_scan_time: last_scan_time.unwrap_or(0),
            db_size_bytes,
        })
    }
}

fn probe_fts(pool: &Pool<SqliteConnectionManager>) -> DbResult<bool> {
    let conn = pool.get()?;
    let result = conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS __fts_probe USING fts5(x); DROP TABLE IF EXISTS __fts_probe;",
    );
    Ok(result.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rows::{RelationRow, SymbolRow};
    use crate::types::SymbolId;

    fn sample_file(path: &str, content: &str, mtime: i64) -> FileRow {
        FileRow {
            path: path.to_string(),
            repo: "demo".to_string(),
            mtime,
            size: content.len() as i64,
            content: content.to_string(),
        }
    }

    #[test]
    fn upsert_and_fetch_roundtrip() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("a.rs", "fn main() {}", 1)], 1).unwrap();
        let (repo, mtime, _size, content) = db.get_file("a.rs").unwrap().unwrap();
        assert_eq!(repo, "demo");
        assert_eq!(mtime, 1);
        assert_eq!(content, "fn main() {}");
    }

    #[test]
    fn upsert_rejects_stale_mtime() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("a.rs", "new", 10)], 10).unwrap();
        db.upsert_files(&[sample_file("a.rs", "stale", 5)], 10).unwrap();
        let (_, mtime, _, content) = db.get_file("a.rs").unwrap().unwrap();
        assert_eq!(mtime, 10);
        assert_eq!(content, "new");
    }

    #[test]
    fn delete_unseen_files_removes_stale_entries() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("a.rs", "a", 1), sample_file("b.rs", "b", 1)], 1)
            .unwrap();
        db.update_last_seen(&["a.rs".to_string()], 2).unwrap();
        let deleted = db.delete_unseen_files(2).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_file("b.rs").unwrap().is_none());
        assert!(db.get_file("a.rs").unwrap().is_some());
    }

    #[test]
    fn fts_search_finds_indexed_content() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("auth.rs", "fn authenticate_user() {}", 1)], 1)
            .unwrap();
        assert!(db.fts_enabled());
        let hits = db.fts_search("authenticate", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "auth.rs");
    }

    #[test]
    fn like_search_is_always_available() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("a.rs", "こんにちは world", 1)], 1).unwrap();
        let hits = db.like_search("こんにちは", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn symbol_and_relation_roundtrip_for_callers() {
        let db = Database::in_memory().unwrap();
        db.upsert_files(&[sample_file("a.rs", "fn foo() { bar(); }\nfn bar() {}", 1)], 1)
            .unwrap();
        let bar_id = SymbolId::new("a.rs", "bar", "fn");
        let foo_id = SymbolId::new("a.rs", "foo", "fn");
        db.upsert_symbols(&[
            SymbolRow {
                path: "a.rs".into(),
                name: "foo".into(),
                kind: "fn".into(),
                line: 1,
                end_line: 1,
                content: String::new(),
                parent_name: String::new(),
                metadata_json: "{}".into(),
                docstring: String::new(),
                qualname: "foo".into(),
            },
            SymbolRow {
                path: "a.rs".into(),
                name: "bar".into(),
                kind: "fn".into(),
                line: 2,
                end_line: 2,
                content: String::new(),
                parent_name: String::new(),
                metadata_json: "{}".into(),
                docstring: String::new(),
                qualname: "bar".into(),
            },
        ])
        .unwrap();
        db.upsert_relations(&[RelationRow {
            from_path: "a.rs".into(),
            from_symbol: "foo".into(),
            from_symbol_id: foo_id,
            to_path: "a.rs".into(),
            to_symbol: "bar".into(),
            to_symbol_id: bar_id,
            rel_type: RelType::Calls,
            line: 1,
        }])
        .unwrap();

        let callers = db.get_callers("bar").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].from_symbol, "foo");
    }

    #[test]
    fn get_symbol_block_falls_back_when_end_line_missing() {
        let db = Database::in_memory().unwrap();
        let content: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        db.upsert_files(&[sample_file("a.rs", &content, 1)], 1).unwrap();
        db.upsert_symbols(&[SymbolRow {
            path: "a.rs".into(),
            name: "thing".into(),
            kind: "fn".into(),
            line: 5,
            end_line: 0,
            content: String::new(),
            parent_name: String::new(),
            metadata_json: "{}".into(),
            docstring: String::new(),
            qualname: "thing".into(),
        }])
        .unwrap();
        let block = db.get_symbol_block("a.rs", "thing").unwrap().unwrap();
        assert_eq!(block.end_line, 15);
    }
}
