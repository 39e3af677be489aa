//! On-disk pair stores.
//!
//! A pair store is a SQLite database holding a single
//! `pairs (key text, value text)` table. Stores are single-writer:
//! a shard is fully written and closed before its URL is ever handed
//! to a peer, so the file service can serve it without coordination.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{Error, Result};

/// A keyed pair container backed by one SQLite file.
#[derive(Debug)]
pub struct PairStore {
    conn: Connection,
    path: PathBuf,
}

impl PairStore {
    /// Create a store at `path`, overwriting any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let store = Self::open(path)?;
        store
            .conn
            .execute("CREATE TABLE pairs (key text, value text)", [])?;
        Ok(store)
    }

    /// Open an existing store (or an empty file SQLite will initialize).
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(10_000))?;
        // Journaling and fsyncs are pure overhead here: a half-written
        // shard aborts the whole job anyway.
        conn.query_row("PRAGMA journal_mode = OFF", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// The path this store lives at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows in the store.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pairs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Append one pair.
    pub fn append(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .prepare_cached("INSERT INTO pairs (key, value) VALUES (?1, ?2)")?
            .execute(params![key, value])?;
        Ok(())
    }

    /// Append every row of `other` to this store, in `other`'s scan order.
    pub fn bulk_append(&mut self, other: &PairStore) -> Result<()> {
        let attached = other.path.to_string_lossy().into_owned();
        self.conn
            .execute("ATTACH DATABASE ?1 AS merge", params![attached])?;
        let copy = self
            .conn
            .execute("INSERT INTO pairs SELECT key, value FROM merge.pairs", []);
        let detach = self.conn.execute("DETACH DATABASE merge", []);
        copy?;
        detach?;
        Ok(())
    }

    /// Visit every pair in scan order (unordered).
    pub fn scan(&self, f: impl FnMut(&str, &str) -> Result<()>) -> Result<()> {
        self.scan_with("SELECT key, value FROM pairs", f)
    }

    /// Visit every pair ordered by key, then value. Rows sharing a key
    /// are contiguous, which is what per-key grouping in the reduce
    /// pipeline relies on.
    pub fn scan_by_key_value(&self, f: impl FnMut(&str, &str) -> Result<()>) -> Result<()> {
        self.scan_with("SELECT key, value FROM pairs ORDER BY key, value", f)
    }

    fn scan_with(&self, sql: &str, mut f: impl FnMut(&str, &str) -> Result<()>) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            f(&key, &value)?;
        }
        Ok(())
    }
}

/// Split `source` into `m` contiguous shards under `out_dir`, named by
/// `name(i)` for `i` in `[0, m)`. The first `rows % m` shards get one
/// extra row. Rows are emitted in scan order; nothing is shuffled.
pub fn split_store(
    source: &Path,
    out_dir: &Path,
    m: u32,
    name: impl Fn(u32) -> String,
) -> Result<Vec<PathBuf>> {
    let src = PairStore::open(source)?;
    let total = src.count()?;
    debug!("splitting {} rows into {} shards", total, m);

    if total < u64::from(m) {
        return Err(Error::TooFewKeys { rows: total, m });
    }

    let base = total / u64::from(m);
    let remainder = total % u64::from(m);

    let mut stmt = src.conn.prepare("SELECT key, value FROM pairs")?;
    let mut rows = stmt.query([])?;

    let mut out_paths = Vec::with_capacity(m as usize);
    let mut copied = 0u64;
    for i in 0..m {
        let shard_rows = base + u64::from(u64::from(i) < remainder);
        let path = out_dir.join(name(i));
        let mut shard = PairStore::create(&path)?;
        for _ in 0..shard_rows {
            let row = rows
                .next()?
                .expect("row count changed under the splitter");
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            shard.append(&key, &value)?;
            copied += 1;
        }
        out_paths.push(path);
    }

    // All rows accounted for, none duplicated.
    assert_eq!(copied, total, "split lost rows");
    Ok(out_paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(store: &mut PairStore, pairs: &[(&str, &str)]) {
        for (k, v) in pairs {
            store.append(k, v).unwrap();
        }
    }

    fn collect(store: &PairStore) -> Vec<(String, String)> {
        let mut out = Vec::new();
        store
            .scan(|k, v| {
                out.push((k.to_string(), v.to_string()));
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn create_append_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.db");
        let mut store = PairStore::create(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);

        fill(&mut store, &[("a", "1"), ("a", "2"), ("b", "3")]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn create_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.db");
        let mut store = PairStore::create(&path).unwrap();
        fill(&mut store, &[("a", "1")]);
        drop(store);

        let store = PairStore::create(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn ordered_scan_sorts_by_key_then_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PairStore::create(&dir.path().join("pairs.db")).unwrap();
        fill(&mut store, &[("b", "2"), ("a", "9"), ("b", "1"), ("a", "0")]);

        let mut seen = Vec::new();
        store
            .scan_by_key_value(|k, v| {
                seen.push((k.to_string(), v.to_string()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("a".into(), "0".into()),
                ("a".into(), "9".into()),
                ("b".into(), "1".into()),
                ("b".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn bulk_append_keeps_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut dest = PairStore::create(&dir.path().join("dest.db")).unwrap();
        fill(&mut dest, &[("a", "1")]);
        let mut part = PairStore::create(&dir.path().join("part.db")).unwrap();
        fill(&mut part, &[("b", "2"), ("c", "3")]);

        dest.bulk_append(&part).unwrap();
        assert_eq!(dest.count().unwrap(), 3);
        assert_eq!(
            collect(&dest),
            vec![
                ("a".into(), "1".into()),
                ("b".into(), "2".into()),
                ("c".into(), "3".into()),
            ]
        );
    }

    #[test]
    fn split_balances_shards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.db");
        let mut store = PairStore::create(&path).unwrap();
        for i in 0..11 {
            store.append(&format!("k{i:02}"), "v").unwrap();
        }
        drop(store);

        let shards = split_store(&path, dir.path(), 3, |i| format!("shard_{i}.db")).unwrap();
        assert_eq!(shards.len(), 3);

        // 11 rows over 3 shards: 4, 4, 3.
        let counts: Vec<u64> = shards
            .iter()
            .map(|p| PairStore::open(p).unwrap().count().unwrap())
            .collect();
        assert_eq!(counts, vec![4, 4, 3]);

        // Contiguous in scan order.
        let keys: Vec<String> = shards
            .iter()
            .flat_map(|p| {
                collect(&PairStore::open(p).unwrap())
                    .into_iter()
                    .map(|(k, _)| k)
            })
            .collect();
        let expected: Vec<String> = (0..11).map(|i| format!("k{i:02}")).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn split_rejects_more_tasks_than_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.db");
        let mut store = PairStore::create(&path).unwrap();
        fill(&mut store, &[("a", "1"), ("b", "2"), ("c", "3")]);
        drop(store);

        let err = split_store(&path, dir.path(), 5, |i| format!("shard_{i}.db")).unwrap_err();
        assert!(matches!(err, Error::TooFewKeys { rows: 3, m: 5 }));
    }
}
