//! SQLite-backed [State].
//!
//! One `kv` table holds every row, keyed and valued by the binary codec. A committed batch
//! is applied in a single transaction.

use anyhow::{Context, Result};
use arbuz_execution::{State, Status};
use arbuz_types::{Key, Value};
use commonware_codec::{DecodeExt, Encode};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

pub struct SqliteState {
    conn: Mutex<Connection>,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS kv (
             key BLOB PRIMARY KEY,
             value BLOB NOT NULL
         );",
    )
    .context("init state schema")?;
    Ok(())
}

fn decode(bytes: Vec<u8>) -> Result<Value> {
    Value::decode(bytes.as_slice()).context("decode state value")
}

impl SqliteState {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open state db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
            .context("count state rows")?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl State for SqliteState {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let key = key.encode().to_vec();
        let bytes: Option<Vec<u8>> = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .context("read state row")?;
        bytes.map(decode).transpose()
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key.encode().to_vec(), value.encode().to_vec()],
            )
            .context("write state row")?;
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key.encode().to_vec()])
            .context("delete state row")?;
        Ok(())
    }

    async fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("begin state transaction")?;
        for (key, status) in changes {
            let key = key.encode().to_vec();
            match status {
                Status::Update(value) => tx.execute(
                    "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                    params![key, value.encode().to_vec()],
                ),
                Status::Delete => tx.execute("DELETE FROM kv WHERE key = ?1", params![key]),
            }
            .context("apply state change")?;
        }
        tx.commit().context("commit state transaction")?;
        Ok(())
    }
}
