//! Durable alert history.
//!
//! Every dispatched alert is appended to a history store regardless of
//! channel outcomes, so the record of what the system decided survives
//! flaky notification backends. The SQLite store is the production path;
//! the in-memory store backs tests.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::detect::Detection;

use super::dispatch::ChannelOutcome;

/// One dispatched alert, as persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRecord {
    pub created_at: String,
    pub zone_id: String,
    pub detections: Vec<Detection>,
    pub snapshot_path: String,
    pub channels: Vec<ChannelOutcome>,
}

pub trait AlertHistoryStore: Send {
    fn append(&mut self, record: &AlertRecord) -> Result<()>;
    /// Most recent records first.
    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>>;
}

/// SQLite-backed history. One row per alert; the full record is stored as a
/// JSON payload with the zone id and timestamp broken out for querying.
pub struct SqliteAlertHistory {
    conn: Mutex<Connection>,
}

impl SqliteAlertHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create history dir {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open alert history db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS alerts (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 created_at TEXT NOT NULL,
                 zone_id    TEXT NOT NULL,
                 payload    TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_alerts_zone ON alerts(zone_id);",
        )
        .context("initialize alert history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("history lock");
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl AlertHistoryStore for SqliteAlertHistory {
    fn append(&mut self, record: &AlertRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn.lock().expect("history lock");
        conn.execute(
            "INSERT INTO alerts (created_at, zone_id, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.created_at, record.zone_id, payload],
        )
        .context("append alert record")?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock().expect("history lock");
        let mut stmt = conn.prepare("SELECT payload FROM alerts ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for payload in rows {
            records.push(serde_json::from_str(&payload?)?);
        }
        Ok(records)
    }
}

/// Test-only store; keeps records in insertion order.
#[derive(Default)]
pub struct InMemoryAlertHistory {
    records: Vec<AlertRecord>,
}

impl InMemoryAlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AlertRecord] {
        &self.records
    }
}

impl AlertHistoryStore for InMemoryAlertHistory {
    fn append(&mut self, record: &AlertRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn record(zone_id: &str, created_at: &str) -> AlertRecord {
        AlertRecord {
            created_at: created_at.to_string(),
            zone_id: zone_id.to_string(),
            detections: vec![Detection {
                class_id: 0,
                confidence: 0.92,
                bbox: BoundingBox {
                    x_min: 10.0,
                    y_min: 20.0,
                    x_max: 30.0,
                    y_max: 60.0,
                },
                frame_ref: 7,
            }],
            snapshot_path: "alerts/alert_1.jpg".to_string(),
            channels: vec![ChannelOutcome {
                channel: "webhook".to_string(),
                delivered: true,
                error: None,
            }],
        }
    }

    #[test]
    fn sqlite_round_trips_records_newest_first() {
        let mut store = SqliteAlertHistory::open_in_memory().unwrap();
        store.append(&record("gate", "2026-01-01T00:00:00Z")).unwrap();
        store.append(&record("lawn", "2026-01-01T00:01:00Z")).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].zone_id, "lawn");
        assert_eq!(recent[1].zone_id, "gate");
        assert_eq!(recent[1].detections[0].frame_ref, 7);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn sqlite_recent_honors_limit() {
        let mut store = SqliteAlertHistory::open_in_memory().unwrap();
        for i in 0..5 {
            store.append(&record("gate", &format!("t{i}"))).unwrap();
        }
        assert_eq!(store.recent(2).unwrap().len(), 2);
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        {
            let mut store = SqliteAlertHistory::open(&path).unwrap();
            store.append(&record("gate", "2026-01-01T00:00:00Z")).unwrap();
        }
        let store = SqliteAlertHistory::open(&path).unwrap();
        assert_eq!(store.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn in_memory_store_orders_like_sqlite() {
        let mut store = InMemoryAlertHistory::new();
        store.append(&record("a", "t0")).unwrap();
        store.append(&record("b", "t1")).unwrap();
        let recent = store.recent(1).unwrap();
        assert_eq!(recent[0].zone_id, "b");
    }
}
