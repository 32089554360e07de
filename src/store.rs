//! Alert persistence.
//!
//! `AlertStore` is the only persistence seam the pipeline sees. The SQLite
//! store is what the daemon and `zonewatchctl` use; the in-memory store
//! backs tests and embedders that inject their own `Components`.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::alert::{from_epoch_ms, to_epoch_ms, AlertRecord, StoredAlert};
use crate::error::PersistenceError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const WEEK_MS: i64 = 7 * DAY_MS;
const ACTIVE: &str = "active";

pub trait AlertStore: Send {
    /// Durably append one alert; returns its id.
    fn append_alert(&mut self, record: &AlertRecord) -> Result<i64, PersistenceError>;

    /// Record the clip produced for alert `id`.
    fn attach_video(&mut self, id: i64, path: &Path) -> Result<(), PersistenceError>;

    /// Up to `limit` alerts, newest first.
    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<StoredAlert>, PersistenceError>;

    /// Activity summary relative to `now`.
    fn stats(&mut self, now: SystemTime) -> Result<AlertStats, PersistenceError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AlertStats {
    /// Alerts since the start of the current UTC day.
    pub alerts_today: u64,
    /// Alerts in the trailing seven days.
    pub alerts_week: u64,
    pub most_active_zone: Option<String>,
    pub zone_activity_count: u64,
}

fn day_start_ms(now_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(DAY_MS)
}

// -------------------- SQLite --------------------

pub struct SqliteAlertStore {
    conn: Connection,
}

impl SqliteAlertStore {
    /// Open (creating parent directories and schema as needed).
    pub fn open(db_path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              triggered_at_ms INTEGER NOT NULL,
              alert_type TEXT NOT NULL,
              confidence REAL NOT NULL,
              zone_name TEXT NOT NULL,
              coordinates TEXT NOT NULL,
              video_path TEXT,
              status TEXT NOT NULL DEFAULT 'active',
              notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_triggered ON alerts(triggered_at_ms);
            "#,
        )?;
        Ok(())
    }
}

impl AlertStore for SqliteAlertStore {
    fn append_alert(&mut self, record: &AlertRecord) -> Result<i64, PersistenceError> {
        let coordinates = serde_json::to_string(&record.coordinates)?;
        let video_path = record
            .video_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        self.conn.execute(
            r#"
            INSERT INTO alerts(triggered_at_ms, alert_type, confidence, zone_name, coordinates, video_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                to_epoch_ms(record.triggered_at),
                record.alert_type,
                record.confidence as f64,
                record.zone_name,
                coordinates,
                video_path
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn attach_video(&mut self, id: i64, path: &Path) -> Result<(), PersistenceError> {
        let updated = self.conn.execute(
            "UPDATE alerts SET video_path = ?1 WHERE id = ?2",
            params![path.to_string_lossy().into_owned(), id],
        )?;
        if updated == 0 {
            return Err(PersistenceError::NotFound(id));
        }
        Ok(())
    }

    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<StoredAlert>, PersistenceError> {
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, triggered_at_ms, alert_type, confidence, zone_name, coordinates, video_path, status
                FROM alerts
                ORDER BY triggered_at_ms DESC, id DESC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut out = Vec::with_capacity(rows.len());
        for (id, ts, alert_type, confidence, zone_name, coordinates, video_path, status) in rows {
            out.push(StoredAlert {
                id,
                status,
                record: AlertRecord {
                    alert_type,
                    zone_name,
                    confidence: confidence as f32,
                    coordinates: serde_json::from_str(&coordinates)?,
                    video_path: video_path.map(Into::into),
                    triggered_at: from_epoch_ms(ts),
                },
            });
        }
        Ok(out)
    }

    fn stats(&mut self, now: SystemTime) -> Result<AlertStats, PersistenceError> {
        let now_ms = to_epoch_ms(now);
        let week_start = now_ms - WEEK_MS;

        let alerts_today: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE triggered_at_ms >= ?1 AND triggered_at_ms <= ?2",
            params![day_start_ms(now_ms), now_ms],
            |row| row.get(0),
        )?;
        let alerts_week: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE triggered_at_ms >= ?1 AND triggered_at_ms <= ?2",
            params![week_start, now_ms],
            |row| row.get(0),
        )?;
        let most_active: Option<(String, i64)> = self
            .conn
            .query_row(
                r#"
                SELECT zone_name, COUNT(*) AS n
                FROM alerts
                WHERE triggered_at_ms >= ?1 AND triggered_at_ms <= ?2
                GROUP BY zone_name
                ORDER BY n DESC, zone_name ASC
                LIMIT 1
                "#,
                params![week_start, now_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(AlertStats {
            alerts_today: alerts_today as u64,
            alerts_week: alerts_week as u64,
            zone_activity_count: most_active.as_ref().map(|(_, n)| *n as u64).unwrap_or(0),
            most_active_zone: most_active.map(|(zone, _)| zone),
        })
    }
}

// -------------------- In-memory --------------------

#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Vec<StoredAlert>,
    next_id: i64,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl AlertStore for InMemoryAlertStore {
    fn append_alert(&mut self, record: &AlertRecord) -> Result<i64, PersistenceError> {
        self.next_id += 1;
        self.alerts.push(StoredAlert {
            id: self.next_id,
            status: ACTIVE.to_string(),
            record: record.clone(),
        });
        Ok(self.next_id)
    }

    fn attach_video(&mut self, id: i64, path: &Path) -> Result<(), PersistenceError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(PersistenceError::NotFound(id))?;
        alert.record.video_path = Some(path.to_path_buf());
        Ok(())
    }

    fn recent_alerts(&mut self, limit: usize) -> Result<Vec<StoredAlert>, PersistenceError> {
        let mut alerts = self.alerts.clone();
        alerts.sort_by(|a, b| {
            b.record
                .triggered_at
                .cmp(&a.record.triggered_at)
                .then(b.id.cmp(&a.id))
        });
        alerts.truncate(limit);
        Ok(alerts)
    }

    fn stats(&mut self, now: SystemTime) -> Result<AlertStats, PersistenceError> {
        let now_ms = to_epoch_ms(now);
        let today = day_start_ms(now_ms);
        let week_start = now_ms - WEEK_MS;

        let mut stats = AlertStats::default();
        let mut per_zone: HashMap<&str, u64> = HashMap::new();
        for alert in &self.alerts {
            let ts = to_epoch_ms(alert.record.triggered_at);
            if ts > now_ms {
                continue;
            }
            if ts >= today {
                stats.alerts_today += 1;
            }
            if ts >= week_start {
                stats.alerts_week += 1;
                *per_zone.entry(alert.record.zone_name.as_str()).or_default() += 1;
            }
        }
        if let Some((zone, count)) = per_zone
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        {
            stats.most_active_zone = Some(zone.to_string());
            stats.zone_activity_count = count;
        }
        Ok(stats)
    }
}
