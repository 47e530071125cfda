#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! SQLite-backed repositories for the posture engine.
//!
//! One connection behind a mutex, WAL mode, and a migrations table. Every
//! repository method is a single transaction, so the daily-log upsert is
//! serializable against the streak scan. The in-memory constructor backs
//! tests and the degraded no-disk mode.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use posture_traits::store::{
    CalibrationStore, DailyLog, DailyLogDelta, DailyLogStore, NewCalibrationBaseline,
    NewPostureCalibration, PostureCalibrationRecord, STREAK_THRESHOLD, Sensitivity,
    SettingsStore, StoreResult,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("lock poisoned")]
    LockPoisoned,
    #[error("row not found: {0}")]
    NotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS calibration_baselines (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at     INTEGER NOT NULL,
    detector       TEXT NOT NULL,
    keypoints_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS posture_calibration (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                TEXT NOT NULL,
    baseline_pitch         REAL NOT NULL,
    baseline_ehd           REAL NOT NULL,
    baseline_dpr           REAL NOT NULL,
    quality                REAL NOT NULL,
    sample_count           INTEGER NOT NULL,
    sensitivity            TEXT NOT NULL,
    custom_pitch_threshold REAL,
    custom_ehd_threshold   REAL,
    custom_dpr_threshold   REAL,
    calibrated_at          INTEGER NOT NULL,
    is_active              INTEGER NOT NULL DEFAULT 0,
    created_at             INTEGER NOT NULL,
    updated_at             INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_posture_calibration_user
    ON posture_calibration(user_id);

CREATE TABLE IF NOT EXISTS daily_posture_logs (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    date              TEXT NOT NULL UNIQUE,
    seconds_in_green  INTEGER NOT NULL DEFAULT 0,
    seconds_in_yellow INTEGER NOT NULL DEFAULT 0,
    seconds_in_red    INTEGER NOT NULL DEFAULT 0,
    avg_score         REAL NOT NULL DEFAULT 0,
    sample_count      INTEGER NOT NULL DEFAULT 0,
    meets_goal        INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// SQLite store implementing every repository trait. Clone-cheap via `Arc`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file, enable WAL, run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests and the degraded no-disk mode.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn upsert_day_impl(&self, delta: &DailyLogDelta) -> StorageResult<DailyLog> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<DailyLog> = tx
            .query_row(
                "SELECT id, date, seconds_in_green, seconds_in_yellow, seconds_in_red,
                        avg_score, sample_count, meets_goal
                 FROM daily_posture_logs WHERE date = ?1",
                params![delta.date],
                row_to_daily_log,
            )
            .optional()?;

        let merged = match existing {
            Some(row) => {
                let combined = row.sample_count + delta.sample_count;
                let avg = if combined > 0 {
                    (row.avg_score * row.sample_count as f64
                        + delta.avg_score * delta.sample_count as f64)
                        / combined as f64
                } else {
                    0.0
                };
                tx.execute(
                    "UPDATE daily_posture_logs SET
                        seconds_in_green  = seconds_in_green + ?2,
                        seconds_in_yellow = seconds_in_yellow + ?3,
                        seconds_in_red    = seconds_in_red + ?4,
                        avg_score         = ?5,
                        sample_count      = ?6,
                        meets_goal        = ?7
                     WHERE date = ?1",
                    params![
                        delta.date,
                        delta.seconds_in_green,
                        delta.seconds_in_yellow,
                        delta.seconds_in_red,
                        avg,
                        combined,
                        (avg >= STREAK_THRESHOLD) as i64,
                    ],
                )?;
                DailyLog {
                    id: row.id,
                    date: row.date,
                    seconds_in_green: row.seconds_in_green + delta.seconds_in_green,
                    seconds_in_yellow: row.seconds_in_yellow + delta.seconds_in_yellow,
                    seconds_in_red: row.seconds_in_red + delta.seconds_in_red,
                    avg_score: avg,
                    sample_count: combined,
                    meets_goal: avg >= STREAK_THRESHOLD,
                }
            }
            None => {
                let meets_goal = delta.avg_score >= STREAK_THRESHOLD;
                tx.execute(
                    "INSERT INTO daily_posture_logs
                        (date, seconds_in_green, seconds_in_yellow, seconds_in_red,
                         avg_score, sample_count, meets_goal)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        delta.date,
                        delta.seconds_in_green,
                        delta.seconds_in_yellow,
                        delta.seconds_in_red,
                        delta.avg_score,
                        delta.sample_count,
                        meets_goal as i64,
                    ],
                )?;
                DailyLog {
                    id: tx.last_insert_rowid(),
                    date: delta.date.clone(),
                    seconds_in_green: delta.seconds_in_green,
                    seconds_in_yellow: delta.seconds_in_yellow,
                    seconds_in_red: delta.seconds_in_red,
                    avg_score: delta.avg_score,
                    sample_count: delta.sample_count,
                    meets_goal,
                }
            }
        };

        tx.commit()?;
        tracing::trace!(date = %merged.date, samples = merged.sample_count, "day upserted");
        Ok(merged)
    }

    fn day_impl(&self, date: &str) -> StorageResult<Option<DailyLog>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, date, seconds_in_green, seconds_in_yellow, seconds_in_red,
                        avg_score, sample_count, meets_goal
                 FROM daily_posture_logs WHERE date = ?1",
                params![date],
                row_to_daily_log,
            )
            .optional()?)
    }

    fn recent_days_impl(&self, limit: usize) -> StorageResult<Vec<DailyLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, date, seconds_in_green, seconds_in_yellow, seconds_in_red,
                    avg_score, sample_count, meets_goal
             FROM daily_posture_logs ORDER BY date DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_daily_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_calibration_impl(
        &self,
        rec: &NewPostureCalibration,
    ) -> StorageResult<PostureCalibrationRecord> {
        let now = now_ms();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO posture_calibration
                (user_id, baseline_pitch, baseline_ehd, baseline_dpr, quality,
                 sample_count, sensitivity, custom_pitch_threshold,
                 custom_ehd_threshold, custom_dpr_threshold, calibrated_at,
                 is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
            params![
                rec.user_id,
                rec.baseline_pitch_deg as f64,
                rec.baseline_ehd as f64,
                rec.baseline_dpr as f64,
                rec.quality as f64,
                rec.sample_count,
                rec.sensitivity.as_str(),
                rec.custom_pitch_threshold.map(f64::from),
                rec.custom_ehd_threshold.map(f64::from),
                rec.custom_dpr_threshold.map(f64::from),
                rec.calibrated_at,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PostureCalibrationRecord {
            id,
            user_id: rec.user_id.clone(),
            baseline_pitch_deg: rec.baseline_pitch_deg,
            baseline_ehd: rec.baseline_ehd,
            baseline_dpr: rec.baseline_dpr,
            quality: rec.quality,
            sample_count: rec.sample_count,
            sensitivity: rec.sensitivity,
            custom_pitch_threshold: rec.custom_pitch_threshold,
            custom_ehd_threshold: rec.custom_ehd_threshold,
            custom_dpr_threshold: rec.custom_dpr_threshold,
            calibrated_at: rec.calibrated_at,
            is_active: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// The one-active-record-per-user invariant lives here, not in the
    /// schema: deactivate-then-activate inside a single transaction.
    fn activate_calibration_impl(&self, user_id: &str, id: i64) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE posture_calibration SET is_active = 0, updated_at = ?2
             WHERE user_id = ?1 AND is_active = 1",
            params![user_id, now_ms()],
        )?;
        let changed = tx.execute(
            "UPDATE posture_calibration SET is_active = 1, updated_at = ?3
             WHERE id = ?1 AND user_id = ?2",
            params![id, user_id, now_ms()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!(
                "calibration {id} for user {user_id}"
            )));
        }
        tx.commit()?;
        Ok(())
    }

    fn active_calibration_impl(
        &self,
        user_id: &str,
    ) -> StorageResult<Option<PostureCalibrationRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, user_id, baseline_pitch, baseline_ehd, baseline_dpr,
                        quality, sample_count, sensitivity, custom_pitch_threshold,
                        custom_ehd_threshold, custom_dpr_threshold, calibrated_at,
                        is_active, created_at, updated_at
                 FROM posture_calibration
                 WHERE user_id = ?1 AND is_active = 1",
                params![user_id],
                row_to_calibration,
            )
            .optional()?)
    }

    fn insert_baseline_snapshot_impl(&self, row: &NewCalibrationBaseline) -> StorageResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO calibration_baselines (created_at, detector, keypoints_json)
             VALUES (?1, ?2, ?3)",
            params![row.created_at, row.detector, row.keypoints_json],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn row_to_daily_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyLog> {
    Ok(DailyLog {
        id: row.get(0)?,
        date: row.get(1)?,
        seconds_in_green: row.get(2)?,
        seconds_in_yellow: row.get(3)?,
        seconds_in_red: row.get(4)?,
        avg_score: row.get(5)?,
        sample_count: row.get(6)?,
        meets_goal: row.get::<_, i64>(7)? != 0,
    })
}

fn row_to_calibration(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostureCalibrationRecord> {
    let sensitivity: String = row.get(7)?;
    Ok(PostureCalibrationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        baseline_pitch_deg: row.get::<_, f64>(2)? as f32,
        baseline_ehd: row.get::<_, f64>(3)? as f32,
        baseline_dpr: row.get::<_, f64>(4)? as f32,
        quality: row.get::<_, f64>(5)? as f32,
        sample_count: row.get(6)?,
        sensitivity: Sensitivity::parse(&sensitivity).unwrap_or_default(),
        custom_pitch_threshold: row.get::<_, Option<f64>>(8)?.map(|v| v as f32),
        custom_ehd_threshold: row.get::<_, Option<f64>>(9)?.map(|v| v as f32),
        custom_dpr_threshold: row.get::<_, Option<f64>>(10)?.map(|v| v as f32),
        calibrated_at: row.get(11)?,
        is_active: row.get::<_, i64>(12)? != 0,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl DailyLogStore for SqliteStore {
    fn upsert_day(&self, delta: &DailyLogDelta) -> StoreResult<DailyLog> {
        Ok(self.upsert_day_impl(delta)?)
    }
    fn day(&self, date: &str) -> StoreResult<Option<DailyLog>> {
        Ok(self.day_impl(date)?)
    }
    fn recent_days(&self, limit: usize) -> StoreResult<Vec<DailyLog>> {
        Ok(self.recent_days_impl(limit)?)
    }
}

impl CalibrationStore for SqliteStore {
    fn insert_calibration(
        &self,
        rec: &NewPostureCalibration,
    ) -> StoreResult<PostureCalibrationRecord> {
        Ok(self.insert_calibration_impl(rec)?)
    }
    fn activate_calibration(&self, user_id: &str, id: i64) -> StoreResult<()> {
        Ok(self.activate_calibration_impl(user_id, id)?)
    }
    fn active_calibration(&self, user_id: &str) -> StoreResult<Option<PostureCalibrationRecord>> {
        Ok(self.active_calibration_impl(user_id)?)
    }
    fn insert_baseline_snapshot(&self, row: &NewCalibrationBaseline) -> StoreResult<i64> {
        Ok(self.insert_baseline_snapshot_impl(row)?)
    }
}

impl SettingsStore for SqliteStore {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?)
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }
}
