//! Repository traits and the row value types they exchange.
//!
//! Implementations must keep each method atomic at the persistence layer:
//! the daily-log upsert in particular is required to be serializable against
//! the streak scan. Errors are boxed so callers can stay storage-agnostic;
//! the engine treats every store failure as retryable and keeps its dirty
//! state in memory.

use std::error::Error;

pub type StoreResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Daily average score at or above this marks the day as meeting the goal.
/// Shared by the upsert (which stamps `meets_goal`) and the streak scan.
pub const STREAK_THRESHOLD: f64 = 70.0;

/// Calibration sensitivity preset. `Custom` means the caller supplied
/// absolute per-metric thresholds instead of a preset multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
    Custom,
}

impl Sensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
            Sensitivity::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Sensitivity::Low),
            "medium" => Some(Sensitivity::Medium),
            "high" => Some(Sensitivity::High),
            "custom" => Some(Sensitivity::Custom),
            _ => None,
        }
    }
}

/// One persisted posture calibration. At most one record per `user_id`
/// is active at any time; the repository enforces this, not the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct PostureCalibrationRecord {
    pub id: i64,
    pub user_id: String,
    pub baseline_pitch_deg: f32,
    pub baseline_ehd: f32,
    pub baseline_dpr: f32,
    pub quality: f32,
    pub sample_count: u32,
    pub sensitivity: Sensitivity,
    pub custom_pitch_threshold: Option<f32>,
    pub custom_ehd_threshold: Option<f32>,
    pub custom_dpr_threshold: Option<f32>,
    pub calibrated_at: i64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Insert payload for a calibration record (`id` and timestamps are assigned
/// by the store).
#[derive(Debug, Clone, PartialEq)]
pub struct NewPostureCalibration {
    pub user_id: String,
    pub baseline_pitch_deg: f32,
    pub baseline_ehd: f32,
    pub baseline_dpr: f32,
    pub quality: f32,
    pub sample_count: u32,
    pub sensitivity: Sensitivity,
    pub custom_pitch_threshold: Option<f32>,
    pub custom_ehd_threshold: Option<f32>,
    pub custom_dpr_threshold: Option<f32>,
    pub calibrated_at: i64,
}

/// Raw detector keypoint snapshot captured alongside a calibration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalibrationBaseline {
    pub created_at: i64,
    pub detector: String,
    pub keypoints_json: String,
}

/// One persisted day of aggregated posture telemetry. `date` is a local
/// calendar date formatted `YYYY-MM-DD` and unique per row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyLog {
    pub id: i64,
    pub date: String,
    pub seconds_in_green: i64,
    pub seconds_in_yellow: i64,
    pub seconds_in_red: i64,
    pub avg_score: f64,
    pub sample_count: i64,
    pub meets_goal: bool,
}

/// An increment to merge into a day's row. The upsert combines averages by
/// sample-count weighting and adds zone seconds, so partitioning a day's
/// samples into any number of deltas yields the same final row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyLogDelta {
    pub date: String,
    pub seconds_in_green: i64,
    pub seconds_in_yellow: i64,
    pub seconds_in_red: i64,
    pub avg_score: f64,
    pub sample_count: i64,
}

pub trait DailyLogStore {
    /// Merge `delta` into the row for `delta.date`, creating it if absent.
    /// Returns the post-merge row.
    fn upsert_day(&self, delta: &DailyLogDelta) -> StoreResult<DailyLog>;

    /// Fetch a single day by its `YYYY-MM-DD` date.
    fn day(&self, date: &str) -> StoreResult<Option<DailyLog>>;

    /// Most recent days in descending date order, at most `limit` rows.
    fn recent_days(&self, limit: usize) -> StoreResult<Vec<DailyLog>>;
}

pub trait CalibrationStore {
    fn insert_calibration(
        &self,
        rec: &NewPostureCalibration,
    ) -> StoreResult<PostureCalibrationRecord>;

    /// Mark `id` active for `user_id`, deactivating any other active record
    /// for that user in the same atomic step.
    fn activate_calibration(&self, user_id: &str, id: i64) -> StoreResult<()>;

    fn active_calibration(&self, user_id: &str) -> StoreResult<Option<PostureCalibrationRecord>>;

    fn insert_baseline_snapshot(&self, row: &NewCalibrationBaseline) -> StoreResult<i64>;
}

pub trait SettingsStore {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}

// Allow boxed trait objects to be used where a generic store is expected.
impl<T: ?Sized + DailyLogStore> DailyLogStore for Box<T> {
    fn upsert_day(&self, delta: &DailyLogDelta) -> StoreResult<DailyLog> {
        (**self).upsert_day(delta)
    }
    fn day(&self, date: &str) -> StoreResult<Option<DailyLog>> {
        (**self).day(date)
    }
    fn recent_days(&self, limit: usize) -> StoreResult<Vec<DailyLog>> {
        (**self).recent_days(limit)
    }
}

impl<T: ?Sized + CalibrationStore> CalibrationStore for Box<T> {
    fn insert_calibration(
        &self,
        rec: &NewPostureCalibration,
    ) -> StoreResult<PostureCalibrationRecord> {
        (**self).insert_calibration(rec)
    }
    fn activate_calibration(&self, user_id: &str, id: i64) -> StoreResult<()> {
        (**self).activate_calibration(user_id, id)
    }
    fn active_calibration(&self, user_id: &str) -> StoreResult<Option<PostureCalibrationRecord>> {
        (**self).active_calibration(user_id)
    }
    fn insert_baseline_snapshot(&self, row: &NewCalibrationBaseline) -> StoreResult<i64> {
        (**self).insert_baseline_snapshot(row)
    }
}

impl<T: ?Sized + SettingsStore> SettingsStore for Box<T> {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get_setting(key)
    }
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set_setting(key, value)
    }
}
