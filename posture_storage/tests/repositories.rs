//! Repository behavior against real SQLite: upsert merge semantics, the
//! one-active-calibration invariant, streak ordering, and reopen durability.

use posture_storage::SqliteStore;
use posture_traits::store::{
    CalibrationStore, DailyLogDelta, DailyLogStore, NewCalibrationBaseline,
    NewPostureCalibration, Sensitivity, SettingsStore,
};

fn delta(date: &str, green: i64, avg: f64, count: i64) -> DailyLogDelta {
    DailyLogDelta {
        date: date.to_string(),
        seconds_in_green: green,
        seconds_in_yellow: 0,
        seconds_in_red: 0,
        avg_score: avg,
        sample_count: count,
    }
}

fn calibration(user: &str) -> NewPostureCalibration {
    NewPostureCalibration {
        user_id: user.to_string(),
        baseline_pitch_deg: 1.5,
        baseline_ehd: 0.05,
        baseline_dpr: 1.0,
        quality: 85.0,
        sample_count: 50,
        sensitivity: Sensitivity::Medium,
        custom_pitch_threshold: None,
        custom_ehd_threshold: None,
        custom_dpr_threshold: None,
        calibrated_at: 1_700_000_000_000,
    }
}

#[test]
fn day_rollover_upserts_then_starts_fresh() {
    // S6: the finished day lands with its weighted average and goal flag,
    // then the new day starts at one sample.
    let store = SqliteStore::in_memory().unwrap();
    let row = store
        .upsert_day(&delta("2025-11-02", 3600, 80.0, 100))
        .unwrap();
    assert_eq!(row.date, "2025-11-02");
    assert!((row.avg_score - 80.0).abs() < 1e-9);
    assert!(row.meets_goal);

    let row = store.upsert_day(&delta("2025-11-03", 1, 92.0, 1)).unwrap();
    assert_eq!(row.sample_count, 1);

    let days = store.recent_days(10).unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].date, "2025-11-03");
    assert_eq!(days[1].date, "2025-11-02");
}

#[test]
fn upsert_merges_weighted_averages() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_day(&delta("2025-11-02", 100, 90.0, 100)).unwrap();
    let row = store.upsert_day(&delta("2025-11-02", 50, 50.0, 100)).unwrap();
    assert_eq!(row.sample_count, 200);
    assert!((row.avg_score - 70.0).abs() < 1e-9);
    assert!(row.meets_goal, "exactly the threshold counts");
    assert_eq!(row.seconds_in_green, 150);
}

#[test]
fn upsert_is_commutative_over_partitions() {
    let parts = [
        delta("2025-11-02", 10, 95.0, 10),
        delta("2025-11-02", 20, 55.0, 30),
        delta("2025-11-02", 5, 75.0, 20),
    ];
    let forward = SqliteStore::in_memory().unwrap();
    for p in &parts {
        forward.upsert_day(p).unwrap();
    }
    let reverse = SqliteStore::in_memory().unwrap();
    for p in parts.iter().rev() {
        reverse.upsert_day(p).unwrap();
    }
    let a = forward.day("2025-11-02").unwrap().unwrap();
    let b = reverse.day("2025-11-02").unwrap().unwrap();
    assert_eq!(a.sample_count, b.sample_count);
    assert_eq!(a.seconds_in_green, b.seconds_in_green);
    assert!((a.avg_score - b.avg_score).abs() < 1e-9);
    assert_eq!(a.meets_goal, b.meets_goal);
}

#[test]
fn below_threshold_average_clears_the_goal_flag() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_day(&delta("2025-11-02", 10, 90.0, 10)).unwrap();
    // A large low-scoring batch drags the day under the threshold.
    let row = store.upsert_day(&delta("2025-11-02", 0, 20.0, 90)).unwrap();
    assert!(row.avg_score < 70.0);
    assert!(!row.meets_goal);
}

#[test]
fn only_one_calibration_is_active_per_user() {
    let store = SqliteStore::in_memory().unwrap();
    let first = store.insert_calibration(&calibration("user-1")).unwrap();
    let second = store.insert_calibration(&calibration("user-1")).unwrap();
    assert!(!first.is_active && !second.is_active);

    store.activate_calibration("user-1", first.id).unwrap();
    store.activate_calibration("user-1", second.id).unwrap();

    let active = store.active_calibration("user-1").unwrap().unwrap();
    assert_eq!(active.id, second.id);
}

#[test]
fn activating_a_foreign_record_fails() {
    let store = SqliteStore::in_memory().unwrap();
    let rec = store.insert_calibration(&calibration("user-1")).unwrap();
    assert!(store.activate_calibration("user-2", rec.id).is_err());
    assert!(store.active_calibration("user-1").unwrap().is_none());
}

#[test]
fn calibration_round_trips_custom_thresholds() {
    let store = SqliteStore::in_memory().unwrap();
    let mut rec = calibration("user-1");
    rec.sensitivity = Sensitivity::Custom;
    rec.custom_pitch_threshold = Some(10.0);
    rec.custom_ehd_threshold = Some(0.2);
    let inserted = store.insert_calibration(&rec).unwrap();
    store.activate_calibration("user-1", inserted.id).unwrap();
    let active = store.active_calibration("user-1").unwrap().unwrap();
    assert_eq!(active.sensitivity, Sensitivity::Custom);
    assert_eq!(active.custom_pitch_threshold, Some(10.0));
    assert_eq!(active.custom_ehd_threshold, Some(0.2));
    assert_eq!(active.custom_dpr_threshold, None);
}

#[test]
fn baseline_snapshots_get_sequential_ids() {
    let store = SqliteStore::in_memory().unwrap();
    let row = NewCalibrationBaseline {
        created_at: 1_700_000_000_000,
        detector: "face-landmarker".to_string(),
        keypoints_json: "[]".to_string(),
    };
    let a = store.insert_baseline_snapshot(&row).unwrap();
    let b = store.insert_baseline_snapshot(&row).unwrap();
    assert!(b > a);
}

#[test]
fn settings_are_upserted_by_key() {
    let store = SqliteStore::in_memory().unwrap();
    assert_eq!(store.get_setting("user_id").unwrap(), None);
    store.set_setting("user_id", "user-1").unwrap();
    store.set_setting("user_id", "user-2").unwrap();
    assert_eq!(store.get_setting("user_id").unwrap(), Some("user-2".to_string()));
}

#[test]
fn data_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posture.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        store.upsert_day(&delta("2025-11-02", 60, 88.0, 10)).unwrap();
        store.set_setting("user_id", "user-1").unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    let row = store.day("2025-11-02").unwrap().unwrap();
    assert_eq!(row.seconds_in_green, 60);
    assert_eq!(store.get_setting("user_id").unwrap(), Some("user-1".to_string()));
}

#[test]
fn recent_days_respects_the_limit_descending() {
    let store = SqliteStore::in_memory().unwrap();
    for day in ["2025-10-30", "2025-11-01", "2025-10-31", "2025-11-02"] {
        store.upsert_day(&delta(day, 1, 80.0, 1)).unwrap();
    }
    let days = store.recent_days(3).unwrap();
    let dates: Vec<&str> = days.iter().map(|d| d.date.as_str()).collect();
    assert_eq!(dates, vec!["2025-11-02", "2025-11-01", "2025-10-31"]);
}
