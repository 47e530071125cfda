//! Daily aggregation: zone seconds, weighted average score, goal flag, and
//! the streak scan.
//!
//! The accumulator is keyed by the local calendar date. Rolling over a day
//! flushes the finished day before the new day's first sample lands; the
//! periodic flush (every 60 s) merges increments into storage with a
//! weighted-average upsert so partial flushes compose exactly. Store errors
//! keep the dirty state in memory for the next attempt.

use chrono::{Local, TimeZone};
use posture_traits::store::{DailyLog, DailyLogDelta, DailyLogStore};

use crate::types::{EngineTick, Zone};

pub use posture_traits::store::STREAK_THRESHOLD;
/// Upper bound on the streak scan.
pub const MAX_STREAK_DAYS: usize = 365;
/// Cadence of the periodic flush.
pub const PERSIST_INTERVAL_MS: u64 = 60_000;

/// Local calendar date for a wall-clock timestamp in ms.
pub fn local_date(wall_ms: i64) -> String {
    match Local.timestamp_millis_opt(wall_ms) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%Y-%m-%d").to_string()
        }
        chrono::LocalResult::None => Local
            .timestamp_millis_opt(0)
            .unwrap()
            .format("%Y-%m-%d")
            .to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct DayAccumulator {
    date: String,
    seconds_in_green: i64,
    seconds_in_yellow: i64,
    seconds_in_red: i64,
    score_sum: f64,
    sample_count: i64,
    last_tick_ms: Option<u64>,
}

impl DayAccumulator {
    fn new(date: String) -> Self {
        Self {
            date,
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.sample_count == 0
            && self.seconds_in_green == 0
            && self.seconds_in_yellow == 0
            && self.seconds_in_red == 0
    }

    fn delta(&self) -> DailyLogDelta {
        DailyLogDelta {
            date: self.date.clone(),
            seconds_in_green: self.seconds_in_green,
            seconds_in_yellow: self.seconds_in_yellow,
            seconds_in_red: self.seconds_in_red,
            avg_score: if self.sample_count > 0 {
                self.score_sum / self.sample_count as f64
            } else {
                0.0
            },
            sample_count: self.sample_count,
        }
    }
}

pub struct DailyAggregator<S> {
    store: S,
    accumulator: Option<DayAccumulator>,
    last_persist_ms: Option<u64>,
    /// Increments whose upsert failed; retried before any new flush so a
    /// finished day survives a store outage at rollover.
    backlog: Vec<DailyLogDelta>,
}

impl<S: DailyLogStore> DailyAggregator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            accumulator: None,
            last_persist_ms: None,
            backlog: Vec::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fold one tick into the running day. `wall_ms` is the wall-clock time
    /// of the tick, used only for the date key.
    pub fn record(&mut self, tick: &EngineTick, wall_ms: i64) {
        let date = local_date(wall_ms);

        if let Some(acc) = &self.accumulator
            && acc.date != date
        {
            // Day rollover: flush the finished day before the new day's
            // first sample lands.
            self.flush();
            if let Some(acc) = self.accumulator.take()
                && !acc.is_empty()
            {
                // The rollover flush failed; park the finished day so it is
                // retried instead of overwritten by the new date.
                self.backlog.push(acc.delta());
            }
        }
        let acc = self
            .accumulator
            .get_or_insert_with(|| DayAccumulator::new(date));

        let elapsed_seconds = match acc.last_tick_ms {
            Some(prev) => {
                let raw = (tick.t.saturating_sub(prev) as f64 / 1000.0).round() as i64;
                raw.clamp(1, 5)
            }
            None => 1,
        };
        acc.last_tick_ms = Some(tick.t);

        match tick.zone {
            Zone::Green => acc.seconds_in_green += elapsed_seconds,
            Zone::Yellow => acc.seconds_in_yellow += elapsed_seconds,
            Zone::Red => acc.seconds_in_red += elapsed_seconds,
        }
        acc.score_sum += f64::from(tick.score);
        acc.sample_count += 1;
    }

    /// Persist on the periodic cadence. Returns true when a flush ran.
    pub fn maybe_flush(&mut self, now_ms: u64) -> bool {
        let due = match self.last_persist_ms {
            Some(prev) => now_ms.saturating_sub(prev) >= PERSIST_INTERVAL_MS,
            None => true,
        };
        if due {
            self.last_persist_ms = Some(now_ms);
            self.flush();
        }
        due
    }

    /// Upsert the accumulated increment. On success the accumulator resets
    /// to an empty increment for the same day; on failure the dirty state is
    /// kept for the next attempt.
    pub fn flush(&mut self) {
        self.drain_backlog();
        let Some(acc) = &self.accumulator else {
            return;
        };
        if acc.is_empty() {
            return;
        }
        let delta = acc.delta();
        match self.store.upsert_day(&delta) {
            Ok(row) => {
                tracing::trace!(
                    date = %row.date,
                    samples = row.sample_count,
                    avg = row.avg_score,
                    "daily log persisted"
                );
                let date = acc.date.clone();
                let last_tick = acc.last_tick_ms;
                let mut fresh = DayAccumulator::new(date);
                fresh.last_tick_ms = last_tick;
                self.accumulator = Some(fresh);
            }
            Err(err) => {
                tracing::error!(error = %err, date = %delta.date, "daily log upsert failed; keeping dirty state");
            }
        }
    }

    fn drain_backlog(&mut self) {
        while let Some(delta) = self.backlog.first().cloned() {
            match self.store.upsert_day(&delta) {
                Ok(_) => {
                    self.backlog.remove(0);
                }
                Err(err) => {
                    tracing::error!(error = %err, date = %delta.date, "backlog upsert failed");
                    return;
                }
            }
        }
    }

    /// Consecutive goal-met days ending today.
    pub fn streak(&self, today_wall_ms: i64) -> usize {
        let today = local_date(today_wall_ms);
        let rows = match self.store.recent_days(MAX_STREAK_DAYS) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "streak scan failed");
                return 0;
            }
        };
        streak_from_rows(&rows, &today)
    }
}

/// Pure streak computation over rows in descending date order.
pub fn streak_from_rows(rows: &[DailyLog], today: &str) -> usize {
    let Some(first) = rows.first() else {
        return 0;
    };
    if first.date != today || !first.meets_goal {
        return 0;
    }
    let mut streak = 1;
    let mut expected = previous_date(&first.date);
    for row in &rows[1..] {
        if streak >= MAX_STREAK_DAYS {
            break;
        }
        match &expected {
            Some(date) if *date == row.date && row.meets_goal => {
                streak += 1;
                expected = previous_date(&row.date);
            }
            _ => break,
        }
    }
    streak
}

fn previous_date(date: &str) -> Option<String> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    parsed
        .pred_opt()
        .map(|d| d.format("%Y-%m-%d").to_string())
}
