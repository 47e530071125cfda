//! Drive the engine worker from recorded or synthetic frame streams and
//! render its events as stable JSONL (or compact human lines).

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use posture_config::EngineCfg;
use posture_core::aggregate::{MAX_STREAK_DAYS, local_date, streak_from_rows};
use posture_core::calibration::{CalibrationEvent, CalibrationRequest};
use posture_core::engine::{Engine, EngineEvent};
use posture_core::mocks::{FrameSpec, FrameSynth};
use posture_core::types::{Baseline, EngineFrame, EngineTick, RiskThresholds};
use posture_core::worker::EngineWorker;
use posture_storage::SqliteStore;
use posture_traits::store::{
    CalibrationStore, DailyLogStore, NewPostureCalibration, SettingsStore,
};
use serde_json::json;

pub struct RunOptions {
    pub json: bool,
    pub calibrate: bool,
    pub user: String,
    /// Install a neutral baseline when the store has no active calibration.
    /// Synthetic streams are generated relative to exactly that posture.
    pub assume_neutral_baseline: bool,
    /// Pace frames by their recorded inter-frame gaps instead of replaying
    /// as fast as possible.
    pub realtime: bool,
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub frames: u64,
    pub ticks: u64,
    pub transitions: u64,
    pub last_tick: Option<EngineTick>,
}

/// Replay a JSONL frame recording (`-` reads stdin).
pub fn replay(
    cfg: EngineCfg,
    frames_path: &Path,
    db: Option<&Path>,
    opts: &RunOptions,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<RunStats> {
    let store = open_store(db)?;
    let frames = read_frames(frames_path)?;
    run_frames(cfg, store, frames.into_iter(), opts, shutdown)
}

/// Generate a synthetic stream for one of the canned profiles.
pub fn synth(
    cfg: EngineCfg,
    profile: crate::cli::Profile,
    seconds: u32,
    fps: u32,
    db: Option<&Path>,
    opts: &RunOptions,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<RunStats> {
    let store = open_store(db)?;
    let frames = synth_frames(profile, seconds, fps);
    run_frames(cfg, store, frames.into_iter(), opts, shutdown)
}

/// Print recent daily aggregates and the streak.
pub fn summary(db: &Path, days: usize, json: bool) -> eyre::Result<()> {
    let store = SqliteStore::open(db).wrap_err("open database")?;
    let rows = store
        .recent_days(MAX_STREAK_DAYS)
        .map_err(|e| eyre::eyre!("read daily logs: {e}"))?;
    let today = local_date(now_wall_ms());
    let streak = streak_from_rows(&rows, &today);

    if json {
        let days: Vec<_> = rows
            .iter()
            .take(days)
            .map(|d| {
                json!({
                    "date": d.date,
                    "secondsInGreen": d.seconds_in_green,
                    "secondsInYellow": d.seconds_in_yellow,
                    "secondsInRed": d.seconds_in_red,
                    "avgScore": d.avg_score,
                    "sampleCount": d.sample_count,
                    "meetsGoal": d.meets_goal,
                })
            })
            .collect();
        println!("{}", json!({ "type": "summary", "streak": streak, "days": days }));
    } else {
        println!("streak: {streak} day(s)");
        for d in rows.iter().take(days) {
            println!(
                "{}  green {:>6}s  yellow {:>6}s  red {:>6}s  avg {:>5.1}  samples {:>6}  {}",
                d.date,
                d.seconds_in_green,
                d.seconds_in_yellow,
                d.seconds_in_red,
                d.avg_score,
                d.sample_count,
                if d.meets_goal { "goal met" } else { "-" }
            );
        }
    }
    Ok(())
}

fn now_wall_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn open_store(db: Option<&Path>) -> eyre::Result<Option<SqliteStore>> {
    match db {
        Some(path) => Ok(Some(SqliteStore::open(path).wrap_err("open database")?)),
        None => Ok(None),
    }
}

fn read_frames(path: &Path) -> eyre::Result<Vec<EngineFrame>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        let file = std::fs::File::open(path).wrap_err_with(|| format!("open frames {path:?}"))?;
        Box::new(std::io::BufReader::new(file))
    };

    let mut frames = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.wrap_err("read frames")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .wrap_err_with(|| format!("frame line {} is not JSON", idx + 1))?;
        let frame = EngineFrame::from_json(&value)
            .wrap_err_with(|| format!("frame line {} rejected", idx + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

fn synth_frames(profile: crate::cli::Profile, seconds: u32, fps: u32) -> Vec<EngineFrame> {
    use crate::cli::Profile;
    let fps = fps.max(1);
    let total = (seconds * fps) as usize;
    let mut synth = FrameSynth::at_rate(f64::from(fps));
    let mut frames = Vec::with_capacity(total);
    for i in 0..total {
        let progress = i as f32 / total.max(1) as f32;
        let spec = match profile {
            Profile::Clean => FrameSpec::upright(),
            Profile::Slump => {
                if progress < 0.2 {
                    FrameSpec::upright()
                } else {
                    FrameSpec::slumped()
                }
            }
            Profile::Recovery => {
                if progress < 0.5 {
                    FrameSpec::slumped()
                } else {
                    FrameSpec::upright()
                }
            }
            Profile::Absence => {
                if progress < 0.4 {
                    FrameSpec::upright()
                } else {
                    FrameSpec::absent()
                }
            }
        };
        frames.push(synth.frame(&spec));
    }
    frames
}

fn run_frames(
    cfg: EngineCfg,
    store: Option<SqliteStore>,
    frames: impl Iterator<Item = EngineFrame>,
    opts: &RunOptions,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<RunStats> {
    let mut engine = Engine::new(cfg);
    let mut calibrated = false;

    if let Some(store) = &store
        && let Ok(Some(rec)) = store.active_calibration(&opts.user)
    {
        calibrated = true;
        tracing::info!(user = %opts.user, quality = rec.quality, "active calibration loaded");
        let custom = match (
            rec.custom_pitch_threshold,
            rec.custom_ehd_threshold,
            rec.custom_dpr_threshold,
        ) {
            (None, None, None) => None,
            (p, e, d) => Some(RiskThresholds {
                pitch_deg: p.unwrap_or(0.0),
                ehd: e.unwrap_or(0.0),
                dpr: d.unwrap_or(0.0),
            }),
        };
        engine.set_calibration(
            Baseline {
                pitch_deg: rec.baseline_pitch_deg,
                ehd: rec.baseline_ehd,
                dpr: rec.baseline_dpr,
                quality: rec.quality,
                sample_count: rec.sample_count,
            },
            rec.sensitivity,
            custom,
        );
    }

    if !calibrated && opts.assume_neutral_baseline {
        engine.set_calibration(
            Baseline {
                pitch_deg: 0.0,
                ehd: 0.0,
                dpr: 1.0,
                quality: 100.0,
                sample_count: 0,
            },
            posture_traits::Sensitivity::Medium,
            None,
        );
    }

    let agg_store: Option<Box<dyn DailyLogStore + Send>> = store
        .as_ref()
        .map(|s| Box::new(s.clone()) as Box<dyn DailyLogStore + Send>);
    let worker = EngineWorker::spawn(engine, agg_store, 64);

    if opts.calibrate {
        worker.start_calibration(CalibrationRequest::default())?;
    }

    let mut last_processed_ms: Option<f64> = None;
    let mut stats = RunStats::default();
    for frame in frames {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested, stopping replay");
            break;
        }
        if opts.realtime
            && let Some(prev) = last_processed_ms
        {
            let gap_ms = (frame.processed_at - prev).max(0.0);
            std::thread::sleep(Duration::from_millis(gap_ms as u64));
        }
        last_processed_ms = Some(frame.processed_at);
        worker.send_frame(frame)?;
        stats.frames += 1;
        while let Ok(event) = worker.events().try_recv() {
            handle_event(event, &mut stats, store.as_ref(), opts);
        }
    }

    // Drain the tail: one tick per accepted frame.
    while stats.ticks < stats.frames {
        match worker.events().recv_timeout(Duration::from_secs(5)) {
            Ok(event) => handle_event(event, &mut stats, store.as_ref(), opts),
            Err(_) => break,
        }
    }
    worker.shutdown();

    tracing::info!(
        frames = stats.frames,
        ticks = stats.ticks,
        transitions = stats.transitions,
        "run finished"
    );
    Ok(stats)
}

fn handle_event(
    event: EngineEvent,
    stats: &mut RunStats,
    store: Option<&SqliteStore>,
    opts: &RunOptions,
) {
    match event {
        EngineEvent::Tick(tick) => {
            stats.ticks += 1;
            if opts.json {
                let mut value = serde_json::to_value(&tick).unwrap_or_default();
                value["type"] = "engineTick".into();
                println!("{value}");
            } else if stats.ticks % 50 == 0 || stats.last_tick.is_none() {
                println!(
                    "t={:>8}ms score={:>5.1} zone={:?} state={:?}",
                    tick.t, tick.score, tick.zone, tick.state
                );
            }
            stats.last_tick = Some(tick);
        }
        EngineEvent::Transition(t) => {
            stats.transitions += 1;
            if opts.json {
                println!(
                    "{}",
                    json!({
                        "type": "riskTransition",
                        "from": t.from.as_str(),
                        "to": t.to.as_str(),
                        "atMs": t.at_ms,
                        "timeInConditionsS": t.time_in_conditions_s,
                        "timeInRecoveryS": t.time_in_recovery_s,
                        "reasons": t.reasons,
                    })
                );
            } else {
                println!("transition {} -> {} at {}ms", t.from.as_str(), t.to.as_str(), t.at_ms);
            }
        }
        EngineEvent::Calibration(event) => handle_calibration_event(event, store, opts),
        EngineEvent::Error(err) => {
            tracing::error!(error = %err, "engine error");
            if opts.json {
                println!("{}", json!({ "type": "engineError", "message": err.to_string() }));
            }
        }
    }
}

fn handle_calibration_event(event: CalibrationEvent, store: Option<&SqliteStore>, opts: &RunOptions) {
    match event {
        CalibrationEvent::Progress {
            phase,
            collected_samples,
            target_samples,
            stability_score,
            quality_score,
            rejected_invalid,
            rejected_unreliable,
        } => {
            if opts.json {
                println!(
                    "{}",
                    json!({
                        "type": "calibration.progress",
                        "phase": phase.as_str(),
                        "collectedSamples": collected_samples,
                        "targetSamples": target_samples,
                        "stabilityScore": stability_score,
                        "qualityScore": quality_score,
                        "rejectedInvalid": rejected_invalid,
                        "rejectedUnreliable": rejected_unreliable,
                    })
                );
            }
        }
        CalibrationEvent::Complete(outcome) => {
            if opts.json {
                println!(
                    "{}",
                    json!({
                        "type": "calibration.complete",
                        "baseline": outcome.baseline,
                        "sensitivity": outcome.sensitivity.as_str(),
                        "thresholds": outcome.thresholds,
                        "validation": {
                            "unreliableFrames": outcome.validation.unreliable_frames,
                            "totalFrames": outcome.validation.total_frames,
                            "unreliableRatio": outcome.validation.unreliable_ratio,
                        },
                        "suggestion": outcome.suggestion.as_str(),
                    })
                );
            } else {
                println!(
                    "calibration complete: quality {:.0}, suggestion {}",
                    outcome.baseline.quality,
                    outcome.suggestion.as_str()
                );
            }
            if let Some(store) = store {
                persist_calibration(store, &opts.user, &outcome);
            }
        }
        CalibrationEvent::Failed { reason, message } => {
            tracing::warn!(reason = %reason, message = %message, "calibration failed");
            if opts.json {
                println!(
                    "{}",
                    json!({
                        "type": "calibration.failed",
                        "reason": reason.to_string(),
                        "message": message,
                    })
                );
            } else {
                println!("calibration failed: {reason}: {message}");
            }
        }
    }
}

fn persist_calibration(
    store: &SqliteStore,
    user: &str,
    outcome: &posture_core::calibration::CalibrationOutcome,
) {
    let rec = NewPostureCalibration {
        user_id: user.to_string(),
        baseline_pitch_deg: outcome.baseline.pitch_deg,
        baseline_ehd: outcome.baseline.ehd,
        baseline_dpr: outcome.baseline.dpr,
        quality: outcome.baseline.quality,
        sample_count: outcome.baseline.sample_count,
        sensitivity: outcome.sensitivity,
        custom_pitch_threshold: None,
        custom_ehd_threshold: None,
        custom_dpr_threshold: None,
        calibrated_at: now_wall_ms(),
    };
    match store.insert_calibration(&rec) {
        Ok(row) => {
            if let Err(err) = store.activate_calibration(user, row.id) {
                tracing::error!(error = %err, "failed to activate calibration");
            } else {
                let _ = store.set_setting("active_user", user);
                tracing::info!(id = row.id, user = %user, "calibration persisted");
            }
        }
        Err(err) => tracing::error!(error = %err, "failed to persist calibration"),
    }
}
