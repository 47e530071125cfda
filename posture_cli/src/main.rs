#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! CLI entrypoint for the posture engine.
//!
//! Responsibilities:
//! - Parse config/flags, assemble the engine, worker, and store
//! - Initialize tracing and manage log sinks
//! - Offer `--json` mode emitting stable JSONL lines to stdout (logs to stderr)
//! - Map failure classes to stable exit codes

mod cli;
mod error_fmt;
mod run;
mod tracing_setup;

use std::fs;

use clap::Parser;
use eyre::WrapErr;
use posture_config::EngineCfg;

use cli::{Cli, Commands, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use run::RunOptions;
use tracing_setup::init_tracing;

fn main() -> eyre::Result<()> {
    // Initialize pretty error reports early
    let _ = color_eyre::install();

    // Set up graceful shutdown handler
    let shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let shutdown_clone = std::sync::Arc::clone(&shutdown);

    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived shutdown signal, stopping gracefully...");
        shutdown_clone.store(true, std::sync::atomic::Ordering::SeqCst);
    }) {
        eprintln!("Warning: Failed to set signal handler: {e}");
    }

    if let Err(e) = real_main(&shutdown) {
        let json = *JSON_MODE.get().unwrap_or(&false);
        let code = exit_code_for_error(&e);
        if json {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(code);
    }
    Ok(())
}

fn real_main(shutdown: &std::sync::Arc<std::sync::atomic::AtomicBool>) -> eyre::Result<()> {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    // 1) Load typed config from TOML (defaults when absent), seed from env
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .wrap_err_with(|| format!("read config {path:?}"))?;
            toml::from_str::<EngineCfg>(&text)
                .wrap_err_with(|| format!("parse config {path:?}"))?
        }
        None => EngineCfg::default(),
    };
    posture_config::seed_from_env(&mut cfg);
    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(cli.json, &cli.log_level, cli.log_file.as_deref());

    match cli.cmd {
        Commands::Replay {
            frames,
            db,
            user,
            calibrate,
            realtime,
        } => {
            let opts = RunOptions {
                json: cli.json,
                calibrate,
                user,
                assume_neutral_baseline: false,
                realtime,
            };
            let stats = run::replay(cfg, &frames, db.as_deref(), &opts, shutdown)?;
            if !cli.json
                && let Some(tick) = &stats.last_tick
            {
                println!(
                    "done: {} frames, {} transitions, final score {:.1} ({:?})",
                    stats.frames, stats.transitions, tick.score, tick.zone
                );
            }
        }
        Commands::Synth {
            profile,
            seconds,
            fps,
            db,
        } => {
            let opts = RunOptions {
                json: cli.json,
                calibrate: false,
                user: "default".to_string(),
                assume_neutral_baseline: true,
                realtime: false,
            };
            let stats = run::synth(cfg, profile, seconds, fps, db.as_deref(), &opts, shutdown)?;
            if !cli.json
                && let Some(tick) = &stats.last_tick
            {
                println!(
                    "done: {} frames, {} transitions, final score {:.1} ({:?})",
                    stats.frames, stats.transitions, tick.score, tick.zone
                );
            }
        }
        Commands::Summary { db, days } => run::summary(&db, days, cli.json)?,
    }

    Ok(())
}
