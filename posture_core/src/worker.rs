//! Worker thread hosting the engine.
//!
//! Frames and control messages flow in over bounded channels; ticks and the
//! other engine events flow out over one ordered, lossless channel. The
//! worker processes one frame end-to-end before accepting the next. Pausing
//! is cooperative: the flag is checked at frame entry, an in-progress frame
//! always completes, and frames arriving while paused are discarded.
//!
//! Safety: the worker spawns exactly one thread which is shut down when the
//! handle is dropped, preventing thread leaks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel as xch;
use posture_traits::store::DailyLogStore;

use crate::aggregate::DailyAggregator;
use crate::calibration::CalibrationRequest;
use crate::engine::{ConfigUpdate, Engine, EngineEvent};
use crate::error::EngineError;
use crate::types::{EngineFrame, RiskThresholds};

/// Host-to-core control messages.
#[derive(Debug)]
pub enum ControlMessage {
    SetPaused { paused: bool },
    ConfigUpdate(ConfigUpdate),
    CalibrationStart(CalibrationRequest),
    CalibrationCancel,
    CalibrationApply { thresholds: RiskThresholds },
    Shutdown,
}

pub struct EngineWorker {
    frames_tx: xch::Sender<EngineFrame>,
    control_tx: xch::Sender<ControlMessage>,
    events_rx: xch::Receiver<EngineEvent>,
    paused: Arc<AtomicBool>,
    /// Latched while a resume is in flight so rapid pause/resume cycles
    /// never overlap two engine starts.
    is_starting: Arc<AtomicBool>,
    start_count: Arc<AtomicU64>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl EngineWorker {
    /// Spawn the worker. `store` enables the in-worker daily aggregator;
    /// without it the worker runs compute-only.
    pub fn spawn(
        engine: Engine,
        store: Option<Box<dyn DailyLogStore + Send>>,
        channel_capacity: usize,
    ) -> Self {
        let capacity = channel_capacity.max(1);
        let (frames_tx, frames_rx) = xch::bounded::<EngineFrame>(capacity);
        let (control_tx, control_rx) = xch::bounded::<ControlMessage>(capacity);
        let (events_tx, events_rx) = xch::bounded::<EngineEvent>(capacity * 4);

        let paused = Arc::new(AtomicBool::new(false));
        let is_starting = Arc::new(AtomicBool::new(false));
        let start_count = Arc::new(AtomicU64::new(0));

        let paused_flag = paused.clone();
        let starting_flag = is_starting.clone();
        let starts = start_count.clone();

        let join_handle = std::thread::spawn(move || {
            run_loop(
                engine,
                store.map(DailyAggregator::new),
                &frames_rx,
                &control_rx,
                &events_tx,
                &paused_flag,
                &starting_flag,
                &starts,
            );
            tracing::trace!("engine worker exiting cleanly");
        });

        Self {
            frames_tx,
            control_tx,
            events_rx,
            paused,
            is_starting,
            start_count,
            join_handle: Some(join_handle),
        }
    }

    pub fn send_frame(&self, frame: EngineFrame) -> Result<(), EngineError> {
        self.frames_tx
            .send(frame)
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn events(&self) -> &xch::Receiver<EngineEvent> {
        &self.events_rx
    }

    pub fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        self.control_tx
            .send(ControlMessage::SetPaused { paused })
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), EngineError> {
        self.control_tx
            .send(ControlMessage::ConfigUpdate(update))
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn start_calibration(&self, request: CalibrationRequest) -> Result<(), EngineError> {
        self.control_tx
            .send(ControlMessage::CalibrationStart(request))
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn cancel_calibration(&self) -> Result<(), EngineError> {
        self.control_tx
            .send(ControlMessage::CalibrationCancel)
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn apply_thresholds(&self, thresholds: RiskThresholds) -> Result<(), EngineError> {
        self.control_tx
            .send(ControlMessage::CalibrationApply { thresholds })
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_starting(&self) -> bool {
        self.is_starting.load(Ordering::Acquire)
    }

    /// Number of engine starts issued (initial spawn excluded). Two rapid
    /// resumes must not bump this twice.
    pub fn start_count(&self) -> u64 {
        self.start_count.load(Ordering::Acquire)
    }

    /// Graceful shutdown: drains in-flight frames, flushes the aggregator,
    /// then joins the worker thread.
    pub fn shutdown(mut self) {
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            // Disconnect the event stream first so a worker blocked on a
            // full events channel errors out instead of deadlocking the join.
            let (_tx, dummy_rx) = xch::bounded(0);
            drop(std::mem::replace(&mut self.events_rx, dummy_rx));
            if handle.join().is_err() {
                tracing::warn!("engine worker panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        self.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    mut engine: Engine,
    mut aggregator: Option<DailyAggregator<Box<dyn DailyLogStore + Send>>>,
    frames_rx: &xch::Receiver<EngineFrame>,
    control_rx: &xch::Receiver<ControlMessage>,
    events_tx: &xch::Sender<EngineEvent>,
    paused: &AtomicBool,
    is_starting: &AtomicBool,
    start_count: &AtomicU64,
) {
    'frames: loop {
        xch::select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMessage::Shutdown) | Err(_) => break 'frames,
                    Ok(msg) => handle_control(
                        msg, &mut engine, events_tx, paused, is_starting, start_count,
                    ),
                }
            }
            recv(frames_rx) -> frame => {
                match frame {
                    Ok(frame) => {
                        // Pause flag is checked at frame entry only; an
                        // accepted frame runs to completion.
                        if paused.load(Ordering::Acquire) {
                            continue;
                        }
                        let (tick, events) = engine.process_frame(&frame);
                        if let Some(agg) = aggregator.as_mut() {
                            agg.record(&tick, frame.captured_at as i64);
                            agg.maybe_flush(tick.t);
                        }
                        for event in events {
                            // Lossless: block until the host drains.
                            if events_tx.send(event).is_err() {
                                tracing::debug!("event consumer disconnected, exiting worker");
                                break 'frames;
                            }
                        }
                    }
                    Err(_) => break 'frames,
                }
            }
        }
    }

    if let Some(agg) = aggregator.as_mut() {
        agg.flush();
    }
}

fn handle_control(
    msg: ControlMessage,
    engine: &mut Engine,
    events_tx: &xch::Sender<EngineEvent>,
    paused: &AtomicBool,
    is_starting: &AtomicBool,
    start_count: &AtomicU64,
) {
    match msg {
        ControlMessage::SetPaused { paused: p } => {
            if p {
                paused.store(true, Ordering::Release);
                tracing::debug!("engine paused");
            } else {
                // Resume is debounced behind the starting latch: a resume
                // while already running (or mid-start) is a no-op.
                let was_paused = paused.load(Ordering::Acquire);
                if was_paused
                    && is_starting
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    start_count.fetch_add(1, Ordering::AcqRel);
                    paused.store(false, Ordering::Release);
                    is_starting.store(false, Ordering::Release);
                    tracing::debug!("engine resumed");
                }
            }
        }
        ControlMessage::ConfigUpdate(update) => engine.update_config(&update),
        ControlMessage::CalibrationStart(request) => engine.start_calibration(request),
        ControlMessage::CalibrationCancel => {
            if let Some(event) = engine.cancel_calibration()
                && events_tx.send(event).is_err()
            {
                tracing::debug!("event consumer disconnected during cancel");
            }
        }
        ControlMessage::CalibrationApply { thresholds } => engine.apply_thresholds(thresholds),
        ControlMessage::Shutdown => unreachable!("handled by the caller"),
    }
}
