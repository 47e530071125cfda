//! Per-frame hot path: full pipeline walk on a synthetic stream.

use criterion::{Criterion, criterion_group, criterion_main};
use posture_config::EngineCfg;
use posture_core::engine::Engine;
use posture_core::mocks::{FrameSpec, FrameSynth};
use posture_core::types::Baseline;
use posture_traits::Sensitivity;

fn engine() -> Engine {
    let mut engine = Engine::new(EngineCfg::default());
    engine.set_calibration(
        Baseline {
            pitch_deg: 0.0,
            ehd: 0.0,
            dpr: 1.0,
            quality: 90.0,
            sample_count: 50,
        },
        Sensitivity::Medium,
        None,
    );
    engine
}

fn bench_process_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_frame");

    group.bench_function("upright", |b| {
        let mut eng = engine();
        let mut synth = FrameSynth::new();
        let frame = synth.frame(&FrameSpec::upright());
        b.iter(|| std::hint::black_box(eng.process_frame(&frame)));
    });

    group.bench_function("slumped", |b| {
        let mut eng = engine();
        let mut synth = FrameSynth::new();
        let frame = synth.frame(&FrameSpec::slumped());
        b.iter(|| std::hint::black_box(eng.process_frame(&frame)));
    });

    group.bench_function("absent", |b| {
        let mut eng = engine();
        let mut synth = FrameSynth::new();
        let frame = synth.frame(&FrameSpec::absent());
        b.iter(|| std::hint::black_box(eng.process_frame(&frame)));
    });

    group.finish();
}

criterion_group!(benches, bench_process_frame);
criterion_main!(benches);
