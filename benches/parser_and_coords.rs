//! Criterion benchmarks for the two hot pure-computation paths: the motion
//! status report's machine-state token parse, and the coordinate
//! transforms run once per scan point (and once per stereo camera within
//! it).
//!
//! These have no I/O and no allocation beyond what `String`/`Vec` already
//! force, so the numbers here are a floor, not a simulation of serial
//! latency — the serial round-trip dominates wall time in practice.
//!
//! Run with: cargo bench --bench parser_and_coords

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scan4d::coords::{stereo_camera_pose, tilt_for_focus_point, StereoConfig, StereoSide};
use scan4d::position::{normalize_deg, MachineState, Position4D};

fn bench_normalize_deg(c: &mut Criterion) {
    let angles = [-540.0, -181.0, -180.0, -1.0, 0.0, 37.5, 179.0, 180.0, 181.0, 540.0];
    c.bench_function("normalize_deg", |b| {
        b.iter(|| {
            for theta in angles {
                black_box(normalize_deg(black_box(theta)));
            }
        });
    });
}

fn bench_machine_state_parse(c: &mut Criterion) {
    let tokens = ["Idle", "Run", "Jog", "Home", "Alarm", "Hold", "Door", "Check", "garbage"];
    c.bench_function("machine_state_parse", |b| {
        b.iter(|| {
            for token in tokens {
                black_box(MachineState::parse(black_box(token)));
            }
        });
    });
}

fn bench_stereo_camera_pose(c: &mut Criterion) {
    let machine = Position4D::new(80.0, 60.0, 137.0, -12.5);
    let stereo = StereoConfig { baseline_mm: 60.0, convergence_angle_deg: 5.0 };
    c.bench_function("stereo_camera_pose_pair", |b| {
        b.iter(|| {
            black_box(stereo_camera_pose(black_box(machine), stereo, StereoSide::Left));
            black_box(stereo_camera_pose(black_box(machine), stereo, StereoSide::Right));
        });
    });
}

fn bench_tilt_for_focus_point(c: &mut Criterion) {
    c.bench_function("tilt_for_focus_point", |b| {
        b.iter(|| {
            black_box(tilt_for_focus_point(black_box(80.0), black_box(40.0), black_box(60.0)));
        });
    });
}

criterion_group!(
    benches,
    bench_normalize_deg,
    bench_machine_state_parse,
    bench_stereo_camera_pose,
    bench_tilt_for_focus_point,
);
criterion_main!(benches);
