//! # scan4d
//!
//! Core library for a 4-degree-of-freedom photogrammetry scan controller:
//! a motion platform (two linear axes, a turntable, and a tilt servo),
//! dual synchronized cameras, multi-zone LED illumination, and the
//! orchestration that sequences them into a scan with photogrammetry-grade
//! position metadata per image.
//!
//! The crate is organized by hardware subsystem, each exposing a narrow
//! capability trait so the orchestrator (the only component that knows
//! about all three) can be built against either a real backend or the
//! `system.simulation_mode` mocks without caring which:
//!
//! - **`motion`**: the serial protocol engine that speaks the motion
//!   board's streaming G-code dialect ([`motion::protocol`]), and the
//!   axis-aware controller built on top of it ([`motion::controller`]).
//! - **`camera`**: per-camera lifecycle, focus/exposure calibration, and
//!   synchronized dual capture with ISP-stall recovery.
//! - **`lighting`**: PWM zone control with a hard duty-cycle safety cap
//!   and flash/constant illumination regimes.
//! - **`coords`**: pure conversions between the cylindrical camera frame,
//!   the motion board's machine frame, and the Cartesian world frame used
//!   for photogrammetry metadata.
//! - **`pattern`**: grid, cylindrical, and explicit-list scan point
//!   generators.
//! - **`orchestrator`**: the scan state machine that sequences motion,
//!   lighting, and capture per point, with pause/resume/cancel.
//! - **`events`**: the typed, non-blocking publish/subscribe bus used to
//!   report progress and failures to external collaborators.
//! - **`metadata`**: EXIF/XMP/manifest writers emitting photogrammetry
//!   camera-position metadata per image.
//! - **`persistence`**: the storage collaborator's interface, plus an
//!   in-memory implementation for tests and a filesystem implementation.
//! - **`simulation`**: the component factory that wires a fully built
//!   [`simulation::ScanRig`] from [`config::Settings`], real or simulated.
//! - **`config`** / **`validation`**: the startup configuration contract
//!   and its validation pass.
//! - **`error`**: [`error::ScanError`], the cross-subsystem error taxonomy.
//! - **`position`**: the shared `Position4D`/`AxisConfig`/`MotionStatus`
//!   data model every subsystem builds on.

pub mod camera;
pub mod config;
pub mod coords;
pub mod error;
pub mod events;
pub mod lighting;
pub mod metadata;
pub mod motion;
pub mod orchestrator;
pub mod pattern;
pub mod persistence;
pub mod position;
pub mod simulation;
pub mod tracing_setup;
pub mod validation;
