//! Axis-aware motion controller.
//!
//! Builds validated, normalized motion on top of [`super::protocol`]'s raw
//! line-command/status-report primitives: soft-limit checks against
//! [`AxisConfig`], continuous-axis shortest-path normalization, and a
//! position cache that is re-queried after every move rather than trusted
//! indefinitely.

use crate::error::{AppResult, ScanError};
use crate::motion::protocol::{EngineState, MotionProtocolEngine};
use crate::position::{normalize_deg, AxisConfig, MachineState, MotionStatus, Position4D};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

const CACHE_MAX_AGE_NS: u64 = 1_000_000_000;
const MOTION_START_SETTLE: Duration = Duration::from_millis(30);
/// Number of consecutive `Idle` status reports, with no non-idle one seen
/// in between, before a command with no observed motion (e.g. a parameter
/// set) is accepted as immediately complete.
const IDLE_WITHOUT_MOTION_POLLS: u32 = 3;

/// Computes the shortest-arc target for the Z (turntable) axis given its
/// current position:
/// `target = current + normalize(requested - current)`.
pub fn shortest_path_target(current_deg: f64, requested_deg: f64) -> f64 {
    current_deg + normalize_deg(requested_deg - current_deg)
}

pub struct MotionController {
    engine: MotionProtocolEngine,
    axes: HashMap<String, AxisConfig>,
    homing_timeout: Duration,
}

impl MotionController {
    pub fn new(engine: MotionProtocolEngine, axes: HashMap<String, AxisConfig>, homing_timeout: Duration) -> AppResult<Self> {
        for (name, axis) in &axes {
            axis.validate()
                .map_err(|e| ScanError::Configuration(format!("axis '{name}': {e}")))?;
        }
        Ok(Self {
            engine,
            axes,
            homing_timeout,
        })
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    fn axis(&self, name: &str) -> AppResult<&AxisConfig> {
        self.axes
            .get(name)
            .ok_or_else(|| ScanError::Configuration(format!("unknown axis '{name}'")))
    }

    /// Validates a bounded axis's target against its soft limits. Continuous
    /// axes have no bound to check; the caller normalizes separately.
    fn check_limit(&self, name: &str, value: f64) -> AppResult<()> {
        let axis = self.axis(name)?;
        if axis.is_continuous() {
            return Ok(());
        }
        if value < axis.min || value > axis.max {
            return Err(ScanError::MotionLimit {
                axis: name.to_string(),
                value,
                min: axis.min,
                max: axis.max,
            });
        }
        Ok(())
    }

    /// Returns the cached position, re-querying the board if the cache is
    /// stale or absent.
    #[instrument(skip(self))]
    pub async fn get_position(&self) -> AppResult<Position4D> {
        if let Some(status) = self.fresh_cached_status() {
            return Ok(status.position_machine);
        }
        let status = self.engine.query_status().await?;
        Ok(status.position_machine)
    }

    fn fresh_cached_status(&self) -> Option<MotionStatus> {
        let status = self.engine.last_status()?;
        if status.is_stale(crate::position::now_ns(), CACHE_MAX_AGE_NS) {
            return None;
        }
        Some(status)
    }

    /// Commands an absolute move of all four axes: Z (turntable) is the
    /// continuous axis and is normalized to its shortest-arc target; X, Y,
    /// and C (tilt) are bounded and validated against their soft limits
    /// before any bytes reach the wire.
    #[instrument(skip(self))]
    pub async fn move_absolute(&self, target: Position4D) -> AppResult<()> {
        self.check_limit("x", target.x)?;
        self.check_limit("y", target.y)?;
        self.check_limit("c", target.c)?;

        let current = self.get_position().await?;
        let z_target = shortest_path_target(current.z, target.z);

        let command = format!(
            "G0 X{:.4} Y{:.4} Z{:.4} C{:.4}",
            target.x, target.y, z_target, target.c
        );
        self.send_and_await_completion(&command).await
    }

    #[instrument(skip(self))]
    pub async fn move_relative(&self, delta: Position4D) -> AppResult<()> {
        let current = self.get_position().await?;
        let target = Position4D::new(
            current.x + delta.x,
            current.y + delta.y,
            current.z + delta.z,
            current.c + delta.c,
        );
        self.move_absolute(target).await
    }

    /// Issues a jog (`$J=`) move; jogs are not position-validated against
    /// the full soft-limit set in the same way as absolute moves since the
    /// board itself enforces limits during jogging.
    #[instrument(skip(self))]
    pub async fn jog(&self, axis: &str, distance: f64, feedrate: f64) -> AppResult<()> {
        self.axis(axis)?;
        let command = format!("$J=G91 {}{:.4} F{:.1}", axis.to_uppercase(), distance, feedrate);
        self.send_and_await_completion(&command).await
    }

    /// Sends one command and waits for completion, retrying once if the
    /// failure is a motion timeout: a second consecutive timeout is fatal
    /// to the scan, but a single stalled ack or idle-poll is often a
    /// transient serial hiccup worth one more attempt. The error that
    /// reaches the caller always carries `retried: true` once this second
    /// attempt has also timed out, so `ScanError::recoverable` can tell a
    /// post-retry timeout apart from a first-attempt one.
    async fn send_and_await_completion(&self, command: &str) -> AppResult<()> {
        match self.send_and_await_completion_once(command).await {
            Err(ScanError::MotionTimeout { .. }) => match self.send_and_await_completion_once(command).await {
                Err(ScanError::MotionTimeout { detail, .. }) => Err(ScanError::MotionTimeout { detail, retried: true }),
                other => other,
            },
            other => other,
        }
    }

    async fn send_and_await_completion_once(&self, command: &str) -> AppResult<()> {
        let ack = match self.engine.send_command(command).await {
            Ok(ack) => ack,
            Err(scan_core::CoreError::Timeout(d)) => {
                return Err(ScanError::MotionTimeout {
                    detail: format!("no ack within {d:?}"),
                    retried: false,
                })
            }
            Err(e) => return Err(e.into()),
        };
        match ack {
            crate::motion::protocol::CommandAck::Ok => {}
            crate::motion::protocol::CommandAck::Error(code) => {
                return Err(ScanError::MotionTimeout {
                    detail: format!("command rejected: error:{code}"),
                    retried: false,
                })
            }
            crate::motion::protocol::CommandAck::Alarm(code) => return Err(ScanError::MotionAlarm(code)),
        }
        self.wait_for_idle().await
    }

    /// Polls status until the board reports a non-idle state followed by
    /// `idle` — per spec.md §4.1, motion is only complete once that
    /// transition has actually been observed, not merely once `Idle` shows
    /// up (a stale report from before the command was processed would
    /// otherwise read as instant completion). A command that never leaves
    /// idle at all (e.g. a parameter set) is still recognized as
    /// immediately complete, via `IDLE_WITHOUT_MOTION_POLLS` consecutive
    /// idle reports with no intervening non-idle one. A short settle delay
    /// precedes the first poll so a move that takes effect just after `ok`
    /// has a chance to be observed in its non-idle state rather than racing
    /// that same stale report.
    async fn wait_for_idle(&self) -> AppResult<()> {
        tokio::time::sleep(MOTION_START_SETTLE).await;
        let mut saw_non_idle = false;
        let mut idle_streak = 0u32;
        loop {
            let status = match self.engine.query_status().await {
                Ok(status) => status,
                Err(scan_core::CoreError::Timeout(d)) => {
                    return Err(ScanError::MotionTimeout {
                        detail: format!("no status report within {d:?}"),
                        retried: false,
                    })
                }
                Err(e) => return Err(e.into()),
            };
            match status.machine_state {
                MachineState::Idle if saw_non_idle => return Ok(()),
                MachineState::Idle => {
                    idle_streak += 1;
                    if idle_streak >= IDLE_WITHOUT_MOTION_POLLS {
                        return Ok(());
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                MachineState::Alarm => return Err(ScanError::MotionAlarm(0)),
                _ => {
                    saw_non_idle = true;
                    idle_streak = 0;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn home_all(&self) -> AppResult<()> {
        self.engine
            .home(self.homing_timeout)
            .await
            .map_err(|e| ScanError::Homing(e.to_string()))
    }

    pub async fn clear_alarm(&self) -> AppResult<()> {
        if self.engine.state() == EngineState::NeedsReset {
            self.engine.reconnect().await?;
        }
        self.engine.unlock().await?;
        Ok(())
    }

    pub async fn emergency_stop(&self) -> AppResult<()> {
        self.engine.emergency_stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::protocol::MotionProtocolEngine;
    use crate::position::AxisKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[test]
    fn shortest_path_prefers_negative_wrap() {
        // current 170, requested -170: going +20 the long way (340deg) vs
        // -20 the short way. Expect target == 190 i.e. equivalent to -170
        // reached by +20.
        let target = shortest_path_target(170.0, -170.0);
        assert!((target - 190.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_path_is_noop_for_same_angle() {
        let target = shortest_path_target(45.0, 45.0);
        assert!((target - 45.0).abs() < 1e-9);
    }

    fn test_axes() -> HashMap<String, AxisConfig> {
        let bounded = |kind| AxisConfig {
            kind,
            units: "mm".into(),
            min: -500.0,
            max: 500.0,
            home: 0.0,
            max_feedrate: 1000.0,
            steps_per_unit: 80.0,
            homing_required: true,
        };
        let mut axes = HashMap::new();
        axes.insert("x".to_string(), bounded(AxisKind::Linear));
        axes.insert("y".to_string(), bounded(AxisKind::Linear));
        axes.insert("c".to_string(), bounded(AxisKind::RotationalBounded));
        axes.insert(
            "z".to_string(),
            AxisConfig {
                kind: AxisKind::RotationalContinuous,
                units: "deg".into(),
                min: -180.0,
                max: 180.0,
                home: 0.0,
                max_feedrate: 1000.0,
                steps_per_unit: 80.0,
                homing_required: false,
            },
        );
        axes
    }

    /// Reads one newline-terminated command line off a raw duplex half
    /// (not a `BufReader`, so this does its own byte-at-a-time buffering).
    async fn read_line(stream: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap()
    }

    async fn read_byte(stream: &mut DuplexStream) -> u8 {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        byte[0]
    }

    /// Emulates the motion board: answers `move_absolute`'s pre-move
    /// `get_position` status query, acks the move command, then on each
    /// subsequent status query answers with `Run` (busy) until
    /// `busy_polls` have been served, then answers `Idle` forever after.
    async fn fake_board_busy_then_idle(mut stream: DuplexStream, busy_polls: u32) {
        assert_eq!(read_byte(&mut stream).await, b'?');
        stream.write_all(b"<Idle|MPos:0.000,0.000,0.000,0.000|F:0>\n").await.unwrap();

        read_line(&mut stream).await;
        stream.write_all(b"ok\n").await.unwrap();

        for _ in 0..busy_polls {
            assert_eq!(read_byte(&mut stream).await, b'?');
            stream.write_all(b"<Run|MPos:1.000,2.000,0.000,0.000|F:100>\n").await.unwrap();
        }
        loop {
            assert_eq!(read_byte(&mut stream).await, b'?');
            stream
                .write_all(b"<Idle|MPos:10.000,20.000,5.000,190.000|F:0>\n")
                .await
                .unwrap();
        }
    }

    /// Emulates a board that answers every status query with `Idle` and
    /// never reports a non-idle state at all — the "command that never
    /// leaves idle" (e.g. a parameter set) case.
    async fn fake_board_always_idle(mut stream: DuplexStream) {
        assert_eq!(read_byte(&mut stream).await, b'?');
        stream.write_all(b"<Idle|MPos:0.000,0.000,0.000,0.000|F:0>\n").await.unwrap();

        read_line(&mut stream).await;
        stream.write_all(b"ok\n").await.unwrap();
        loop {
            assert_eq!(read_byte(&mut stream).await, b'?');
            stream.write_all(b"<Idle|MPos:0.000,0.000,0.000,0.000|F:0>\n").await.unwrap();
        }
    }

    #[tokio::test]
    async fn move_absolute_waits_for_non_idle_before_accepting_idle() {
        let (engine_io, board_io) = tokio::io::duplex(4096);
        let engine = MotionProtocolEngine::from_io(engine_io, Duration::from_secs(2));
        let controller = MotionController::new(engine, test_axes(), Duration::from_secs(1)).unwrap();

        tokio::spawn(fake_board_busy_then_idle(board_io, 2));

        controller
            .move_absolute(Position4D::new(10.0, 20.0, 5.0, 190.0))
            .await
            .unwrap();

        let pos = controller.get_position().await.unwrap();
        assert!((pos.x - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn move_that_never_leaves_idle_still_completes() {
        let (engine_io, board_io) = tokio::io::duplex(4096);
        let engine = MotionProtocolEngine::from_io(engine_io, Duration::from_secs(2));
        let controller = MotionController::new(engine, test_axes(), Duration::from_secs(1)).unwrap();

        tokio::spawn(fake_board_always_idle(board_io));

        // Bounded well within limits; the fake board never leaves `Idle`,
        // simulating a command (e.g. a parameter set) that causes no motion.
        controller
            .move_absolute(Position4D::new(0.0, 0.0, 0.0, 0.0))
            .await
            .unwrap();
    }
}
