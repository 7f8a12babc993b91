//! Serial protocol engine for the motion board.
//!
//! Owns the serial port, frames outbound commands, and parses the board's
//! streaming status reports. This is deliberately the only module that
//! speaks the wire format; [`super::controller::MotionController`] builds
//! axis-aware semantics on top of it and never touches the port directly.
//!
//! `tokio_serial::SerialPortBuilderExt` opens a `SerialStream`, wrapped in
//! `Arc<Mutex<BufReader<_>>>` so a background poller and foreground commands
//! can share one port. On top of that sits a streaming `<state|...>` status
//! parser plus an `ok`/`error:<n>` command acknowledgement channel.

use crate::position::{normalize_deg, MachineState, MotionStatus, Position4D};
use scan_core::{CoreError, CoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, instrument, warn};

/// Anything the protocol engine can frame commands over and parse status
/// reports from: `tokio_serial::SerialStream` for real hardware, or a
/// `tokio::io::DuplexStream` half for tests — the same "type-erase the
/// transport so tests can swap in a duplex pair" split the teacher's
/// `daq-core::serial` module uses for its own serial adapter.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Out-of-band single-byte controls that bypass the line-buffered command
/// queue: the status-query and feed-hold/resume/reset bytes some firmware
/// dialects use alongside line commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeByte {
    StatusQuery,
    FeedHold,
    CycleResume,
    SoftReset,
    JogCancel,
}

impl RealtimeByte {
    fn as_byte(self) -> u8 {
        match self {
            RealtimeByte::StatusQuery => b'?',
            RealtimeByte::FeedHold => b'!',
            RealtimeByte::CycleResume => b'~',
            RealtimeByte::SoftReset => 0x18,
            RealtimeByte::JogCancel => 0x85,
        }
    }
}

/// Lifecycle state of the protocol engine itself, independent of the
/// machine's motion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Ready,
    /// The board reported an alarm; commands are refused until `unlock()`.
    NeedsReset,
    Lost,
}

/// Response to a single line command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAck {
    Ok,
    Error(u32),
    Alarm(u32),
}

struct Shared {
    port: Mutex<BufReader<Box<dyn SerialPortIO>>>,
}

/// Owns the serial connection to the motion board and exposes line-command
/// and status-report primitives. Axis semantics, soft-limit validation, and
/// normalization live one layer up in [`super::controller`].
pub struct MotionProtocolEngine {
    shared: Arc<Shared>,
    state: watch::Sender<EngineState>,
    status: watch::Sender<Option<MotionStatus>>,
    command_timeout: Duration,
    port_path: String,
    baud_rate: u32,
}

impl MotionProtocolEngine {
    /// Opens the serial port and constructs the engine in `Connecting` state.
    /// Callers should follow with a status query to confirm the board
    /// responds before marking the engine `Ready`.
    pub fn connect(port_path: &str, baud_rate: u32, command_timeout: Duration) -> CoreResult<Self> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        let (state_tx, _) = watch::channel(EngineState::Connecting);
        let (status_tx, _) = watch::channel(None);

        Ok(Self {
            shared: Arc::new(Shared {
                port: Mutex::new(BufReader::new(Box::new(port))),
            }),
            state: state_tx,
            status: status_tx,
            command_timeout,
            port_path: port_path.to_string(),
            baud_rate,
        })
    }

    /// Builds an engine over an arbitrary `SerialPortIO` transport, e.g. a
    /// `tokio::io::DuplexStream` half, instead of a real serial port.
    /// `reconnect()` is not meaningful for this constructor since there is
    /// no `port_path` to reopen.
    #[cfg(test)]
    pub(crate) fn from_io(io: impl SerialPortIO + 'static, command_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Connecting);
        let (status_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                port: Mutex::new(BufReader::new(Box::new(io))),
            }),
            state: state_tx,
            status: status_tx,
            command_timeout,
            port_path: String::new(),
            baud_rate: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn last_status(&self) -> Option<MotionStatus> {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Option<MotionStatus>> {
        self.status.subscribe()
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
    }

    /// Reopens the serial port after a `NeedsReset` condition and returns
    /// the engine to `Connecting`. The caller is expected to re-query status
    /// before resuming motion commands: an explicit reconnect path, since
    /// the board does not self-clear an alarm.
    #[instrument(skip(self), fields(port = %self.port_path))]
    pub async fn reconnect(&self) -> CoreResult<()> {
        let port = tokio_serial::new(&self.port_path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;

        let mut guard = self.shared.port.lock().await;
        *guard = BufReader::new(Box::new(port));
        drop(guard);

        self.set_state(EngineState::Connecting);
        Ok(())
    }

    /// Sends a line command and waits for `ok` / `error:<n>` / an
    /// interleaved `ALARM:<n>`, within `command_timeout`.
    #[instrument(skip(self), fields(cmd = %command))]
    pub async fn send_command(&self, command: &str) -> CoreResult<CommandAck> {
        if self.state() == EngineState::NeedsReset {
            return Err(CoreError::SerialPortNotConnected);
        }

        let mut port = self.shared.port.lock().await;
        let framed = format!("{}\n", command.trim_end());
        port.get_mut().write_all(framed.as_bytes()).await?;

        let deadline = self.command_timeout;
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(deadline, port.read_line(&mut line)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CoreError::Io(e)),
                Err(_) => return Err(CoreError::Timeout(deadline)),
            };
            if n == 0 {
                self.set_state(EngineState::Lost);
                return Err(CoreError::SerialUnexpectedEof);
            }

            let trimmed = line.trim();
            debug!(line = %trimmed, "motion board line");

            if let Some(status) = parse_status_report(trimmed) {
                drop(port);
                self.update_status(status);
                port = self.shared.port.lock().await;
                continue;
            }
            if trimmed.eq_ignore_ascii_case("ok") {
                return Ok(CommandAck::Ok);
            }
            if let Some(code) = parse_error(trimmed) {
                return Ok(CommandAck::Error(code));
            }
            if let Some(code) = parse_alarm(trimmed) {
                self.set_state(EngineState::NeedsReset);
                return Ok(CommandAck::Alarm(code));
            }
            // Unrecognized chatter (debug markers, banners): keep reading
            // until an ack line or the timeout elapses.
        }
    }

    /// Writes a realtime control byte immediately, bypassing the command
    /// queue. Does not wait for a response.
    pub async fn send_realtime(&self, byte: RealtimeByte) -> CoreResult<()> {
        let mut port = self.shared.port.lock().await;
        port.get_mut().write_all(&[byte.as_byte()]).await?;
        Ok(())
    }

    /// Issues a status query and reads lines until a status report is seen,
    /// updating the cached status.
    #[instrument(skip(self))]
    pub async fn query_status(&self) -> CoreResult<MotionStatus> {
        let mut port = self.shared.port.lock().await;
        port.get_mut().write_all(&[RealtimeByte::StatusQuery.as_byte()]).await?;

        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(self.command_timeout, port.read_line(&mut line))
                .await
                .map_err(|_| CoreError::Timeout(self.command_timeout))??;
            if n == 0 {
                self.set_state(EngineState::Lost);
                return Err(CoreError::SerialUnexpectedEof);
            }
            if let Some(status) = parse_status_report(line.trim()) {
                drop(port);
                self.update_status(status);
                return Ok(status);
            }
        }
    }

    fn update_status(&self, status: MotionStatus) {
        let _ = self.status.send(Some(status));
        match status.machine_state {
            MachineState::Alarm => self.set_state(EngineState::NeedsReset),
            _ if self.state() == EngineState::Connecting => self.set_state(EngineState::Ready),
            _ => {}
        }
    }

    /// Sends the homing command and polls status until the board's homing
    /// debug marker is seen followed by a subsequent idle report, or the
    /// timeout elapses. See DESIGN.md for the "marker, then idle"
    /// resolution.
    #[instrument(skip(self))]
    pub async fn home(&self, timeout: Duration) -> CoreResult<()> {
        self.send_command("$H").await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut saw_marker = false;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Timeout(timeout));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let mut line = String::new();
            let read = {
                let mut port = self.shared.port.lock().await;
                tokio::time::timeout(remaining, port.read_line(&mut line)).await
            };
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CoreError::Io(e)),
                Err(_) => return Err(CoreError::Timeout(timeout)),
            };
            if n == 0 {
                return Err(CoreError::SerialUnexpectedEof);
            }
            let trimmed = line.trim();
            if is_homing_done_marker(trimmed) {
                saw_marker = true;
                continue;
            }
            if let Some(status) = parse_status_report(trimmed) {
                self.update_status(status);
                if saw_marker && status.machine_state.is_idle() {
                    return Ok(());
                }
            }
            if let Some(code) = parse_alarm(trimmed) {
                self.set_state(EngineState::NeedsReset);
                return Err(CoreError::Malformed(format!("alarm {code} during homing")));
            }
        }
    }

    pub async fn unlock(&self) -> CoreResult<()> {
        let ack = self.send_command("$X").await?;
        if matches!(ack, CommandAck::Ok) {
            self.set_state(EngineState::Ready);
        }
        Ok(())
    }

    pub async fn emergency_stop(&self) -> CoreResult<()> {
        warn!("emergency stop requested");
        self.send_realtime(RealtimeByte::FeedHold).await?;
        let result = self.send_realtime(RealtimeByte::SoftReset).await;
        // Best-effort halt: hardware is signalled immediately, and the
        // engine refuses further non-reset commands until an explicit
        // `reconnect()`.
        self.set_state(EngineState::NeedsReset);
        result
    }
}

/// Recognizes the board's homing-complete debug message, case-insensitively
/// and regardless of surrounding banner text (e.g. `[msg:dbg: homing
/// DONE]`). A board that never emits this marker is not considered homed
/// even if it later reports `<Idle>` (see DESIGN.md).
fn is_homing_done_marker(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("homing") && lower.contains("done")
}

fn parse_error(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("error:")?;
    rest.trim().parse().ok()
}

fn parse_alarm(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("ALARM:")?;
    rest.trim().parse().ok()
}

/// Parses a `<state|MPos:x,y,z,[a,b,]c|F:feed>`-shaped status report.
///
/// Axis count is variable: the first two coordinates are always the linear
/// X/Y axes, and the **last** coordinate is always the C (tilt servo) axis,
/// regardless of how many filler axes a board emits in between. With
/// exactly four reported axes the middle field is Z (turntable rotation).
/// Boards that emit 5- or 6-axis reports put extra filler axes between Z
/// and C; those fillers are consumed but not retained, since this rig has
/// no corresponding physical axis for them.
fn parse_status_report(line: &str) -> Option<MotionStatus> {
    let inner = line.strip_prefix('<')?.strip_suffix('>')?;
    let mut fields = inner.split('|');
    let state_token = fields.next()?;
    let machine_state = MachineState::parse(state_token)?;

    let mut position_machine = Position4D::default();
    let mut feedrate = None;

    for field in fields {
        if let Some(coords) = field.strip_prefix("MPos:").or_else(|| field.strip_prefix("WPos:")) {
            let values: Vec<f64> = coords.split(',').filter_map(|v| v.parse::<f64>().ok()).collect();
            position_machine.x = values.first().copied().unwrap_or(0.0);
            position_machine.y = values.get(1).copied().unwrap_or(0.0);
            position_machine.c = values.last().copied().unwrap_or(0.0);
            // Z is the continuous turntable axis; everything strictly
            // between index 1 and the last slot is a filler the board
            // reports but this rig doesn't use, except the first such slot,
            // which is Z itself on a 4-axis report.
            position_machine.z = normalize_deg(values.get(2).copied().unwrap_or(0.0));
        } else if let Some(fv) = field.strip_prefix("F:") {
            feedrate = fv.parse::<f64>().ok();
        }
    }

    Some(MotionStatus {
        machine_state,
        position_machine,
        feedrate,
        last_update_ns: crate::position::now_ns(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_axis_status_report() {
        let line = "<Idle|MPos:10.000,20.000,5.000,190.000|F:500>";
        let status = parse_status_report(line).expect("should parse");
        assert_eq!(status.machine_state, MachineState::Idle);
        assert!((status.position_machine.x - 10.0).abs() < 1e-9);
        assert!((status.position_machine.y - 20.0).abs() < 1e-9);
        assert!((status.position_machine.z - 5.0).abs() < 1e-9);
        // C (tilt) is reported raw, not wrapped at parse time.
        assert!((status.position_machine.c - 190.0).abs() < 1e-9);
        assert_eq!(status.feedrate, Some(500.0));
    }

    #[test]
    fn treats_filler_axes_as_discarded_between_z_and_c() {
        // 6-axis report: x,y,z,filler,filler,c
        let line = "<Idle|MPos:1.0,2.0,3.0,99.0,99.0,4.0>";
        let status = parse_status_report(line).unwrap();
        assert!((status.position_machine.z - 3.0).abs() < 1e-9);
        assert!((status.position_machine.c - 4.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_status_lines() {
        assert!(parse_status_report("ok").is_none());
        assert!(parse_status_report("error:9").is_none());
    }

    #[test]
    fn parses_alarm_and_error_lines() {
        assert_eq!(parse_error("error:9"), Some(9));
        assert_eq!(parse_alarm("ALARM:1"), Some(1));
        assert_eq!(parse_error("ok"), None);
    }

    #[test]
    fn parses_alarm_state_token() {
        let line = "<Alarm|MPos:0.000,0.000,0.000,0.000>";
        let status = parse_status_report(line).unwrap();
        assert_eq!(status.machine_state, MachineState::Alarm);
    }

    #[test]
    fn recognizes_homing_marker_regardless_of_case_and_banner_text() {
        assert!(is_homing_done_marker("[MSG:DBG: homing DONE]"));
        assert!(is_homing_done_marker("[msg:dbg: homing done]"));
        assert!(!is_homing_done_marker("[MSG:DBG: Homing Cycle Z]"));
        assert!(!is_homing_done_marker("ok"));
    }
}
