//! Controller-side transport adapter and the state it feeds.

use labrelay_proto::{
    is_request_type, msg_type_name, Ack, ControlMode, Frame, ManualCommand, Message, Setpoints,
    SequenceCounter, TelemetryV1, WireRecord, ACK_ERR, ACK_OK, MAN_FLAG_HEATER, MAN_FLAG_PUMP,
    MAN_FLAG_VALVE, MSG_ACK, MSG_TELEMETRY_V1, SP_ENABLE_PRESSURE, SP_ENABLE_PUMP, SP_ENABLE_TEMP,
    SP_ENABLE_VALVE, TELEMETRY_TEMP_CHANNELS,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::LinkResult;
use crate::link::FrameLink;

/// Temperature channels a controller can sample.
pub const MAX_TEMP_SENSORS: usize = 8;

// ============================================================================
// Control State
// ============================================================================

/// Most recent setpoints, with the enable bit of each loop decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SetpointState {
    pub target_temp_c: f32,
    pub target_pressure_pa: f32,
    pub target_valve_pct: f32,
    pub target_pump_temp_c: f32,
    pub temp_enabled: bool,
    pub pressure_enabled: bool,
    pub valve_enabled: bool,
    pub pump_enabled: bool,
}

impl SetpointState {
    /// Take over every target and enable bit from a received record.
    pub fn apply(&mut self, sp: &Setpoints) {
        self.target_temp_c = sp.target_temp_c;
        self.target_pressure_pa = sp.target_pressure_pa;
        self.target_valve_pct = sp.target_valve_pct;
        self.target_pump_temp_c = sp.target_pump_temp_c;
        self.temp_enabled = sp.enable_mask & SP_ENABLE_TEMP != 0;
        self.pressure_enabled = sp.enable_mask & SP_ENABLE_PRESSURE != 0;
        self.valve_enabled = sp.enable_mask & SP_ENABLE_VALVE != 0;
        self.pump_enabled = sp.enable_mask & SP_ENABLE_PUMP != 0;
    }
}

/// Most recent manual command, with per-channel presence flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualState {
    pub heater_pct: f32,
    pub valve_pct: f32,
    pub pump_temp_c: f32,
    pub has_heater: bool,
    pub has_valve: bool,
    pub has_pump_temp: bool,
}

impl ManualState {
    pub fn apply(&mut self, cmd: &ManualCommand) {
        self.heater_pct = cmd.heater_pct;
        self.valve_pct = cmd.valve_pct;
        self.pump_temp_c = cmd.pump_temp_c;
        self.has_heater = cmd.flags & MAN_FLAG_HEATER != 0;
        self.has_valve = cmd.flags & MAN_FLAG_VALVE != 0;
        self.has_pump_temp = cmd.flags & MAN_FLAG_PUMP != 0;
    }
}

/// Command-side state shared between the transport and the control loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub mode: ControlMode,
    pub setpoints: SetpointState,
    pub manual: ManualState,
    /// Last request frame of any kind.
    pub last_command_ms: Option<u64>,
    pub last_setpoint_ms: Option<u64>,
    pub last_manual_ms: Option<u64>,
    /// Last structurally valid frame.
    pub last_link_ms: Option<u64>,
    pub link_alive: bool,
}

impl ControlState {
    /// Whether a valid frame arrived within `timeout_ms` before `now_ms`.
    pub fn link_alive_at(&self, now_ms: u64, timeout_ms: u64) -> bool {
        self.link_alive
            && self
                .last_link_ms
                .is_some_and(|last| now_ms.saturating_sub(last) <= timeout_ms)
    }

    /// Back to power-on defaults (Safe mode, nothing received).
    pub fn reset(&mut self) {
        *self = ControlState::default();
    }

    fn mark_link(&mut self, now_ms: u64) {
        self.link_alive = true;
        self.last_link_ms = Some(now_ms);
    }
}

// ============================================================================
// Telemetry Snapshot
// ============================================================================

/// Sensor and actuator readings handed over by the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub temperatures_c: [f32; MAX_TEMP_SENSORS],
    /// Valid entries in `temperatures_c`.
    pub temp_count: usize,
    pub pressure_pa: f32,
    pub heater_pct: f32,
    pub valve_pct: f32,
}

impl TelemetrySnapshot {
    /// Snapshot from a list of temperatures; extra readings past
    /// [`MAX_TEMP_SENSORS`] are ignored.
    pub fn new(temperatures: &[f32], pressure_pa: f32, heater_pct: f32, valve_pct: f32) -> Self {
        let mut temperatures_c = [0.0; MAX_TEMP_SENSORS];
        let temp_count = temperatures.len().min(MAX_TEMP_SENSORS);
        temperatures_c[..temp_count].copy_from_slice(&temperatures[..temp_count]);
        TelemetrySnapshot {
            temperatures_c,
            temp_count,
            pressure_pa,
            heater_pct,
            valve_pct,
        }
    }

    /// Wire record stamped with `timestamp_ms`. Only the first four
    /// temperatures fit; unused slots are zero.
    pub fn to_wire(&self, timestamp_ms: u32) -> TelemetryV1 {
        let count = self.temp_count.min(TELEMETRY_TEMP_CHANNELS);
        let mut temp_c = [0.0; TELEMETRY_TEMP_CHANNELS];
        temp_c[..count].copy_from_slice(&self.temperatures_c[..count]);
        TelemetryV1 {
            timestamp_ms,
            temp_count: count as u8,
            temp_c,
            pressure_pa: self.pressure_pa,
            heater_pct: self.heater_pct,
            valve_pct: self.valve_pct,
        }
    }
}

// ============================================================================
// Controller Link
// ============================================================================

/// Controller-side adapter: applies commands, answers with Acks, sends
/// telemetry.
pub struct ControllerLink<L> {
    link: L,
    tx_sequence: SequenceCounter,
    frames: Vec<Frame>,
    acks_sent: u32,
}

impl<L: FrameLink> ControllerLink<L> {
    pub fn new(link: L) -> Self {
        ControllerLink {
            link,
            tx_sequence: SequenceCounter::new(),
            frames: Vec::new(),
            acks_sent: 0,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Number of Acks sent so far.
    pub fn acks_sent(&self) -> u32 {
        self.acks_sent
    }

    /// Sequence of the last telemetry frame (0 before the first).
    pub fn last_telemetry_sequence(&self) -> u8 {
        self.tx_sequence.last()
    }

    /// Drain and dispatch everything received. Returns the number of frames
    /// handled.
    pub fn poll(&mut self, state: &mut ControlState, now_ms: u64) -> usize {
        let mut frames = std::mem::take(&mut self.frames);
        self.link.poll_frames(&mut frames);
        let count = frames.len();
        for frame in frames.drain(..) {
            self.handle_frame(&frame, state, now_ms);
        }
        self.frames = frames;
        count
    }

    /// Encode and send a telemetry frame on the next non-zero sequence.
    pub fn send_telemetry(&mut self, snapshot: &TelemetrySnapshot, now_ms: u64) -> LinkResult<u8> {
        let sequence = self.tx_sequence.next();
        let record = snapshot.to_wire(now_ms as u32);
        let frame = Frame::new(MSG_TELEMETRY_V1, sequence, record.to_bytes());
        self.link.send_frame(&frame)?;
        trace!("ControllerLink[{}]: telemetry seq {}", self.link.transport(), sequence);
        Ok(sequence)
    }

    fn handle_frame(&mut self, frame: &Frame, state: &mut ControlState, now_ms: u64) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) if is_request_type(frame.msg_type) && e.warrants_error_ack() => {
                debug!(
                    "ControllerLink[{}]: rejecting {} seq {}: {}",
                    self.link.transport(),
                    msg_type_name(frame.msg_type),
                    frame.sequence,
                    e
                );
                self.send_ack(frame, ACK_ERR);
                return;
            }
            Err(e) => {
                trace!("ControllerLink[{}]: dropping frame: {}", self.link.transport(), e);
                return;
            }
        };

        state.mark_link(now_ms);
        if message.is_request() {
            state.last_command_ms = Some(now_ms);
        }

        match message {
            // Out-of-range modes were answered with Ack{Err} by the decode arm.
            Message::ModeSwitch(request) => {
                if let Some(mode) = ControlMode::from_wire(request.mode) {
                    debug!("ControllerLink[{}]: mode -> {:?}", self.link.transport(), mode);
                    state.mode = mode;
                    self.send_ack(frame, ACK_OK);
                }
            }
            Message::Setpoints(setpoints) => {
                state.setpoints.apply(&setpoints);
                state.last_setpoint_ms = Some(now_ms);
                self.send_ack(frame, ACK_OK);
            }
            Message::ManualCommand(command) => {
                state.manual.apply(&command);
                state.last_manual_ms = Some(now_ms);
                self.send_ack(frame, ACK_OK);
            }
            Message::Heartbeat => {
                trace!("ControllerLink[{}]: heartbeat", self.link.transport());
            }
            Message::Telemetry(_) | Message::Ack(_) => {
                trace!(
                    "ControllerLink[{}]: ignoring {}",
                    self.link.transport(),
                    msg_type_name(frame.msg_type)
                );
            }
        }
    }

    /// Answer `request` on its own sequence number.
    fn send_ack(&mut self, request: &Frame, status: u8) {
        let ack = Ack {
            acked_msg_type: request.msg_type,
            status,
        };
        let frame = Frame::new(MSG_ACK, request.sequence, ack.to_bytes());
        match self.link.send_frame(&frame) {
            Ok(()) => self.acks_sent += 1,
            Err(e) => warn!(
                "ControllerLink[{}]: Ack for {} seq {} not sent: {}",
                self.link.transport(),
                msg_type_name(request.msg_type),
                request.sequence,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ByteChannel, MemoryChannel};
    use crate::link::SerialLink;
    use approx::assert_relative_eq;
    use labrelay_proto::{
        FrameCodec, ModeSwitch, MODE_AUTO, MODE_MANUAL, MSG_HEARTBEAT, MSG_MANUAL_CMD_V1,
        MSG_MODE_SWITCH, MSG_SETPOINTS_V1,
    };

    struct Harness {
        controller: ControllerLink<SerialLink<MemoryChannel>>,
        peer: MemoryChannel,
        codec: FrameCodec,
        state: ControlState,
    }

    impl Harness {
        fn new() -> Self {
            let (a, b) = MemoryChannel::pair();
            Harness {
                controller: ControllerLink::new(SerialLink::new(a)),
                peer: b,
                codec: FrameCodec::wired(),
                state: ControlState::default(),
            }
        }

        fn send(&mut self, msg_type: u8, seq: u8, payload: &[u8]) {
            let bytes = self.codec.encode(msg_type, seq, payload).unwrap();
            self.peer.write_all(&bytes).unwrap();
        }

        fn poll(&mut self, now: u64) -> usize {
            self.controller.poll(&mut self.state, now)
        }

        fn replies(&mut self) -> Vec<Frame> {
            let mut buf = Vec::new();
            self.peer.read_available(&mut buf);
            self.codec.feed_slice(&buf)
        }
    }

    fn ack_of(frame: &Frame) -> Ack {
        assert_eq!(frame.msg_type, MSG_ACK);
        Ack::from_bytes(&frame.payload).unwrap()
    }

    #[test]
    fn test_mode_switch_acked_on_request_sequence() {
        let mut h = Harness::new();
        h.send(MSG_MODE_SWITCH, 42, &ModeSwitch { mode: MODE_AUTO }.to_bytes());
        assert_eq!(h.poll(100), 1);

        assert_eq!(h.state.mode, ControlMode::Auto);
        assert_eq!(h.state.last_command_ms, Some(100));
        assert!(h.state.link_alive);

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].sequence, 42);
        assert_eq!(ack_of(&replies[0]), Ack { acked_msg_type: MSG_MODE_SWITCH, status: ACK_OK });
    }

    #[test]
    fn test_invalid_mode_acked_with_error() {
        let mut h = Harness::new();
        h.send(MSG_MODE_SWITCH, 1, &ModeSwitch { mode: MODE_MANUAL }.to_bytes());
        h.poll(0);
        h.replies();

        h.send(MSG_MODE_SWITCH, 2, &[7]);
        h.poll(10);
        assert_eq!(h.state.mode, ControlMode::Manual);
        assert_eq!(h.state.last_command_ms, Some(0));

        let replies = h.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].sequence, 2);
        assert_eq!(ack_of(&replies[0]), Ack { acked_msg_type: MSG_MODE_SWITCH, status: ACK_ERR });
    }

    #[test]
    fn test_bad_length_request_gets_error_ack() {
        let mut h = Harness::new();
        h.send(MSG_SETPOINTS_V1, 5, &[0; 16]);
        h.poll(10);

        let replies = h.replies();
        assert_eq!(replies[0].sequence, 5);
        assert_eq!(ack_of(&replies[0]), Ack { acked_msg_type: MSG_SETPOINTS_V1, status: ACK_ERR });
        assert!(!h.state.link_alive);
        assert_eq!(h.state.last_setpoint_ms, None);
    }

    #[test]
    fn test_unknown_type_dropped_without_ack() {
        let mut h = Harness::new();
        h.send(0x7F, 3, &[1, 2, 3]);
        assert_eq!(h.poll(0), 1);
        assert!(h.replies().is_empty());
        assert!(!h.state.link_alive);
    }

    #[test]
    fn test_setpoints_apply_all_enable_bits() {
        let mut h = Harness::new();
        let sp = Setpoints {
            target_temp_c: 37.5,
            target_pressure_pa: 90_000.0,
            target_valve_pct: 40.0,
            target_pump_temp_c: 12.0,
            enable_mask: SP_ENABLE_TEMP | SP_ENABLE_PUMP,
        };
        h.send(MSG_SETPOINTS_V1, 9, &sp.to_bytes());
        h.poll(250);

        let s = h.state.setpoints;
        assert_relative_eq!(s.target_temp_c, 37.5);
        assert_relative_eq!(s.target_pump_temp_c, 12.0);
        assert!(s.temp_enabled && s.pump_enabled);
        assert!(!s.pressure_enabled && !s.valve_enabled);
        assert_eq!(h.state.last_setpoint_ms, Some(250));
        assert_eq!(ack_of(&h.replies()[0]).status, ACK_OK);
    }

    #[test]
    fn test_manual_command_flags() {
        let mut h = Harness::new();
        let cmd = ManualCommand {
            flags: MAN_FLAG_VALVE,
            heater_pct: 10.0,
            valve_pct: 55.0,
            pump_temp_c: 0.0,
        };
        h.send(MSG_MANUAL_CMD_V1, 2, &cmd.to_bytes());
        h.poll(5);

        assert!(h.state.manual.has_valve);
        assert!(!h.state.manual.has_heater);
        assert_relative_eq!(h.state.manual.valve_pct, 55.0);
        assert_eq!(h.state.last_manual_ms, Some(5));
        assert_eq!(h.controller.acks_sent(), 1);
    }

    #[test]
    fn test_heartbeat_marks_link_without_ack() {
        let mut h = Harness::new();
        h.send(MSG_HEARTBEAT, 1, &[]);
        h.poll(1_000);
        assert!(h.state.link_alive_at(1_500, 1_500));
        assert!(!h.state.link_alive_at(2_501, 1_500));
        assert_eq!(h.state.last_command_ms, None);
        assert!(h.replies().is_empty());
    }

    #[test]
    fn test_telemetry_sequence_skips_zero() {
        let mut h = Harness::new();
        let snapshot = TelemetrySnapshot::new(&[20.0, 21.0], 101_325.0, 0.0, 0.0);
        for expected in 1..=255u8 {
            assert_eq!(h.controller.send_telemetry(&snapshot, 0).unwrap(), expected);
        }
        assert_eq!(h.controller.send_telemetry(&snapshot, 0).unwrap(), 1);
        let frames = h.replies();
        assert_eq!(frames.len(), 256);
        assert!(frames.iter().all(|f| f.sequence != 0));
    }

    #[test]
    fn test_telemetry_snapshot_to_wire() {
        let temps = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let snapshot = TelemetrySnapshot::new(&temps, 500.0, 25.0, 75.0);
        assert_eq!(snapshot.temp_count, MAX_TEMP_SENSORS);

        let wire = snapshot.to_wire(1234);
        assert_eq!(wire.timestamp_ms, 1234);
        assert_eq!(wire.temp_count, 4);
        assert_eq!(wire.temperatures(), &[1.0, 2.0, 3.0, 4.0]);

        let short = TelemetrySnapshot::new(&[30.0], 0.0, 0.0, 0.0).to_wire(0);
        assert_eq!(short.temp_c, [30.0, 0.0, 0.0, 0.0]);
    }
}
