//! Fixed-layout payload records and small protocol enums.
//!
//! Every record is packed little-endian with no padding, matching the layout
//! all three nodes have agreed on. Field order and width must never change.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

// ============================================================================
// Enums
// ============================================================================

/// Controller operating mode as carried by `ModeSwitch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Actuators forced off.
    #[default]
    Safe,
    /// Operator drives actuators.
    Manual,
    /// Controller follows setpoints.
    Auto,
}

impl ControlMode {
    /// Decode a wire mode value.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            MODE_SAFE => Some(ControlMode::Safe),
            MODE_MANUAL => Some(ControlMode::Manual),
            MODE_AUTO => Some(ControlMode::Auto),
            _ => None,
        }
    }

    /// Wire value of this mode.
    pub fn to_wire(self) -> u8 {
        match self {
            ControlMode::Safe => MODE_SAFE,
            ControlMode::Manual => MODE_MANUAL,
            ControlMode::Auto => MODE_AUTO,
        }
    }
}

/// Acknowledgement status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    /// Request applied.
    Ok,
    /// Request rejected.
    Err,
    /// Status value outside the catalog.
    Other(u8),
}

impl From<u8> for AckStatus {
    fn from(value: u8) -> Self {
        match value {
            ACK_OK => AckStatus::Ok,
            ACK_ERR => AckStatus::Err,
            other => AckStatus::Other(other),
        }
    }
}

impl From<AckStatus> for u8 {
    fn from(status: AckStatus) -> Self {
        match status {
            AckStatus::Ok => ACK_OK,
            AckStatus::Err => ACK_ERR,
            AckStatus::Other(code) => code,
        }
    }
}

/// Human-readable name of a message type, for logs.
pub fn msg_type_name(msg_type: u8) -> &'static str {
    match msg_type {
        MSG_TELEMETRY_V1 => "Telemetry",
        MSG_MODE_SWITCH => "ModeSwitch",
        MSG_SETPOINTS_V1 => "Setpoints",
        MSG_MANUAL_CMD_V1 => "ManualCommand",
        MSG_ACK => "Ack",
        MSG_HEARTBEAT => "Heartbeat",
        _ => "Unknown",
    }
}

// ============================================================================
// Sequence Numbers
// ============================================================================

/// Sender-side sequence counter.
///
/// Sequence 0 is reserved so a receiver can tell "never sent" from a valid
/// sequence; the counter yields 1, 2, ..., 255, 1, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    last: u8,
}

impl SequenceCounter {
    /// Counter whose first `next()` returns 1.
    pub fn new() -> Self {
        SequenceCounter { last: 0 }
    }

    /// Counter whose first `next()` follows `last`.
    pub fn starting_after(last: u8) -> Self {
        SequenceCounter { last }
    }

    /// Allocate the next non-zero sequence number.
    pub fn next(&mut self) -> u8 {
        self.last = match self.last.wrapping_add(1) {
            0 => 1,
            seq => seq,
        };
        self.last
    }

    /// Most recently allocated sequence (0 if none yet).
    pub fn last(&self) -> u8 {
        self.last
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Records
// ============================================================================

/// A fixed-layout payload record bound to one message type.
pub trait WireRecord: Sized {
    /// Message type carrying this record.
    const MSG_TYPE: u8;
    /// Exact encoded size in bytes.
    const SIZE: usize;

    /// Append the packed record to `buf`.
    fn put(&self, buf: &mut impl BufMut);

    /// Read the packed record; `buf` holds exactly `SIZE` bytes.
    fn get(buf: &mut impl Buf) -> Self;

    /// Encode to a new buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.put(&mut buf);
        buf
    }

    /// Decode, rejecting any payload whose length is not exactly `SIZE`.
    fn from_bytes(payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() != Self::SIZE {
            return Err(ProtocolError::PayloadLength {
                msg_type: Self::MSG_TYPE,
                expected: Self::SIZE,
                actual: payload.len(),
            });
        }
        let mut buf = payload;
        Ok(Self::get(&mut buf))
    }
}

/// `ModeSwitch` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitch {
    /// Requested mode (`MODE_*`).
    pub mode: u8,
}

impl WireRecord for ModeSwitch {
    const MSG_TYPE: u8 = MSG_MODE_SWITCH;
    const SIZE: usize = 1;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.mode);
    }

    fn get(buf: &mut impl Buf) -> Self {
        ModeSwitch { mode: buf.get_u8() }
    }
}

/// `Ack` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Message type of the acknowledged request.
    pub acked_msg_type: u8,
    /// `ACK_OK` or `ACK_ERR`.
    pub status: u8,
}

impl Ack {
    /// Typed status.
    pub fn status(&self) -> AckStatus {
        AckStatus::from(self.status)
    }
}

impl WireRecord for Ack {
    const MSG_TYPE: u8 = MSG_ACK;
    const SIZE: usize = 2;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.acked_msg_type);
        buf.put_u8(self.status);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Ack {
            acked_msg_type: buf.get_u8(),
            status: buf.get_u8(),
        }
    }
}

/// `ManualCommand` payload. Only channels flagged in `flags` are meant to apply.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ManualCommand {
    /// `MAN_FLAG_*` presence bits.
    pub flags: u8,
    /// Heater power, percent.
    pub heater_pct: f32,
    /// Valve opening, percent.
    pub valve_pct: f32,
    /// Pump target temperature, degrees C.
    pub pump_temp_c: f32,
}

impl WireRecord for ManualCommand {
    const MSG_TYPE: u8 = MSG_MANUAL_CMD_V1;
    const SIZE: usize = 13;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags);
        buf.put_f32_le(self.heater_pct);
        buf.put_f32_le(self.valve_pct);
        buf.put_f32_le(self.pump_temp_c);
    }

    fn get(buf: &mut impl Buf) -> Self {
        ManualCommand {
            flags: buf.get_u8(),
            heater_pct: buf.get_f32_le(),
            valve_pct: buf.get_f32_le(),
            pump_temp_c: buf.get_f32_le(),
        }
    }
}

/// `Setpoints` payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Setpoints {
    /// Target temperature, degrees C.
    pub target_temp_c: f32,
    /// Target pressure, Pa.
    pub target_pressure_pa: f32,
    /// Target valve opening, percent.
    pub target_valve_pct: f32,
    /// Target pump temperature, degrees C.
    pub target_pump_temp_c: f32,
    /// `SP_ENABLE_*` bits.
    pub enable_mask: u8,
}

impl WireRecord for Setpoints {
    const MSG_TYPE: u8 = MSG_SETPOINTS_V1;
    const SIZE: usize = 17;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.target_temp_c);
        buf.put_f32_le(self.target_pressure_pa);
        buf.put_f32_le(self.target_valve_pct);
        buf.put_f32_le(self.target_pump_temp_c);
        buf.put_u8(self.enable_mask);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Setpoints {
            target_temp_c: buf.get_f32_le(),
            target_pressure_pa: buf.get_f32_le(),
            target_valve_pct: buf.get_f32_le(),
            target_pump_temp_c: buf.get_f32_le(),
            enable_mask: buf.get_u8(),
        }
    }
}

/// `TelemetryV1` payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryV1 {
    /// Controller timestamp, ms.
    pub timestamp_ms: u32,
    /// Valid entries in `temp_c` (at most 4).
    pub temp_count: u8,
    /// Temperatures, degrees C; unused entries are 0.
    pub temp_c: [f32; TELEMETRY_TEMP_CHANNELS],
    /// Pressure, Pa.
    pub pressure_pa: f32,
    /// Heater power currently applied, percent.
    pub heater_pct: f32,
    /// Valve opening currently applied, percent.
    pub valve_pct: f32,
}

impl TelemetryV1 {
    /// The valid temperature readings.
    pub fn temperatures(&self) -> &[f32] {
        let n = usize::from(self.temp_count).min(TELEMETRY_TEMP_CHANNELS);
        &self.temp_c[..n]
    }
}

impl WireRecord for TelemetryV1 {
    const MSG_TYPE: u8 = MSG_TELEMETRY_V1;
    const SIZE: usize = 33;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.timestamp_ms);
        buf.put_u8(self.temp_count);
        for t in self.temp_c {
            buf.put_f32_le(t);
        }
        buf.put_f32_le(self.pressure_pa);
        buf.put_f32_le(self.heater_pct);
        buf.put_f32_le(self.valve_pct);
    }

    fn get(buf: &mut impl Buf) -> Self {
        let timestamp_ms = buf.get_u32_le();
        let temp_count = buf.get_u8();
        let mut temp_c = [0.0; TELEMETRY_TEMP_CHANNELS];
        for t in temp_c.iter_mut() {
            *t = buf.get_f32_le();
        }
        TelemetryV1 {
            timestamp_ms,
            temp_count,
            temp_c,
            pressure_pa: buf.get_f32_le(),
            heater_pct: buf.get_f32_le(),
            valve_pct: buf.get_f32_le(),
        }
    }
}
