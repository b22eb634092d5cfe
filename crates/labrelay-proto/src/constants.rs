//! Protocol constants
//!
//! These constants define the framing bytes, message type identifiers, mode
//! values, acknowledgement status codes and field-presence flags used by every
//! node on the link. Message type values are the versioned contract: adding a
//! field to a record means allocating a new message type, never changing the
//! length of an existing one.

// ============================================================================
// Framing
// ============================================================================

/// First synchronization byte of every frame.
pub const SYNC1: u8 = 0x55;
/// Second synchronization byte of every frame.
pub const SYNC2: u8 = 0xAA;

/// Bytes counted by `LEN` in addition to the payload (type, sequence, CRC16).
pub const LEN_OVERHEAD: usize = 4;
/// Total bytes a frame adds around its payload (sync, sync, len + `LEN_OVERHEAD`).
pub const FRAME_OVERHEAD: usize = 3 + LEN_OVERHEAD;

/// Payload ceiling on the wired UART link.
pub const MAX_PAYLOAD_WIRED: usize = 44;
/// Payload ceiling inside a LoRa packet.
pub const MAX_PAYLOAD_RADIO: usize = 220;
/// Largest payload the one-byte `LEN` field can describe.
pub const MAX_PAYLOAD_ABSOLUTE: usize = u8::MAX as usize - LEN_OVERHEAD;

// ============================================================================
// Message Types
// ============================================================================

/// Periodic telemetry from the controller.
pub const MSG_TELEMETRY_V1: u8 = 0x01;
/// Switch the controller operating mode.
pub const MSG_MODE_SWITCH: u8 = 0x10;
/// Automatic-mode setpoints.
pub const MSG_SETPOINTS_V1: u8 = 0x11;
/// Manual actuator command.
pub const MSG_MANUAL_CMD_V1: u8 = 0x12;
/// Acknowledgement of a request frame.
pub const MSG_ACK: u8 = 0x20;
/// Link keep-alive, empty payload.
pub const MSG_HEARTBEAT: u8 = 0x23;

// ============================================================================
// Mode Values
// ============================================================================

/// All actuators off.
pub const MODE_SAFE: u8 = 0;
/// Operator drives actuators directly.
pub const MODE_MANUAL: u8 = 1;
/// Controller follows setpoints.
pub const MODE_AUTO: u8 = 2;

// ============================================================================
// Ack Status
// ============================================================================

/// Request applied.
pub const ACK_OK: u8 = 0;
/// Request rejected (bad length or value).
pub const ACK_ERR: u8 = 1;

// ============================================================================
// Field Flags
// ============================================================================

/// Manual command carries a heater power.
pub const MAN_FLAG_HEATER: u8 = 1 << 0;
/// Manual command carries a valve opening.
pub const MAN_FLAG_VALVE: u8 = 1 << 1;
/// Manual command carries a pump temperature target.
pub const MAN_FLAG_PUMP: u8 = 1 << 2;

/// Temperature setpoint enabled.
pub const SP_ENABLE_TEMP: u8 = 1 << 0;
/// Pressure setpoint enabled.
pub const SP_ENABLE_PRESSURE: u8 = 1 << 1;
/// Valve setpoint enabled.
pub const SP_ENABLE_VALVE: u8 = 1 << 2;
/// Pump temperature setpoint enabled.
pub const SP_ENABLE_PUMP: u8 = 1 << 3;

/// Number of temperature channels carried by `TelemetryV1`.
pub const TELEMETRY_TEMP_CHANNELS: usize = 4;
