//! Typed view of a decoded frame.

use serde::Serialize;

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::Frame;
use crate::types::*;

/// Any message in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Message {
    /// Controller telemetry.
    Telemetry(TelemetryV1),
    /// Mode switch request.
    ModeSwitch(ModeSwitch),
    /// Setpoint update request.
    Setpoints(Setpoints),
    /// Manual command request.
    ManualCommand(ManualCommand),
    /// Acknowledgement.
    Ack(Ack),
    /// Keep-alive.
    Heartbeat,
}

impl Message {
    /// Decode the payload of `frame` according to its message type.
    ///
    /// Fails with `UnknownMessageType` for types outside the catalog, with
    /// `PayloadLength` when the payload is not exactly the record size, and
    /// with `InvalidValue` for a `ModeSwitch` naming no known mode.
    pub fn decode(frame: &Frame) -> ProtocolResult<Self> {
        let payload = frame.payload.as_slice();
        match frame.msg_type {
            MSG_TELEMETRY_V1 => Ok(Message::Telemetry(TelemetryV1::from_bytes(payload)?)),
            MSG_MODE_SWITCH => {
                let request = ModeSwitch::from_bytes(payload)?;
                if ControlMode::from_wire(request.mode).is_none() {
                    return Err(ProtocolError::InvalidValue {
                        field: "mode",
                        value: request.mode,
                    });
                }
                Ok(Message::ModeSwitch(request))
            }
            MSG_SETPOINTS_V1 => Ok(Message::Setpoints(Setpoints::from_bytes(payload)?)),
            MSG_MANUAL_CMD_V1 => Ok(Message::ManualCommand(ManualCommand::from_bytes(payload)?)),
            MSG_ACK => Ok(Message::Ack(Ack::from_bytes(payload)?)),
            MSG_HEARTBEAT => {
                if payload.is_empty() {
                    Ok(Message::Heartbeat)
                } else {
                    Err(ProtocolError::PayloadLength {
                        msg_type: MSG_HEARTBEAT,
                        expected: 0,
                        actual: payload.len(),
                    })
                }
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    /// Message type identifier.
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Telemetry(_) => MSG_TELEMETRY_V1,
            Message::ModeSwitch(_) => MSG_MODE_SWITCH,
            Message::Setpoints(_) => MSG_SETPOINTS_V1,
            Message::ManualCommand(_) => MSG_MANUAL_CMD_V1,
            Message::Ack(_) => MSG_ACK,
            Message::Heartbeat => MSG_HEARTBEAT,
        }
    }

    /// Encoded payload bytes.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Message::Telemetry(r) => r.to_bytes(),
            Message::ModeSwitch(r) => r.to_bytes(),
            Message::Setpoints(r) => r.to_bytes(),
            Message::ManualCommand(r) => r.to_bytes(),
            Message::Ack(r) => r.to_bytes(),
            Message::Heartbeat => Vec::new(),
        }
    }

    /// Build a frame carrying this message.
    pub fn to_frame(&self, sequence: u8) -> Frame {
        Frame::new(self.msg_type(), sequence, self.payload())
    }

    /// Whether the receiver is expected to answer with an Ack.
    pub fn is_request(&self) -> bool {
        is_request_type(self.msg_type())
    }
}

/// Whether frames of `msg_type` are commands that get acknowledged.
pub fn is_request_type(msg_type: u8) -> bool {
    matches!(
        msg_type,
        MSG_MODE_SWITCH | MSG_SETPOINTS_V1 | MSG_MANUAL_CMD_V1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_each_catalog_entry() {
        let messages = [
            Message::Telemetry(TelemetryV1::default()),
            Message::ModeSwitch(ModeSwitch { mode: MODE_MANUAL }),
            Message::Setpoints(Setpoints::default()),
            Message::ManualCommand(ManualCommand::default()),
            Message::Ack(Ack { acked_msg_type: MSG_SETPOINTS_V1, status: ACK_OK }),
            Message::Heartbeat,
        ];
        for msg in messages {
            let frame = msg.to_frame(5);
            assert_eq!(Message::decode(&frame), Ok(msg));
        }
    }

    #[test]
    fn test_unknown_type() {
        let frame = Frame::new(0x7E, 1, vec![1, 2]);
        assert_eq!(Message::decode(&frame), Err(ProtocolError::UnknownMessageType(0x7E)));
    }

    #[test]
    fn test_bad_length_for_request() {
        let frame = Frame::new(MSG_MANUAL_CMD_V1, 1, vec![0; 12]);
        let err = Message::decode(&frame).unwrap_err();
        assert!(err.warrants_error_ack());
    }

    #[test]
    fn test_mode_outside_catalog_rejected() {
        let frame = Frame::new(MSG_MODE_SWITCH, 3, vec![MODE_AUTO + 1]);
        let err = Message::decode(&frame).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidValue { field: "mode", value: MODE_AUTO + 1 });
        assert!(err.warrants_error_ack());

        let frame = Frame::new(MSG_MODE_SWITCH, 3, vec![MODE_SAFE]);
        assert_eq!(
            Message::decode(&frame),
            Ok(Message::ModeSwitch(ModeSwitch { mode: MODE_SAFE }))
        );
    }

    #[test]
    fn test_request_classification() {
        assert!(Message::ModeSwitch(ModeSwitch { mode: 0 }).is_request());
        assert!(!Message::Heartbeat.is_request());
        assert!(!is_request_type(MSG_TELEMETRY_V1));
        assert!(!is_request_type(MSG_ACK));
    }
}
