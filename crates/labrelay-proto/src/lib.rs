//! Lab relay wire protocol
//!
//! This crate provides the framing and message catalog shared by every node of
//! the lab control apparatus: the controller, the on-board (air) gateway and the
//! ground gateway. The same framing is used on the wired UART link and inside
//! LoRa packets; only the payload ceiling differs per transport.
//!
//! # Frame Layout
//!
//! ```text
//! +------+------+-----+----------+-----+-------------------+--------+--------+
//! | 0x55 | 0xAA | LEN | MSG_TYPE | SEQ | PAYLOAD[LEN - 4]  | CRC_LO | CRC_HI |
//! +------+------+-----+----------+-----+-------------------+--------+--------+
//! ```
//!
//! `LEN` counts the message type, sequence, payload and the two CRC bytes. The
//! CRC is CRC-16/MODBUS over `[LEN, MSG_TYPE, SEQ, PAYLOAD..]`.
//!
//! # Example
//!
//! ```rust
//! use labrelay_proto::{FrameCodec, ModeSwitch, WireRecord, ControlMode, MAX_PAYLOAD_WIRED};
//!
//! let codec = FrameCodec::new(MAX_PAYLOAD_WIRED);
//! let record = ModeSwitch { mode: ControlMode::Manual.to_wire() };
//! let bytes = codec.encode(ModeSwitch::MSG_TYPE, 7, &record.to_bytes()).unwrap();
//!
//! let mut rx = FrameCodec::new(MAX_PAYLOAD_WIRED);
//! let frames = rx.feed_slice(&bytes);
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].sequence, 7);
//! ```

mod constants;
mod crc;
mod error;
mod frame;
mod message;
mod types;

pub use constants::*;
pub use crc::*;
pub use error::*;
pub use frame::*;
pub use message::*;
pub use types::*;
