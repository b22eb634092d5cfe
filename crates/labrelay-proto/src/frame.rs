//! Frame encoding/decoding.
//!
//! The decoder is a byte-at-a-time state machine so it can be driven straight
//! from a UART receive loop or from the contents of a radio packet:
//!
//! ```text
//! WaitSync1 -> WaitSync2 -> WaitLen -> WaitBody -> (emit | drop) -> WaitSync1
//! ```
//!
//! Nothing partially received or failing its CRC is ever handed to a caller.

use bytes::{BufMut, BytesMut};

use crate::constants::*;
use crate::crc::{crc16_modbus, crc16_modbus_update};
use crate::error::{ProtocolError, ProtocolResult};

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type identifier (see `MSG_*`).
    pub msg_type: u8,
    /// Sender sequence number.
    pub sequence: u8,
    /// Payload bytes, at most the codec's `max_payload`.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    pub fn new(msg_type: u8, sequence: u8, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            msg_type,
            sequence,
            payload: payload.into(),
        }
    }
}

/// Counters kept by a [`FrameCodec`] while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Frames that passed the CRC check.
    pub frames: u64,
    /// Frames dropped on CRC mismatch.
    pub crc_errors: u64,
    /// Length bytes rejected as out of range.
    pub length_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    WaitSync1,
    WaitSync2,
    WaitLen,
    WaitBody,
}

/// Streaming frame decoder and encoder for one transport.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload: usize,
    state: ParseState,
    len: u8,
    /// `[MSG_TYPE, SEQ, PAYLOAD.., CRC_LO, CRC_HI]` of the frame in progress.
    body: BytesMut,
    stats: CodecStats,
}

impl FrameCodec {
    /// Create a codec accepting payloads up to `max_payload` bytes.
    ///
    /// The ceiling is capped at what the one-byte length field can express.
    pub fn new(max_payload: usize) -> Self {
        let max_payload = max_payload.min(MAX_PAYLOAD_ABSOLUTE);
        FrameCodec {
            max_payload,
            state: ParseState::WaitSync1,
            len: 0,
            body: BytesMut::with_capacity(max_payload + LEN_OVERHEAD),
            stats: CodecStats::default(),
        }
    }

    /// Codec sized for the wired UART link.
    pub fn wired() -> Self {
        Self::new(MAX_PAYLOAD_WIRED)
    }

    /// Codec sized for LoRa packets.
    pub fn radio() -> Self {
        Self::new(MAX_PAYLOAD_RADIO)
    }

    /// Payload ceiling of this codec.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Decode statistics since creation.
    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    /// Drop any frame in progress and wait for the next sync sequence.
    pub fn reset(&mut self) {
        self.state = ParseState::WaitSync1;
        self.len = 0;
        self.body.clear();
    }

    /// Feed one received byte.
    ///
    /// Returns `Some(frame)` when this byte completes a frame whose CRC checks
    /// out. Any framing error silently restarts the parser.
    pub fn feed(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ParseState::WaitSync1 => {
                if byte == SYNC1 {
                    self.state = ParseState::WaitSync2;
                }
                None
            }
            ParseState::WaitSync2 => {
                if byte == SYNC2 {
                    self.state = ParseState::WaitLen;
                } else if byte != SYNC1 {
                    // A repeated SYNC1 may itself start the next frame.
                    self.state = ParseState::WaitSync1;
                }
                None
            }
            ParseState::WaitLen => {
                let len = usize::from(byte);
                if !(LEN_OVERHEAD..=self.max_payload + LEN_OVERHEAD).contains(&len) {
                    log::trace!("frame length {} out of range, resyncing", len);
                    self.stats.length_errors += 1;
                    self.reset();
                    return None;
                }
                self.len = byte;
                self.body.clear();
                self.state = ParseState::WaitBody;
                None
            }
            ParseState::WaitBody => {
                self.body.put_u8(byte);
                if self.body.len() < usize::from(self.len) {
                    return None;
                }
                let frame = self.finish_body();
                self.reset();
                frame
            }
        }
    }

    /// Feed a run of bytes, returning every frame they complete in order.
    pub fn feed_slice(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.feed(b)).collect()
    }

    fn finish_body(&mut self) -> Option<Frame> {
        let len = usize::from(self.len);
        let data_len = len - 2;
        let received = u16::from_le_bytes([self.body[data_len], self.body[data_len + 1]]);
        let computed = crc16_modbus_update(crc16_modbus(&[self.len]), &self.body[..data_len]);

        if computed != received {
            log::trace!(
                "frame CRC mismatch: computed 0x{:04X}, received 0x{:04X}",
                computed,
                received
            );
            self.stats.crc_errors += 1;
            return None;
        }

        self.stats.frames += 1;
        Some(Frame {
            msg_type: self.body[0],
            sequence: self.body[1],
            payload: self.body[2..data_len].to_vec(),
        })
    }

    /// Encode a frame, refusing payloads above this codec's ceiling.
    pub fn encode(&self, msg_type: u8, sequence: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
        if payload.len() > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                max: self.max_payload,
                actual: payload.len(),
            });
        }
        Ok(write_frame(msg_type, sequence, payload))
    }

    /// Encode an already-built [`Frame`].
    pub fn encode_frame(&self, frame: &Frame) -> ProtocolResult<Vec<u8>> {
        self.encode(frame.msg_type, frame.sequence, &frame.payload)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::radio()
    }
}

/// Encode a frame without a transport-specific ceiling.
///
/// Only the length field's own limit applies.
pub fn encode_frame(msg_type: u8, sequence: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_ABSOLUTE {
        return Err(ProtocolError::PayloadTooLarge {
            max: MAX_PAYLOAD_ABSOLUTE,
            actual: payload.len(),
        });
    }
    Ok(write_frame(msg_type, sequence, payload))
}

fn write_frame(msg_type: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + LEN_OVERHEAD) as u8;
    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.put_u8(SYNC1);
    buf.put_u8(SYNC2);
    buf.put_u8(len);
    buf.put_u8(msg_type);
    buf.put_u8(sequence);
    buf.extend_from_slice(payload);
    let crc = crc16_modbus(&buf[2..]);
    buf.put_u16_le(crc);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = encode_frame(MSG_ACK, 9, &[0x10, 0x00]).expect("encode");
        assert_eq!(encoded.len(), 2 + FRAME_OVERHEAD);
        assert_eq!(&encoded[..5], &[0x55, 0xAA, 6, MSG_ACK, 9]);
        assert_eq!(&encoded[5..7], &[0x10, 0x00]);

        let crc = crc16_modbus(&encoded[2..7]);
        assert_eq!(encoded[7], (crc & 0xFF) as u8);
        assert_eq!(encoded[8], (crc >> 8) as u8);
    }

    #[test]
    fn test_round_trip_boundary_sizes() {
        for max in [MAX_PAYLOAD_WIRED, MAX_PAYLOAD_RADIO] {
            let mut codec = FrameCodec::new(max);
            for len in [0, 1, max] {
                let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
                let bytes = codec.encode(0x11, 200, &payload).expect("encode");
                let frames = codec.feed_slice(&bytes);
                assert_eq!(frames, vec![Frame::new(0x11, 200, payload)]);
            }
        }
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let codec = FrameCodec::wired();
        let err = codec.encode(0x01, 1, &[0u8; MAX_PAYLOAD_WIRED + 1]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooLarge {
                max: MAX_PAYLOAD_WIRED,
                actual: MAX_PAYLOAD_WIRED + 1
            }
        );
        assert!(encode_frame(0x01, 1, &[0u8; 252]).is_err());
    }

    #[test]
    fn test_crc_bit_flip_rejected_then_recovers() {
        let good = encode_frame(MSG_MODE_SWITCH, 3, &[MODE_AUTO]).expect("encode");
        let crc_offset = good.len() - 2;

        for bit in 0..16 {
            let mut codec = FrameCodec::wired();
            let mut corrupted = good.clone();
            corrupted[crc_offset + bit / 8] ^= 1 << (bit % 8);

            assert!(codec.feed_slice(&corrupted).is_empty(), "bit {} accepted", bit);
            assert_eq!(codec.stats().crc_errors, 1);

            let frames = codec.feed_slice(&good);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].payload, vec![MODE_AUTO]);
        }
    }

    #[test]
    fn test_length_bounds_do_not_desync() {
        let mut codec = FrameCodec::wired();
        let good = encode_frame(MSG_HEARTBEAT, 4, &[]).expect("encode");

        for bad_len in [3u8, (MAX_PAYLOAD_WIRED + 5) as u8] {
            let mut stream = vec![SYNC1, SYNC2, bad_len, 0x01, 0x02, 0x03];
            stream.extend_from_slice(&good);
            let frames = codec.feed_slice(&stream);
            assert_eq!(frames, vec![Frame::new(MSG_HEARTBEAT, 4, Vec::new())]);
        }
        assert_eq!(codec.stats().length_errors, 2);
    }

    #[test]
    fn test_radio_accepts_lengths_wired_rejects() {
        let payload = [0x5Au8; 100];
        let bytes = encode_frame(0x01, 1, &payload).expect("encode");

        assert!(FrameCodec::wired().feed_slice(&bytes).is_empty());
        assert_eq!(FrameCodec::radio().feed_slice(&bytes).len(), 1);
    }

    #[test]
    fn test_garbage_and_repeated_sync() {
        let mut codec = FrameCodec::wired();
        let frame = encode_frame(MSG_ACK, 1, &[MSG_MANUAL_CMD_V1, ACK_OK]).expect("encode");

        let mut stream = vec![0x00, 0xFF, 0x55, 0x13, 0x55];
        stream.extend_from_slice(&frame);
        let frames = codec.feed_slice(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, MSG_ACK);
    }

    #[test]
    fn test_byte_at_a_time_and_back_to_back() {
        let mut codec = FrameCodec::radio();
        let a = encode_frame(0x01, 1, &[1, 2, 3]).expect("encode");
        let b = encode_frame(0x23, 2, &[]).expect("encode");

        let mut out = Vec::new();
        for byte in a.iter().chain(b.iter()) {
            if let Some(frame) = codec.feed(*byte) {
                out.push(frame);
            }
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].sequence, 2);
        assert_eq!(codec.stats().frames, 2);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut codec = FrameCodec::wired();
        let frame = encode_frame(0x01, 1, &[9; 10]).expect("encode");
        codec.feed_slice(&frame[..6]);
        codec.reset();
        assert!(codec.feed_slice(&frame[6..]).is_empty());
        assert_eq!(codec.feed_slice(&frame).len(), 1);
    }
}
