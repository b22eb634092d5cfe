//! Frame-level transports.

use labrelay_metrics::{metric_defs, metrics};
use labrelay_proto::{CodecStats, Frame, FrameCodec};
use labrelay_radio::registers::MAX_PACKET_LEN;
use labrelay_radio::{Clock, LoRaLink, RadioBus, RxPacket, TxResult};
use tracing::{debug, trace};

use crate::channel::ByteChannel;
use crate::error::{LinkError, LinkResult};

/// Upper bound on radio packets drained per poll.
const MAX_PACKETS_PER_POLL: usize = 8;

/// A transport that carries whole frames.
pub trait FrameLink {
    /// Short transport name for logs and metric labels.
    fn transport(&self) -> &'static str;

    /// Largest payload this transport accepts.
    fn max_payload(&self) -> usize;

    /// Append every frame received since the last call to `out`, in arrival
    /// order. Never blocks.
    fn poll_frames(&mut self, out: &mut Vec<Frame>);

    /// Encode and send one frame.
    fn send_frame(&mut self, frame: &Frame) -> LinkResult<()>;

    /// Decoder counters.
    fn codec_stats(&self) -> CodecStats;
}

fn record_codec_delta(transport: &'static str, before: CodecStats, after: CodecStats) {
    let frames = after.frames - before.frames;
    if frames > 0 {
        metrics::counter!(metric_defs::FRAME_RX.name, "transport" => transport).increment(frames);
    }
    let crc = after.crc_errors - before.crc_errors;
    if crc > 0 {
        debug!("{}: dropped {} frame(s) on CRC mismatch", transport, crc);
        metrics::counter!(metric_defs::FRAME_DROPPED.name, "transport" => transport, "cause" => "crc")
            .increment(crc);
    }
    let length = after.length_errors - before.length_errors;
    if length > 0 {
        debug!("{}: rejected {} bad length byte(s)", transport, length);
        metrics::counter!(metric_defs::FRAME_DROPPED.name, "transport" => transport, "cause" => "length")
            .increment(length);
    }
}

// ============================================================================
// Wired
// ============================================================================

/// Frames over a byte stream, using the wired payload ceiling.
pub struct SerialLink<C> {
    channel: C,
    codec: FrameCodec,
    rx_buf: Vec<u8>,
}

impl<C: ByteChannel> SerialLink<C> {
    pub fn new(channel: C) -> Self {
        Self::with_codec(channel, FrameCodec::wired())
    }

    /// Use a codec with a different payload ceiling.
    pub fn with_codec(channel: C, codec: FrameCodec) -> Self {
        SerialLink {
            channel,
            codec,
            rx_buf: Vec::new(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }
}

impl<C: ByteChannel> FrameLink for SerialLink<C> {
    fn transport(&self) -> &'static str {
        "wired"
    }

    fn max_payload(&self) -> usize {
        self.codec.max_payload()
    }

    fn poll_frames(&mut self, out: &mut Vec<Frame>) {
        self.rx_buf.clear();
        if self.channel.read_available(&mut self.rx_buf) == 0 {
            return;
        }
        let before = self.codec.stats();
        for &byte in &self.rx_buf {
            if let Some(frame) = self.codec.feed(byte) {
                out.push(frame);
            }
        }
        record_codec_delta(self.transport(), before, self.codec.stats());
    }

    fn send_frame(&mut self, frame: &Frame) -> LinkResult<()> {
        let bytes = self.codec.encode_frame(frame)?;
        self.channel.write_all(&bytes)
    }

    fn codec_stats(&self) -> CodecStats {
        self.codec.stats()
    }
}

// ============================================================================
// Radio
// ============================================================================

/// Frames over LoRa, one frame per packet, using the radio payload ceiling.
pub struct RadioFrameLink<B, C> {
    radio: LoRaLink<B, C>,
    codec: FrameCodec,
    rx_buf: [u8; MAX_PACKET_LEN],
    last_packet: Option<RxPacket>,
}

impl<B: RadioBus, C: Clock> RadioFrameLink<B, C> {
    /// Wrap an initialized driver.
    pub fn new(radio: LoRaLink<B, C>) -> Self {
        RadioFrameLink {
            radio,
            codec: FrameCodec::radio(),
            rx_buf: [0; MAX_PACKET_LEN],
            last_packet: None,
        }
    }

    pub fn radio(&self) -> &LoRaLink<B, C> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut LoRaLink<B, C> {
        &mut self.radio
    }

    /// Signal metadata of the most recent packet.
    pub fn last_packet(&self) -> Option<RxPacket> {
        self.last_packet
    }
}

impl<B: RadioBus, C: Clock> FrameLink for RadioFrameLink<B, C> {
    fn transport(&self) -> &'static str {
        "radio"
    }

    fn max_payload(&self) -> usize {
        self.codec.max_payload()
    }

    fn poll_frames(&mut self, out: &mut Vec<Frame>) {
        let before = self.codec.stats();
        for _ in 0..MAX_PACKETS_PER_POLL {
            let Some(packet) = self.radio.poll_receive(&mut self.rx_buf) else {
                break;
            };
            trace!(
                "radio: packet {} bytes rssi {} dBm snr {:.1} dB",
                packet.len,
                packet.rssi_dbm,
                packet.snr_db
            );
            self.last_packet = Some(packet);
            // Each packet is self-contained; never let a fragment carry over.
            self.codec.reset();
            for &byte in &self.rx_buf[..packet.len] {
                if let Some(frame) = self.codec.feed(byte) {
                    out.push(frame);
                }
            }
        }
        record_codec_delta(self.transport(), before, self.codec.stats());
    }

    fn send_frame(&mut self, frame: &Frame) -> LinkResult<()> {
        let bytes = self.codec.encode_frame(frame)?;
        match self.radio.transmit(&bytes) {
            TxResult::Ok => Ok(()),
            TxResult::Busy => Err(LinkError::Busy),
            TxResult::Fail => Err(LinkError::TransmitFailed),
        }
    }

    fn codec_stats(&self) -> CodecStats {
        self.codec.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use labrelay_proto::{encode_frame, ProtocolError, MSG_HEARTBEAT, MSG_TELEMETRY_V1};
    use labrelay_radio::sim::{ManualClock, SimChip};
    use labrelay_radio::RadioConfig;

    #[test]
    fn test_serial_round_trip() {
        let (a, b) = MemoryChannel::pair();
        let mut left = SerialLink::new(a);
        let mut right = SerialLink::new(b);

        left.send_frame(&Frame::new(MSG_HEARTBEAT, 1, vec![])).unwrap();
        left.send_frame(&Frame::new(MSG_TELEMETRY_V1, 2, vec![7; 33])).unwrap();

        let mut frames = Vec::new();
        right.poll_frames(&mut frames);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].sequence, 2);
        assert_eq!(right.codec_stats().frames, 2);
    }

    #[test]
    fn test_serial_rejects_oversize() {
        let (a, _b) = MemoryChannel::pair();
        let mut link = SerialLink::new(a);
        let err = link.send_frame(&Frame::new(0x01, 1, vec![0; 45])).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(ProtocolError::PayloadTooLarge { max: 44, .. })));
    }

    #[test]
    fn test_serial_counts_corruption() {
        let (mut a, b) = MemoryChannel::pair();
        let mut link = SerialLink::new(b);
        let mut bytes = encode_frame(MSG_HEARTBEAT, 3, &[]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        a.write_all(&bytes).unwrap();
        a.write_all(&encode_frame(MSG_HEARTBEAT, 4, &[]).unwrap()).unwrap();

        let mut frames = Vec::new();
        link.poll_frames(&mut frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 4);
        assert_eq!(link.codec_stats().crc_errors, 1);
    }

    fn radio_link(clock: &ManualClock) -> (RadioFrameLink<SimChip, ManualClock>, SimChip) {
        let chip = SimChip::new();
        let mut radio = LoRaLink::new(chip.clone(), clock.clone(), RadioConfig::default());
        radio.initialize().unwrap();
        (RadioFrameLink::new(radio), chip)
    }

    #[test]
    fn test_radio_send_and_busy() {
        let clock = ManualClock::new(0);
        let (mut link, chip) = radio_link(&clock);

        link.send_frame(&Frame::new(MSG_HEARTBEAT, 1, vec![])).unwrap();
        assert_eq!(link.send_frame(&Frame::new(MSG_HEARTBEAT, 2, vec![])), Err(LinkError::Busy));

        let sent = chip.take_transmitted();
        assert_eq!(sent, vec![encode_frame(MSG_HEARTBEAT, 1, &[]).unwrap()]);
    }

    #[test]
    fn test_radio_receive_frame() {
        let clock = ManualClock::new(0);
        let (mut link, chip) = radio_link(&clock);

        let bytes = encode_frame(MSG_TELEMETRY_V1, 9, &[1; 33]).unwrap();
        assert!(chip.inject_packet(&bytes, 110, 24, false));

        let mut frames = Vec::new();
        link.poll_frames(&mut frames);
        assert_eq!(frames, vec![Frame::new(MSG_TELEMETRY_V1, 9, vec![1; 33])]);
        assert_eq!(link.last_packet().map(|p| p.rssi_dbm), Some(-54));
    }

    #[test]
    fn test_radio_fragment_does_not_poison_next_packet() {
        let clock = ManualClock::new(0);
        let (mut link, chip) = radio_link(&clock);

        let bytes = encode_frame(MSG_TELEMETRY_V1, 1, &[1; 33]).unwrap();
        chip.inject_packet(&bytes[..10], 100, 0, false);
        let mut frames = Vec::new();
        link.poll_frames(&mut frames);
        assert!(frames.is_empty());

        chip.inject_packet(&encode_frame(MSG_HEARTBEAT, 2, &[]).unwrap(), 100, 0, false);
        link.poll_frames(&mut frames);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 2);
    }
}
