//! Vehicle-side gateway between the controller's UART and the radio.

use std::collections::VecDeque;

use labrelay_proto::{msg_type_name, Frame, SequenceCounter, MSG_HEARTBEAT, MSG_TELEMETRY_V1};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::link::FrameLink;

/// Frames waiting for the radio beyond this are dropped oldest first.
const RADIO_QUEUE_DEPTH: usize = 16;

/// Relay timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Minimum spacing of telemetry frames on the radio.
    pub telemetry_period_ms: u64,
    /// Heartbeat period towards the controller.
    pub heartbeat_period_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            telemetry_period_ms: 500,
            heartbeat_period_ms: 500,
        }
    }
}

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Radio to wired.
    pub downlinked: u64,
    /// Wired to radio, telemetry included.
    pub uplinked: u64,
    /// Telemetry frames replaced by a newer one before they could be sent.
    pub telemetry_superseded: u64,
    /// Frames lost to a full queue or a failed transmit.
    pub dropped: u64,
    pub heartbeats: u64,
}

/// Bridges the wired link to the controller and the radio link to the
/// ground.
///
/// Radio frames go to the controller verbatim. Controller frames go to the
/// radio in order, waiting out busy periods; telemetry is thinned to one frame
/// per `telemetry_period_ms`, newest first. A heartbeat keeps the controller's
/// link watchdog fed.
pub struct AirRelay<W, R> {
    wired: W,
    radio: R,
    config: RelayConfig,
    radio_queue: VecDeque<Frame>,
    latest_telemetry: Option<Frame>,
    last_telemetry_tx_ms: Option<u64>,
    last_heartbeat_ms: Option<u64>,
    heartbeat_sequence: SequenceCounter,
    frames: Vec<Frame>,
    stats: RelayStats,
}

impl<W: FrameLink, R: FrameLink> AirRelay<W, R> {
    pub fn new(wired: W, radio: R, config: RelayConfig) -> Self {
        AirRelay {
            wired,
            radio,
            config,
            radio_queue: VecDeque::new(),
            latest_telemetry: None,
            last_telemetry_tx_ms: None,
            last_heartbeat_ms: None,
            heartbeat_sequence: SequenceCounter::new(),
            frames: Vec::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn wired(&self) -> &W {
        &self.wired
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Frames waiting for the radio, excluding held telemetry.
    pub fn queued(&self) -> usize {
        self.radio_queue.len()
    }

    /// One pass of the relay loop.
    pub fn poll(&mut self, now_ms: u64) {
        self.pump_downlink();
        self.collect_uplink();
        self.flush_radio(now_ms);
        self.send_heartbeat(now_ms);
    }

    fn pump_downlink(&mut self) {
        let mut frames = std::mem::take(&mut self.frames);
        self.radio.poll_frames(&mut frames);
        for frame in frames.drain(..) {
            trace!(
                "AirRelay: radio -> wired {} seq {}",
                msg_type_name(frame.msg_type),
                frame.sequence
            );
            match self.wired.send_frame(&frame) {
                Ok(()) => self.stats.downlinked += 1,
                Err(e) => {
                    self.stats.dropped += 1;
                    warn!("AirRelay: wired send of {} failed: {}", msg_type_name(frame.msg_type), e);
                }
            }
        }
        self.frames = frames;
    }

    fn collect_uplink(&mut self) {
        let mut frames = std::mem::take(&mut self.frames);
        self.wired.poll_frames(&mut frames);
        for frame in frames.drain(..) {
            if frame.msg_type == MSG_TELEMETRY_V1 {
                if self.latest_telemetry.replace(frame).is_some() {
                    self.stats.telemetry_superseded += 1;
                }
                continue;
            }
            if self.radio_queue.len() >= RADIO_QUEUE_DEPTH {
                self.radio_queue.pop_front();
                self.stats.dropped += 1;
                warn!("AirRelay: radio queue full, dropping oldest frame");
            }
            self.radio_queue.push_back(frame);
        }
        self.frames = frames;
    }

    fn flush_radio(&mut self, now_ms: u64) {
        while let Some(frame) = self.radio_queue.front() {
            match self.radio.send_frame(frame) {
                Ok(()) => {
                    trace!(
                        "AirRelay: wired -> radio {} seq {}",
                        msg_type_name(frame.msg_type),
                        frame.sequence
                    );
                    self.stats.uplinked += 1;
                }
                Err(LinkError::Busy) => return,
                Err(e) => {
                    warn!("AirRelay: radio send of {} failed: {}", msg_type_name(frame.msg_type), e);
                    self.stats.dropped += 1;
                }
            }
            self.radio_queue.pop_front();
        }

        let due = self
            .last_telemetry_tx_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.telemetry_period_ms);
        if !due {
            return;
        }
        let Some(frame) = self.latest_telemetry.as_ref() else {
            return;
        };
        match self.radio.send_frame(frame) {
            Ok(()) => self.stats.uplinked += 1,
            Err(LinkError::Busy) => return,
            Err(e) => {
                debug!("AirRelay: telemetry send failed: {}", e);
                self.stats.dropped += 1;
            }
        }
        self.latest_telemetry = None;
        self.last_telemetry_tx_ms = Some(now_ms);
    }

    fn send_heartbeat(&mut self, now_ms: u64) {
        let due = self
            .last_heartbeat_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.heartbeat_period_ms);
        if !due {
            return;
        }
        self.last_heartbeat_ms = Some(now_ms);
        let frame = Frame::new(MSG_HEARTBEAT, self.heartbeat_sequence.next(), Vec::new());
        match self.wired.send_frame(&frame) {
            Ok(()) => self.stats.heartbeats += 1,
            Err(e) => warn!("AirRelay: heartbeat not sent: {}", e),
        }
    }
}
