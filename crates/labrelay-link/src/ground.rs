//! Ground-side gateway: issues commands reliably and reports what comes back.

use std::fmt;

use labrelay_proto::{
    msg_type_name, Ack, ControlMode, Frame, ManualCommand, Message, ModeSwitch, Setpoints,
    TelemetryV1,
};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::LinkResult;
use crate::link::FrameLink;
use crate::reliable::{CommandEvent, ReliableCommander, ReliableConfig};

/// Something the operator console should hear about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroundEvent {
    /// Telemetry relayed from the controller.
    Telemetry(TelemetryV1),
    /// Any Ack seen on the radio, matched or not.
    Ack { acked_msg_type: u8, status: u8 },
    /// Progress of the outstanding reliable command.
    Command(CommandEvent),
}

impl GroundEvent {
    /// The console line for this event, in the format the operator GUI parses.
    pub fn console_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GroundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroundEvent::Telemetry(t) => {
                let temp = |i: usize| t.temperatures().get(i).copied().unwrap_or(f32::NAN);
                write!(
                    f,
                    "[TELEM] t={} T0={:.2} T1={:.2} P(Pa)={:.1} heater=%={:.1} valve=%={:.1}",
                    t.timestamp_ms,
                    temp(0),
                    temp(1),
                    t.pressure_pa,
                    t.heater_pct,
                    t.valve_pct
                )
            }
            GroundEvent::Ack { acked_msg_type, status } => {
                write!(f, "[ACK] for=0x{:02X} status={}", acked_msg_type, status)
            }
            GroundEvent::Command(CommandEvent::Acked { msg_type, sequence, status, .. }) => write!(
                f,
                "[CMD] ACK received for msg=0x{:02X} seq={} status={}",
                msg_type,
                sequence,
                u8::from(*status)
            ),
            GroundEvent::Command(CommandEvent::Retried { msg_type, sequence, retry }) => {
                write!(f, "[CMD] RETRY #{} msg=0x{:02X} seq={}", retry, msg_type, sequence)
            }
            GroundEvent::Command(CommandEvent::Failed { msg_type, sequence, .. }) => {
                write!(f, "[CMD] FAIL: no ACK for msg=0x{:02X} seq={}", msg_type, sequence)
            }
            GroundEvent::Command(CommandEvent::BusyWarning { msg_type, sequence, busy_ms }) => write!(
                f,
                "[CMD] WARNING: LoRa TX busy > {:.1}s (msg=0x{:02X} seq={})",
                *busy_ms as f64 / 1000.0,
                msg_type,
                sequence
            ),
        }
    }
}

/// Ground gateway: one radio link plus the reliable commander.
pub struct GroundStation<L> {
    link: L,
    commander: ReliableCommander,
    frames: Vec<Frame>,
    last_telemetry: Option<TelemetryV1>,
}

impl<L: FrameLink> GroundStation<L> {
    pub fn new(link: L, config: ReliableConfig) -> Self {
        GroundStation {
            link,
            commander: ReliableCommander::new(config),
            frames: Vec::new(),
            last_telemetry: None,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn commander(&self) -> &ReliableCommander {
        &self.commander
    }

    pub fn last_telemetry(&self) -> Option<&TelemetryV1> {
        self.last_telemetry.as_ref()
    }

    /// Submit a raw command for reliable delivery.
    pub fn send_command(&mut self, msg_type: u8, payload: Vec<u8>, now_ms: u64) -> LinkResult<u8> {
        self.commander.submit(&mut self.link, msg_type, payload, now_ms)
    }

    pub fn set_mode(&mut self, mode: ControlMode, now_ms: u64) -> LinkResult<u8> {
        let record = ModeSwitch { mode: mode.to_wire() };
        self.commander.submit_record(&mut self.link, &record, now_ms)
    }

    pub fn send_setpoints(&mut self, setpoints: &Setpoints, now_ms: u64) -> LinkResult<u8> {
        self.commander.submit_record(&mut self.link, setpoints, now_ms)
    }

    pub fn send_manual(&mut self, command: &ManualCommand, now_ms: u64) -> LinkResult<u8> {
        self.commander.submit_record(&mut self.link, command, now_ms)
    }

    /// Receive, match Acks, drive retries. Events come out in the order they
    /// happened.
    pub fn poll(&mut self, now_ms: u64) -> Vec<GroundEvent> {
        let mut events = Vec::new();
        let mut frames = std::mem::take(&mut self.frames);
        self.link.poll_frames(&mut frames);

        for frame in frames.drain(..) {
            match Message::decode(&frame) {
                Ok(Message::Telemetry(telemetry)) => {
                    self.last_telemetry = Some(telemetry);
                    events.push(GroundEvent::Telemetry(telemetry));
                }
                Ok(Message::Ack(Ack { acked_msg_type, status })) => {
                    events.push(GroundEvent::Ack { acked_msg_type, status });
                    if let Some(event) = self.commander.handle_frame(&frame, now_ms) {
                        events.push(GroundEvent::Command(event));
                    }
                }
                Ok(other) => {
                    trace!("GroundStation: ignoring {}", msg_type_name(other.msg_type()));
                }
                Err(e) => {
                    debug!("GroundStation: undecodable frame seq {}: {}", frame.sequence, e);
                }
            }
        }
        self.frames = frames;

        events.extend(
            self.commander
                .poll(&mut self.link, now_ms)
                .into_iter()
                .map(GroundEvent::Command),
        );
        events
    }
}
