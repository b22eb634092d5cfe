//! Reliable command delivery: sequence, await Ack, retry, report.
//!
//! One command may be outstanding at a time:
//!
//! ```text
//! Idle --submit--> Awaiting(seq, deadline, retries_remaining)
//! Awaiting --matching Ack before deadline--> Idle (Acked)
//! Awaiting --deadline, retries left--> resend same frame, Awaiting
//! Awaiting --deadline, no retries left--> Idle (Failed)
//! ```
//!
//! A send the radio refuses as busy does not use up an attempt; the frame goes
//! out on the next poll instead. A busy streak longer than twice
//! `busy_warn_ms` fails the command.

use labrelay_metrics::{metric_defs, metrics};
use labrelay_proto::{msg_type_name, Ack, AckStatus, Frame, SequenceCounter, WireRecord, MSG_ACK};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LinkError, LinkResult};
use crate::link::FrameLink;

/// Timing of the reliable command protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliableConfig {
    /// Time allowed for each attempt's Ack.
    pub ack_timeout_ms: u64,
    /// Retransmissions after the first send.
    pub max_retries: u8,
    /// Busy streak after which a warning is raised. Twice this fails the
    /// command.
    pub busy_warn_ms: u64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        ReliableConfig {
            ack_timeout_ms: 400,
            max_retries: 3,
            busy_warn_ms: 2000,
        }
    }
}

/// Outcome notifications for the command issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CommandEvent {
    /// A matching Ack arrived in time.
    Acked {
        msg_type: u8,
        sequence: u8,
        status: AckStatus,
        /// Transmissions made, including the first.
        attempts: u32,
        latency_ms: u64,
    },
    /// The frame was sent again after an Ack timeout.
    Retried {
        msg_type: u8,
        sequence: u8,
        /// 1 for the first retransmission.
        retry: u8,
    },
    /// Retries exhausted without an Ack, or the radio stayed busy.
    Failed {
        msg_type: u8,
        sequence: u8,
        attempts: u32,
    },
    /// The radio has been refusing the send for longer than `busy_warn_ms`.
    BusyWarning {
        msg_type: u8,
        sequence: u8,
        busy_ms: u64,
    },
}

/// Counters over the commander's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    pub submitted: u32,
    pub transmissions: u32,
    pub retries: u32,
    pub acked: u32,
    pub failed: u32,
    pub stale_acks: u32,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    frame: Frame,
    submitted_ms: u64,
    /// `None` while the frame still has to go out.
    deadline_ms: Option<u64>,
    retries_remaining: u8,
    attempts: u32,
    busy_since_ms: Option<u64>,
    busy_warned: bool,
}

/// Reliable sender for one logical command channel.
pub struct ReliableCommander {
    config: ReliableConfig,
    sequence: SequenceCounter,
    pending: Option<PendingCommand>,
    stats: CommandStats,
}

impl ReliableCommander {
    pub fn new(config: ReliableConfig) -> Self {
        ReliableCommander {
            config,
            sequence: SequenceCounter::new(),
            pending: None,
            stats: CommandStats::default(),
        }
    }

    pub fn config(&self) -> &ReliableConfig {
        &self.config
    }

    pub fn stats(&self) -> CommandStats {
        self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Message type and sequence of the outstanding command.
    pub fn pending(&self) -> Option<(u8, u8)> {
        self.pending
            .as_ref()
            .map(|p| (p.frame.msg_type, p.frame.sequence))
    }

    /// Deadline of the outstanding attempt, if it has been sent.
    pub fn deadline_ms(&self) -> Option<u64> {
        self.pending.as_ref().and_then(|p| p.deadline_ms)
    }

    /// Send a typed command record.
    pub fn submit_record<R: WireRecord, L: FrameLink>(
        &mut self,
        link: &mut L,
        record: &R,
        now_ms: u64,
    ) -> LinkResult<u8> {
        self.submit(link, R::MSG_TYPE, record.to_bytes(), now_ms)
    }

    /// Assign the next sequence number and send the command.
    ///
    /// Rejected with [`LinkError::CommandPending`] while another command awaits
    /// its Ack. A busy radio is not an error here; the send is retried on the
    /// next [`poll`](Self::poll).
    pub fn submit<L: FrameLink>(
        &mut self,
        link: &mut L,
        msg_type: u8,
        payload: Vec<u8>,
        now_ms: u64,
    ) -> LinkResult<u8> {
        if let Some((msg_type, sequence)) = self.pending() {
            return Err(LinkError::CommandPending { msg_type, sequence });
        }
        if payload.len() > link.max_payload() {
            return Err(labrelay_proto::ProtocolError::PayloadTooLarge {
                max: link.max_payload(),
                actual: payload.len(),
            }
            .into());
        }

        let sequence = self.sequence.next();
        self.pending = Some(PendingCommand {
            frame: Frame::new(msg_type, sequence, payload),
            submitted_ms: now_ms,
            deadline_ms: None,
            retries_remaining: self.config.max_retries,
            attempts: 0,
            busy_since_ms: None,
            busy_warned: false,
        });
        self.stats.submitted += 1;
        metrics::counter!(metric_defs::COMMAND_SENT.name, "msg_type" => msg_type_name(msg_type))
            .increment(1);
        debug!("ReliableCommander: submit {} seq {}", msg_type_name(msg_type), sequence);

        // A busy radio leaves the command queued for the next poll.
        let event = self.transmit_pending(link, now_ms);
        debug_assert!(event.is_none(), "first send raised {:?}", event);
        Ok(sequence)
    }

    /// Offer an inbound frame. Returns `Acked` when it resolves the
    /// outstanding command.
    ///
    /// An Ack matches when both its `acked_msg_type` and its frame sequence
    /// equal the outstanding command's, and it arrives before the deadline.
    pub fn handle_frame(&mut self, frame: &Frame, now_ms: u64) -> Option<CommandEvent> {
        if frame.msg_type != MSG_ACK {
            return None;
        }
        let ack = Ack::from_bytes(&frame.payload).ok()?;
        let pending = self.pending.as_ref()?;

        if ack.acked_msg_type != pending.frame.msg_type || frame.sequence != pending.frame.sequence {
            debug!(
                "ReliableCommander: unmatched Ack for {} seq {}",
                msg_type_name(ack.acked_msg_type),
                frame.sequence
            );
            return None;
        }
        match pending.deadline_ms {
            Some(deadline) if now_ms < deadline => {}
            _ => {
                debug!("ReliableCommander: late Ack for seq {}", frame.sequence);
                self.stats.stale_acks += 1;
                return None;
            }
        }

        let pending = self.pending.take()?;
        let latency_ms = now_ms.saturating_sub(pending.submitted_ms);
        let status = ack.status();
        self.stats.acked += 1;
        let label = msg_type_name(pending.frame.msg_type);
        let status_label = match status {
            AckStatus::Ok => "ok",
            AckStatus::Err => "err",
            AckStatus::Other(_) => "other",
        };
        metrics::counter!(metric_defs::COMMAND_ACKED.name, "msg_type" => label, "status" => status_label)
            .increment(1);
        metrics::histogram!(metric_defs::COMMAND_ACK_LATENCY.name, "msg_type" => label)
            .record(latency_ms as f64);
        info!(
            "ReliableCommander: {} seq {} acked ({:?}) after {} attempt(s), {} ms",
            label, pending.frame.sequence, status, pending.attempts, latency_ms
        );

        Some(CommandEvent::Acked {
            msg_type: pending.frame.msg_type,
            sequence: pending.frame.sequence,
            status,
            attempts: pending.attempts,
            latency_ms,
        })
    }

    /// Drive deadlines and deferred sends.
    pub fn poll<L: FrameLink>(&mut self, link: &mut L, now_ms: u64) -> Vec<CommandEvent> {
        let mut events = Vec::new();
        let Some(pending) = self.pending.as_mut() else {
            return events;
        };

        if let Some(deadline) = pending.deadline_ms {
            if now_ms < deadline {
                return events;
            }
            if pending.retries_remaining == 0 {
                let pending = self.pending.take();
                if let Some(pending) = pending {
                    events.push(self.fail(pending));
                }
                return events;
            }
            pending.deadline_ms = None;
        }

        if let Some(event) = self.transmit_pending(link, now_ms) {
            events.push(event);
        }
        events
    }

    fn fail(&mut self, pending: PendingCommand) -> CommandEvent {
        self.stats.failed += 1;
        let label = msg_type_name(pending.frame.msg_type);
        metrics::counter!(metric_defs::COMMAND_FAILED.name, "msg_type" => label).increment(1);
        warn!(
            "ReliableCommander: no Ack for {} seq {} after {} attempt(s)",
            label, pending.frame.sequence, pending.attempts
        );
        CommandEvent::Failed {
            msg_type: pending.frame.msg_type,
            sequence: pending.frame.sequence,
            attempts: pending.attempts,
        }
    }

    /// Put the outstanding frame on the link if it is due.
    fn transmit_pending<L: FrameLink>(&mut self, link: &mut L, now_ms: u64) -> Option<CommandEvent> {
        let timeout = self.config.ack_timeout_ms;
        let busy_warn_ms = self.config.busy_warn_ms;
        let pending = self.pending.as_mut()?;
        if pending.deadline_ms.is_some() {
            return None;
        }

        match link.send_frame(&pending.frame) {
            Err(LinkError::Busy) => {
                let since = *pending.busy_since_ms.get_or_insert(now_ms);
                let busy_ms = now_ms.saturating_sub(since);
                if busy_ms > busy_warn_ms.saturating_mul(2) {
                    warn!(
                        "ReliableCommander: giving up on seq {}, radio busy for {} ms",
                        pending.frame.sequence, busy_ms
                    );
                    let pending = self.pending.take()?;
                    return Some(self.fail(pending));
                }
                if busy_ms > busy_warn_ms && !pending.busy_warned {
                    pending.busy_warned = true;
                    warn!("ReliableCommander: radio busy for {} ms", busy_ms);
                    return Some(CommandEvent::BusyWarning {
                        msg_type: pending.frame.msg_type,
                        sequence: pending.frame.sequence,
                        busy_ms,
                    });
                }
                return None;
            }
            Err(e) => {
                // Counts as an attempt; the Ack timeout drives the retry.
                warn!(
                    "ReliableCommander: send of seq {} failed: {}",
                    pending.frame.sequence, e
                );
            }
            Ok(()) => {}
        }

        pending.busy_since_ms = None;
        pending.busy_warned = false;
        pending.deadline_ms = Some(now_ms + timeout);
        pending.attempts += 1;
        self.stats.transmissions += 1;

        if pending.attempts == 1 {
            return None;
        }
        pending.retries_remaining -= 1;
        let retry = (pending.attempts - 1) as u8;
        let msg_type = pending.frame.msg_type;
        let sequence = pending.frame.sequence;
        self.stats.retries += 1;
        metrics::counter!(metric_defs::COMMAND_RETRIED.name, "msg_type" => msg_type_name(msg_type))
            .increment(1);
        info!(
            "ReliableCommander: retry #{} {} seq {}",
            retry,
            msg_type_name(msg_type),
            sequence
        );
        Some(CommandEvent::Retried {
            msg_type,
            sequence,
            retry,
        })
    }
}

impl Default for ReliableCommander {
    fn default() -> Self {
        Self::new(ReliableConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labrelay_proto::{CodecStats, ModeSwitch, ACK_ERR, ACK_OK, MODE_MANUAL, MSG_MODE_SWITCH, MSG_SETPOINTS_V1};
    use std::collections::VecDeque;

    /// Records sent frames; answers with scripted results.
    #[derive(Default)]
    struct ScriptedLink {
        sent: Vec<Frame>,
        results: VecDeque<LinkResult<()>>,
    }

    impl FrameLink for ScriptedLink {
        fn transport(&self) -> &'static str {
            "scripted"
        }

        fn max_payload(&self) -> usize {
            220
        }

        fn poll_frames(&mut self, _out: &mut Vec<Frame>) {}

        fn send_frame(&mut self, frame: &Frame) -> LinkResult<()> {
            let result = self.results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.sent.push(frame.clone());
            }
            result
        }

        fn codec_stats(&self) -> CodecStats {
            CodecStats::default()
        }
    }

    fn ack(msg_type: u8, seq: u8, status: u8) -> Frame {
        let record = Ack { acked_msg_type: msg_type, status };
        Frame::new(MSG_ACK, seq, record.to_bytes())
    }

    fn submit_mode(cmd: &mut ReliableCommander, link: &mut ScriptedLink, now: u64) -> u8 {
        cmd.submit_record(link, &ModeSwitch { mode: MODE_MANUAL }, now).unwrap()
    }

    #[test]
    fn test_ack_resolves_command() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 1_000);
        assert_eq!(seq, 1);
        assert_eq!(link.sent.len(), 1);
        assert_eq!(cmd.deadline_ms(), Some(1_400));

        let event = cmd.handle_frame(&ack(MSG_MODE_SWITCH, seq, ACK_OK), 1_120);
        assert_eq!(
            event,
            Some(CommandEvent::Acked {
                msg_type: MSG_MODE_SWITCH,
                sequence: 1,
                status: AckStatus::Ok,
                attempts: 1,
                latency_ms: 120,
            })
        );
        assert!(cmd.is_idle());
        assert!(cmd.poll(&mut link, 5_000).is_empty());
    }

    #[test]
    fn test_error_status_is_reported() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 0);
        let event = cmd.handle_frame(&ack(MSG_MODE_SWITCH, seq, ACK_ERR), 10);
        assert!(matches!(event, Some(CommandEvent::Acked { status: AckStatus::Err, .. })));
    }

    #[test]
    fn test_retry_bound_and_failure() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let t0 = 10_000;
        let seq = submit_mode(&mut cmd, &mut link, t0);

        let mut events = Vec::new();
        for now in (t0..=t0 + 1_600).step_by(10) {
            events.extend(cmd.poll(&mut link, now));
        }

        assert_eq!(link.sent.len(), 4);
        assert!(link.sent.iter().all(|f| f.sequence == seq && f.msg_type == MSG_MODE_SWITCH));
        assert_eq!(
            events,
            vec![
                CommandEvent::Retried { msg_type: MSG_MODE_SWITCH, sequence: seq, retry: 1 },
                CommandEvent::Retried { msg_type: MSG_MODE_SWITCH, sequence: seq, retry: 2 },
                CommandEvent::Retried { msg_type: MSG_MODE_SWITCH, sequence: seq, retry: 3 },
                CommandEvent::Failed { msg_type: MSG_MODE_SWITCH, sequence: seq, attempts: 4 },
            ]
        );
        assert!(cmd.is_idle());
        assert_eq!(cmd.stats().failed, 1);
        assert_eq!(cmd.stats().retries, 3);
    }

    #[test]
    fn test_ack_on_retry() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 0);
        assert_eq!(cmd.poll(&mut link, 400).len(), 1);
        assert_eq!(cmd.deadline_ms(), Some(800));

        let event = cmd.handle_frame(&ack(MSG_MODE_SWITCH, seq, ACK_OK), 500);
        assert!(matches!(event, Some(CommandEvent::Acked { attempts: 2, latency_ms: 500, .. })));
    }

    #[test]
    fn test_late_or_mismatched_ack_ignored() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 0);

        assert_eq!(cmd.handle_frame(&ack(MSG_SETPOINTS_V1, seq, ACK_OK), 10), None);
        assert_eq!(cmd.handle_frame(&ack(MSG_MODE_SWITCH, seq.wrapping_add(1), ACK_OK), 10), None);
        assert_eq!(cmd.handle_frame(&ack(MSG_MODE_SWITCH, seq, ACK_OK), 400), None);
        assert_eq!(cmd.stats().stale_acks, 1);
        assert!(!cmd.is_idle());
    }

    #[test]
    fn test_submit_while_pending_rejected() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 0);
        let err = cmd
            .submit(&mut link, MSG_SETPOINTS_V1, vec![0; 17], 1)
            .unwrap_err();
        assert_eq!(err, LinkError::CommandPending { msg_type: MSG_MODE_SWITCH, sequence: seq });
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_oversize_payload_rejected_without_pending() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let err = cmd.submit(&mut link, MSG_SETPOINTS_V1, vec![0; 221], 0).unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
        assert!(cmd.is_idle());
    }

    #[test]
    fn test_busy_does_not_consume_attempt() {
        let mut link = ScriptedLink::default();
        link.results.extend([Err(LinkError::Busy), Err(LinkError::Busy)]);
        let mut cmd = ReliableCommander::default();
        submit_mode(&mut cmd, &mut link, 0);
        assert!(link.sent.is_empty());
        assert_eq!(cmd.deadline_ms(), None);

        assert!(cmd.poll(&mut link, 5).is_empty());
        assert!(cmd.poll(&mut link, 10).is_empty());
        assert_eq!(link.sent.len(), 1);
        assert_eq!(cmd.deadline_ms(), Some(410));
        assert_eq!(cmd.stats().retries, 0);
    }

    #[test]
    fn test_busy_warning_once() {
        let mut link = ScriptedLink::default();
        link.results.extend((0..10).map(|_| Err(LinkError::Busy)));
        let mut cmd = ReliableCommander::default();
        submit_mode(&mut cmd, &mut link, 0);

        let mut warnings = Vec::new();
        for now in [500, 1_000, 2_000, 2_001, 2_500, 3_000] {
            warnings.extend(cmd.poll(&mut link, now));
        }
        assert_eq!(
            warnings,
            vec![CommandEvent::BusyWarning { msg_type: MSG_MODE_SWITCH, sequence: 1, busy_ms: 2_001 }]
        );
    }

    #[test]
    fn test_endless_busy_fails_command() {
        let mut link = ScriptedLink::default();
        link.results.extend((0..10).map(|_| Err(LinkError::Busy)));
        let mut cmd = ReliableCommander::default();
        let seq = submit_mode(&mut cmd, &mut link, 0);

        let mut events = Vec::new();
        for now in [2_001, 4_000, 4_001, 4_500] {
            events.extend(cmd.poll(&mut link, now));
        }
        assert_eq!(
            events,
            vec![
                CommandEvent::BusyWarning { msg_type: MSG_MODE_SWITCH, sequence: seq, busy_ms: 2_001 },
                CommandEvent::Failed { msg_type: MSG_MODE_SWITCH, sequence: seq, attempts: 0 },
            ]
        );
        assert!(cmd.is_idle());
        assert!(link.sent.is_empty());
        assert_eq!(cmd.stats().failed, 1);
        assert_eq!(submit_mode(&mut cmd, &mut link, 4_600), seq + 1);
    }

    #[test]
    fn test_transmit_failure_counts_as_attempt() {
        let mut link = ScriptedLink::default();
        link.results.push_back(Err(LinkError::TransmitFailed));
        let mut cmd = ReliableCommander::default();
        submit_mode(&mut cmd, &mut link, 0);
        assert_eq!(cmd.deadline_ms(), Some(400));
        let events = cmd.poll(&mut link, 400);
        assert!(matches!(events[..], [CommandEvent::Retried { retry: 1, .. }]));
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_sequence_advances_per_command() {
        let mut link = ScriptedLink::default();
        let mut cmd = ReliableCommander::default();
        let first = submit_mode(&mut cmd, &mut link, 0);
        cmd.handle_frame(&ack(MSG_MODE_SWITCH, first, ACK_OK), 1);
        let second = submit_mode(&mut cmd, &mut link, 2);
        assert_eq!(second, first + 1);
    }
}
