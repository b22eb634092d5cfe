//! Metrics infrastructure for the lab relay link stack.
//!
//! Every metric emitted by the radio driver, the transports and the reliable
//! command protocol is declared here as a [`Metric`] constant so names, units and
//! label keys live in one place. The `metrics` crate is re-exported; with no
//! recorder installed the macros are no-ops.
//!
//! # Example
//!
//! ```rust
//! use labrelay_metrics::{metric_defs, metrics, MetricKind};
//!
//! assert_eq!(metric_defs::RADIO_REINIT.kind, MetricKind::Counter);
//! metrics::counter!(metric_defs::RADIO_REINIT.name, "reason" => "tx_timeout").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "labrelay.radio.rx_packets").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement, if any.
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Declares a counter.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Declares a gauge.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Declares a histogram.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Radio Driver
    // ========================================================================

    /// Transmit attempts by outcome.
    ///
    /// Labels: result (`ok`, `busy`, `fail`)
    pub const RADIO_TX: Metric = Metric::counter("labrelay.radio.tx")
        .with_description("LoRa transmit attempts by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["result"]);

    /// Packets handed to the caller.
    pub const RADIO_RX_PACKETS: Metric = Metric::counter("labrelay.radio.rx_packets")
        .with_description("LoRa packets received with a valid PHY CRC")
        .with_unit(Unit::Count);

    /// Packets dropped because the PHY flagged a CRC error.
    pub const RADIO_RX_CRC_DROPS: Metric = Metric::counter("labrelay.radio.rx_crc_drops")
        .with_description("LoRa packets dropped on PHY CRC error")
        .with_unit(Unit::Count);

    /// Self-heal reinitialisations.
    ///
    /// Labels: reason (`version_register_bad`, `tx_timeout`, `mode_register_bad`)
    pub const RADIO_REINIT: Metric = Metric::counter("labrelay.radio.reinit")
        .with_description("Radio self-heal resets by trigger")
        .with_unit(Unit::Count)
        .with_labels(&["reason"]);

    /// Receive-mode re-assertions by the watchdog.
    pub const RADIO_RX_MODE_RESTORED: Metric = Metric::counter("labrelay.radio.rx_mode_restored")
        .with_description("Times the watchdog found the radio outside RX continuous")
        .with_unit(Unit::Count);

    /// Packet RSSI in dBm.
    pub const RADIO_RX_RSSI: Metric = Metric::histogram("labrelay.radio.rx_rssi_dbm")
        .with_description("Received packet RSSI in dBm");

    // ========================================================================
    // Framing
    // ========================================================================

    /// Frames decoded per transport.
    ///
    /// Labels: transport (`wired`, `radio`)
    pub const FRAME_RX: Metric = Metric::counter("labrelay.frame.rx")
        .with_description("Frames that passed CRC validation")
        .with_unit(Unit::Count)
        .with_labels(&["transport"]);

    /// Frames dropped on CRC mismatch or length violation.
    ///
    /// Labels: transport, cause (`crc`, `length`)
    pub const FRAME_DROPPED: Metric = Metric::counter("labrelay.frame.dropped")
        .with_description("Frames discarded by the stream parser")
        .with_unit(Unit::Count)
        .with_labels(&["transport", "cause"]);

    // ========================================================================
    // Reliable Commands
    // ========================================================================

    /// Command first transmissions.
    ///
    /// Labels: msg_type
    pub const COMMAND_SENT: Metric = Metric::counter("labrelay.command.sent")
        .with_description("Commands submitted for reliable delivery")
        .with_unit(Unit::Count)
        .with_labels(&["msg_type"]);

    /// Command retransmissions after an Ack timeout.
    pub const COMMAND_RETRIED: Metric = Metric::counter("labrelay.command.retried")
        .with_description("Command retransmissions after Ack timeout")
        .with_unit(Unit::Count)
        .with_labels(&["msg_type"]);

    /// Commands resolved by a matching Ack.
    pub const COMMAND_ACKED: Metric = Metric::counter("labrelay.command.acked")
        .with_description("Commands acknowledged by the controller")
        .with_unit(Unit::Count)
        .with_labels(&["msg_type", "status"]);

    /// Commands abandoned after exhausting retries.
    pub const COMMAND_FAILED: Metric = Metric::counter("labrelay.command.failed")
        .with_description("Commands that exhausted all retries")
        .with_unit(Unit::Count)
        .with_labels(&["msg_type"]);

    /// Time from submission to Ack.
    pub const COMMAND_ACK_LATENCY: Metric = Metric::histogram("labrelay.command.ack_latency_ms")
        .with_description("Command round-trip time from submission to Ack")
        .with_unit(Unit::Milliseconds)
        .with_labels(&["msg_type"]);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &RADIO_TX,
        &RADIO_RX_PACKETS,
        &RADIO_RX_CRC_DROPS,
        &RADIO_REINIT,
        &RADIO_RX_MODE_RESTORED,
        &RADIO_RX_RSSI,
        &FRAME_RX,
        &FRAME_DROPPED,
        &COMMAND_SENT,
        &COMMAND_RETRIED,
        &COMMAND_ACKED,
        &COMMAND_FAILED,
        &COMMAND_ACK_LATENCY,
    ];
}

/// Describes all metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
