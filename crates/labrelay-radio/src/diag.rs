//! Radio diagnostics counters.

use std::fmt;

use serde::Serialize;

/// Why the driver reset and re-programmed the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinitReason {
    /// Version register read back 0x00/0xFF (or the bus failed).
    VersionRegisterBad,
    /// TX-done did not assert before the transmit deadline.
    TransmitTimeout,
    /// Op-mode register lost the LoRa bit.
    ModeRegisterBad,
}

impl ReinitReason {
    /// Stable label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ReinitReason::VersionRegisterBad => "version_register_bad",
            ReinitReason::TransmitTimeout => "tx_timeout",
            ReinitReason::ModeRegisterBad => "mode_register_bad",
        }
    }
}

impl fmt::Display for ReinitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last sampled values of the registers the health checks look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    pub version: u8,
    pub op_mode: u8,
    pub irq_flags: u8,
    pub sampled_at_ms: u64,
}

/// Counters exposed by [`crate::LoRaLink::diagnostics`].
///
/// Reinit counters are only ever bumped by self-heal, so a healthy link
/// keeps them at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub reinit_total: u32,
    pub reinit_version_bad: u32,
    pub reinit_tx_timeout: u32,
    pub reinit_mode_bad: u32,
    pub last_reinit_reason: Option<ReinitReason>,
    pub last_reinit_ms: Option<u64>,
    pub last_registers: RegisterSnapshot,
    /// Transmissions that completed with TX-done.
    pub tx_packets: u32,
    /// Packets delivered from `poll_receive`.
    pub rx_packets: u32,
    /// Packets dropped on a PHY CRC error.
    pub rx_crc_errors: u32,
}

impl Diagnostics {
    /// Reinit count for one reason.
    pub fn reinit_count(&self, reason: ReinitReason) -> u32 {
        match reason {
            ReinitReason::VersionRegisterBad => self.reinit_version_bad,
            ReinitReason::TransmitTimeout => self.reinit_tx_timeout,
            ReinitReason::ModeRegisterBad => self.reinit_mode_bad,
        }
    }

    pub(crate) fn record_reinit(&mut self, reason: ReinitReason, now_ms: u64) {
        self.reinit_total = self.reinit_total.saturating_add(1);
        let counter = match reason {
            ReinitReason::VersionRegisterBad => &mut self.reinit_version_bad,
            ReinitReason::TransmitTimeout => &mut self.reinit_tx_timeout,
            ReinitReason::ModeRegisterBad => &mut self.reinit_mode_bad,
        };
        *counter = counter.saturating_add(1);
        self.last_reinit_reason = Some(reason);
        self.last_reinit_ms = Some(now_ms);
    }
}
