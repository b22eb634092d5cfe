//! SX127x LoRa link driver.

use labrelay_metrics::{metric_defs, metrics};
use log::{debug, error, info, trace, warn};
use serde::Serialize;

use crate::config::RadioConfig;
use crate::diag::{Diagnostics, ReinitReason, RegisterSnapshot};
use crate::error::{BusError, RadioError, RadioResult};
use crate::hal::{Clock, RadioBus};
use crate::registers::*;

/// Outcome of [`LoRaLink::transmit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxResult {
    /// Packet left the antenna (TX-done observed).
    Ok,
    /// Rejected by the guard interval; nothing was written to the chip.
    Busy,
    /// Invalid request, radio down, or TX-done never came.
    Fail,
}

impl TxResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TxResult::Ok => "ok",
            TxResult::Busy => "busy",
            TxResult::Fail => "fail",
        }
    }
}

/// Metadata of a packet returned by [`LoRaLink::poll_receive`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RxPacket {
    /// Bytes copied into the caller's buffer.
    pub len: usize,
    /// The chip reported more bytes than the buffer could hold.
    pub truncated: bool,
    pub rssi_dbm: i16,
    pub snr_db: f32,
}

/// Result of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Registers look sane.
    Healthy,
    /// A fault was found and self-heal brought the chip back.
    Recovered(ReinitReason),
    /// A fault was found and the chip did not come back.
    Down(ReinitReason),
    /// Driver never initialized; nothing checked.
    Uninitialized,
}

/// Packet RSSI in dBm from `REG_PKT_RSSI_VALUE` (LF port, -164 offset).
pub fn packet_rssi_dbm(raw: u8) -> i16 {
    -164 + i16::from(raw)
}

/// Packet SNR in dB from `REG_PKT_SNR_VALUE` (two's complement, quarter dB).
pub fn packet_snr_db(raw: u8) -> f32 {
    f32::from(raw as i8) / 4.0
}

/// Driver for one SX127x transceiver.
///
/// Owns its bus and clock. All state lives here, so several links can run
/// side by side (the simulator does exactly that).
pub struct LoRaLink<B, C> {
    bus: B,
    clock: C,
    config: RadioConfig,
    initialized: bool,
    /// Completion time of the last transmit attempt that touched the chip.
    last_tx_ms: Option<u64>,
    last_mode_check_ms: u64,
    last_health_check_ms: u64,
    diag: Diagnostics,
}

impl<B: RadioBus, C: Clock> LoRaLink<B, C> {
    pub fn new(bus: B, clock: C, config: RadioConfig) -> Self {
        LoRaLink {
            bus,
            clock,
            config,
            initialized: false,
            last_tx_ms: None,
            last_mode_check_ms: 0,
            last_health_check_ms: 0,
            diag: Diagnostics::default(),
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    /// Zero all counters and snapshots.
    pub fn clear_diagnostics(&mut self) {
        self.diag = Diagnostics::default();
    }

    /// Reset the chip, verify it answers and program the modem.
    ///
    /// Leaves the radio in RX continuous mode on success. Does not count as a
    /// reinit in the diagnostics.
    pub fn initialize(&mut self) -> RadioResult<()> {
        self.config.validate()?;
        match self.bring_up() {
            Ok(()) => {
                info!(
                    "LoRa up: {} Hz SF{} BW {} Hz CR 4/{} sync 0x{:02X} {} dBm",
                    self.config.frequency_hz,
                    self.config.spreading_factor,
                    self.config.bandwidth_hz,
                    self.config.coding_rate_denom,
                    self.config.sync_word,
                    self.config.tx_power_dbm
                );
                Ok(())
            }
            Err(e) => {
                error!("LoRa init failed: {}", e);
                Err(e)
            }
        }
    }

    /// Send one packet.
    ///
    /// Blocks until TX-done or the transmit deadline. On timeout the chip is
    /// reset and re-programmed before returning [`TxResult::Fail`]. The radio
    /// is back in RX continuous mode whenever this returns.
    pub fn transmit(&mut self, payload: &[u8]) -> TxResult {
        if payload.is_empty() || payload.len() > MAX_PACKET_LEN {
            debug!("LoRa TX rejected: {} byte payload", payload.len());
            return self.count_tx(TxResult::Fail);
        }
        if !self.initialized {
            debug!("LoRa TX rejected: radio not initialized");
            return self.count_tx(TxResult::Fail);
        }

        let now = self.clock.now_ms();
        if let Some(last) = self.last_tx_ms {
            if now.saturating_sub(last) < self.config.tx_guard_ms {
                trace!("LoRa TX busy: guard interval");
                return self.count_tx(TxResult::Busy);
            }
        }

        let result = match self.send_packet(payload) {
            Ok(true) => {
                self.diag.tx_packets = self.diag.tx_packets.saturating_add(1);
                trace!("LoRa TX {} bytes", payload.len());
                TxResult::Ok
            }
            Ok(false) => {
                warn!(
                    "LoRa TX timeout after {} ms, reinitializing radio",
                    self.config.tx_timeout_ms
                );
                self.self_heal(ReinitReason::TransmitTimeout);
                TxResult::Fail
            }
            Err(e) => {
                warn!("LoRa TX bus error: {}", e);
                self.restore_rx_mode();
                TxResult::Fail
            }
        };

        self.last_tx_ms = Some(self.clock.now_ms());
        self.count_tx(result)
    }

    /// Fetch a pending packet into `buf`, if any.
    ///
    /// Never blocks. Packets with a PHY CRC error are dropped. Also runs the
    /// receive-mode watchdog and the periodic health check when they are due.
    pub fn poll_receive(&mut self, buf: &mut [u8]) -> Option<RxPacket> {
        if !self.initialized {
            return None;
        }
        self.run_periodic_checks();
        if !self.initialized {
            return None;
        }

        match self.read_packet(buf) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("LoRa RX bus error: {}", e);
                None
            }
        }
    }

    /// Sample the version and op-mode registers and self-heal on a fault.
    pub fn health_check(&mut self) -> HealthStatus {
        if !self.initialized {
            return HealthStatus::Uninitialized;
        }
        let fault = match self.sample_registers() {
            Ok(snapshot) if !version_ok(snapshot.version) => {
                warn!("LoRa health: version register 0x{:02X}", snapshot.version);
                Some(ReinitReason::VersionRegisterBad)
            }
            Ok(snapshot) if snapshot.op_mode & LONG_RANGE_MODE == 0 => {
                warn!("LoRa health: op mode 0x{:02X} lost LoRa bit", snapshot.op_mode);
                Some(ReinitReason::ModeRegisterBad)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("LoRa health: bus error {}", e);
                Some(ReinitReason::VersionRegisterBad)
            }
        };

        let Some(reason) = fault else {
            return HealthStatus::Healthy;
        };
        if self.self_heal(reason) {
            HealthStatus::Recovered(reason)
        } else {
            HealthStatus::Down(reason)
        }
    }

    /// Hardware reset and full re-program. Returns whether the chip came back.
    pub fn self_heal(&mut self, reason: ReinitReason) -> bool {
        let now = self.clock.now_ms();
        self.diag.record_reinit(reason, now);
        metrics::counter!(metric_defs::RADIO_REINIT.name, "reason" => reason.as_str()).increment(1);
        warn!("LoRa self-heal ({}), reset #{}", reason, self.diag.reinit_total);

        match self.bring_up() {
            Ok(()) => true,
            Err(e) => {
                error!("LoRa self-heal ({}) failed: {}", reason, e);
                false
            }
        }
    }

    fn count_tx(&self, result: TxResult) -> TxResult {
        metrics::counter!(metric_defs::RADIO_TX.name, "result" => result.as_str()).increment(1);
        result
    }

    fn bring_up(&mut self) -> RadioResult<()> {
        self.initialized = false;
        self.hard_reset()?;

        let version = self.bus.read_register(REG_VERSION)?;
        self.diag.last_registers.version = version;
        if !version_ok(version) {
            return Err(RadioError::BadVersion(version));
        }

        self.program_registers()?;
        self.initialized = true;

        let now = self.clock.now_ms();
        self.last_mode_check_ms = now;
        self.last_health_check_ms = now;
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<(), BusError> {
        self.bus.set_reset(true)?;
        self.clock.delay_ms(5);
        self.bus.set_reset(false)?;
        self.clock.delay_ms(2);
        self.bus.set_reset(true)?;
        self.clock.delay_ms(10);
        Ok(())
    }

    fn program_registers(&mut self) -> Result<(), BusError> {
        self.set_mode(RadioMode::Sleep)?;
        self.clock.delay_ms(2);
        self.set_mode(RadioMode::Standby)?;
        self.clock.delay_ms(2);

        let frf = self.config.frf();
        self.bus.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.bus.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.bus.write_register(REG_FRF_LSB, frf as u8)?;

        self.bus.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.bus.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;

        let lna = self.bus.read_register(REG_LNA)?;
        self.bus.write_register(REG_LNA, lna | LNA_BOOST_HF_ON)?;
        self.bus.write_register(REG_OCP, OCP_DEFAULT)?;

        self.bus.write_register(REG_SYNC_WORD, self.config.sync_word)?;
        let [preamble_msb, preamble_lsb] = self.config.preamble_len.to_be_bytes();
        self.bus.write_register(REG_PREAMBLE_MSB, preamble_msb)?;
        self.bus.write_register(REG_PREAMBLE_LSB, preamble_lsb)?;

        self.bus.write_register(REG_MODEM_CONFIG_1, self.config.modem_config_1())?;
        self.bus.write_register(REG_MODEM_CONFIG_2, self.config.modem_config_2())?;
        self.bus.write_register(REG_MODEM_CONFIG_3, self.config.modem_config_3())?;

        self.bus.write_register(REG_PA_CONFIG, self.config.pa_config())?;
        self.bus.write_register(REG_PA_DAC, PA_DAC_DEFAULT)?;

        self.bus.write_register(REG_IRQ_FLAGS_MASK, 0x00)?;
        self.bus.write_register(REG_IRQ_FLAGS, IRQ_ALL)?;
        self.set_mode(RadioMode::ReceiveContinuous)
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), BusError> {
        self.bus.write_register(REG_OP_MODE, LONG_RANGE_MODE | mode.bits())
    }

    fn restore_rx_mode(&mut self) {
        if let Err(e) = self.set_mode(RadioMode::ReceiveContinuous) {
            warn!("LoRa could not restore RX mode: {}", e);
        }
    }

    /// Returns `Ok(false)` when TX-done did not assert in time.
    fn send_packet(&mut self, payload: &[u8]) -> Result<bool, BusError> {
        self.set_mode(RadioMode::Standby)?;
        let tx_base = self.bus.read_register(REG_FIFO_TX_BASE_ADDR)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, tx_base)?;
        self.bus.write_register(REG_IRQ_FLAGS, IRQ_ALL)?;
        self.bus.write_fifo(payload)?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        self.set_mode(RadioMode::Transmit)?;

        let start = self.clock.now_ms();
        loop {
            let irq = self.bus.read_register(REG_IRQ_FLAGS)?;
            if irq & IRQ_TX_DONE != 0 {
                self.bus.write_register(REG_IRQ_FLAGS, IRQ_TX_DONE)?;
                self.set_mode(RadioMode::ReceiveContinuous)?;
                return Ok(true);
            }
            if self.clock.now_ms().saturating_sub(start) > self.config.tx_timeout_ms {
                self.diag.last_registers.irq_flags = irq;
                return Ok(false);
            }
            self.clock.delay_ms(1);
        }
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<Option<RxPacket>, BusError> {
        let irq = self.bus.read_register(REG_IRQ_FLAGS)?;
        if irq & IRQ_RX_DONE == 0 {
            return Ok(None);
        }

        if irq & IRQ_PAYLOAD_CRC_ERROR != 0 {
            self.bus
                .write_register(REG_IRQ_FLAGS, IRQ_RX_DONE | IRQ_PAYLOAD_CRC_ERROR)?;
            self.set_mode(RadioMode::ReceiveContinuous)?;
            self.diag.rx_crc_errors = self.diag.rx_crc_errors.saturating_add(1);
            metrics::counter!(metric_defs::RADIO_RX_CRC_DROPS.name).increment(1);
            debug!("LoRa RX dropped packet with CRC error");
            return Ok(None);
        }

        let available = usize::from(self.bus.read_register(REG_RX_NB_BYTES)?);
        let current = self.bus.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, current)?;

        let len = available.min(buf.len());
        if len > 0 {
            self.bus.read_fifo(&mut buf[..len])?;
        }

        let rssi_dbm = packet_rssi_dbm(self.bus.read_register(REG_PKT_RSSI_VALUE)?);
        let snr_db = packet_snr_db(self.bus.read_register(REG_PKT_SNR_VALUE)?);

        self.bus.write_register(REG_IRQ_FLAGS, IRQ_ALL)?;
        self.set_mode(RadioMode::ReceiveContinuous)?;

        if len == 0 {
            return Ok(None);
        }

        self.diag.rx_packets = self.diag.rx_packets.saturating_add(1);
        metrics::counter!(metric_defs::RADIO_RX_PACKETS.name).increment(1);
        metrics::histogram!(metric_defs::RADIO_RX_RSSI.name).record(f64::from(rssi_dbm));
        trace!("LoRa RX {} bytes rssi {} dBm snr {:.2} dB", len, rssi_dbm, snr_db);

        Ok(Some(RxPacket {
            len,
            truncated: available > len,
            rssi_dbm,
            snr_db,
        }))
    }

    fn run_periodic_checks(&mut self) {
        let now = self.clock.now_ms();
        if self.config.health_check_ms > 0
            && now.saturating_sub(self.last_health_check_ms) >= self.config.health_check_ms
        {
            self.last_health_check_ms = now;
            if self.health_check() != HealthStatus::Healthy {
                return;
            }
        }
        if now.saturating_sub(self.last_mode_check_ms) >= self.config.rx_mode_check_ms {
            self.last_mode_check_ms = now;
            self.ensure_rx_mode();
        }
    }

    /// Receive-mode watchdog: put the chip back in RX continuous if it
    /// drifted, or self-heal if the op-mode register no longer says LoRa.
    fn ensure_rx_mode(&mut self) {
        let op_mode = match self.bus.read_register(REG_OP_MODE) {
            Ok(value) => value,
            Err(e) => {
                warn!("LoRa RX watchdog: bus error {}", e);
                return;
            }
        };
        self.diag.last_registers.op_mode = op_mode;

        if op_mode & LONG_RANGE_MODE == 0 {
            warn!("LoRa RX watchdog: op mode 0x{:02X} lost LoRa bit", op_mode);
            self.self_heal(ReinitReason::ModeRegisterBad);
            return;
        }

        if op_mode & MODE_MASK != MODE_RX_CONTINUOUS {
            debug!("LoRa RX watchdog: op mode 0x{:02X}, restoring RX continuous", op_mode);
            let restored = self
                .bus
                .write_register(REG_IRQ_FLAGS, IRQ_ALL)
                .and_then(|()| self.set_mode(RadioMode::ReceiveContinuous));
            match restored {
                Ok(()) => {
                    metrics::counter!(metric_defs::RADIO_RX_MODE_RESTORED.name).increment(1)
                }
                Err(e) => warn!("LoRa RX watchdog: restore failed {}", e),
            }
        }
    }

    fn sample_registers(&mut self) -> Result<RegisterSnapshot, BusError> {
        let snapshot = RegisterSnapshot {
            version: self.bus.read_register(REG_VERSION)?,
            op_mode: self.bus.read_register(REG_OP_MODE)?,
            irq_flags: self.bus.read_register(REG_IRQ_FLAGS)?,
            sampled_at_ms: self.clock.now_ms(),
        };
        self.diag.last_registers = snapshot;
        Ok(snapshot)
    }
}
