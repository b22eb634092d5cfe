//! Register-level SX127x model for host-side testing and simulation.
//!
//! [`SimChip`] implements [`RadioBus`] against an in-memory register file and
//! FIFO. Handles are cheap clones sharing one chip, so a test can drive a
//! [`LoRaLink`](crate::LoRaLink) with one handle and inspect or fault-inject
//! through another. [`SimAir`] carries transmitted packets between chips.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::BusError;
use crate::hal::{Clock, RadioBus};
use crate::registers::*;

const REGISTER_COUNT: usize = 0x80;

struct ChipState {
    regs: [u8; REGISTER_COUNT],
    fifo: [u8; FIFO_SIZE],
    reset_held: bool,
    reset_pulses: u32,
    writes: u64,
    outbox: Vec<Vec<u8>>,
    version_override: Option<u8>,
    stall_tx: bool,
    disconnected: bool,
}

impl ChipState {
    fn new() -> Self {
        let mut state = ChipState {
            regs: [0; REGISTER_COUNT],
            fifo: [0; FIFO_SIZE],
            reset_held: false,
            reset_pulses: 0,
            writes: 0,
            outbox: Vec::new(),
            version_override: None,
            stall_tx: false,
            disconnected: false,
        };
        state.load_defaults();
        state
    }

    fn load_defaults(&mut self) {
        self.regs = [0; REGISTER_COUNT];
        self.regs[REG_OP_MODE as usize] = 0x09;
        self.regs[REG_FRF_MSB as usize] = 0x6C;
        self.regs[REG_FRF_MID as usize] = 0x80;
        self.regs[REG_PA_CONFIG as usize] = 0x4F;
        self.regs[REG_OCP as usize] = 0x2B;
        self.regs[REG_LNA as usize] = 0x20;
        self.regs[REG_FIFO_TX_BASE_ADDR as usize] = 0x80;
        self.regs[REG_MODEM_CONFIG_1 as usize] = 0x72;
        self.regs[REG_MODEM_CONFIG_2 as usize] = 0x70;
        self.regs[REG_PREAMBLE_LSB as usize] = 0x08;
        self.regs[REG_PAYLOAD_LENGTH as usize] = 0x01;
        self.regs[REG_SYNC_WORD as usize] = 0x12;
        self.regs[REG_VERSION as usize] = SX127X_VERSION;
        self.regs[REG_PA_DAC as usize] = 0x84;
    }

    fn reg(&self, addr: u8) -> u8 {
        self.regs[usize::from(addr) % REGISTER_COUNT]
    }

    fn set_reg(&mut self, addr: u8, value: u8) {
        self.regs[usize::from(addr) % REGISTER_COUNT] = value;
    }

    fn is_receiving(&self) -> bool {
        self.reg(REG_OP_MODE) == LONG_RANGE_MODE | MODE_RX_CONTINUOUS
    }

    fn check_bus(&self) -> Result<(), BusError> {
        if self.disconnected {
            Err(BusError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn fifo_ptr_advance(&mut self) -> usize {
        let ptr = self.reg(REG_FIFO_ADDR_PTR);
        self.set_reg(REG_FIFO_ADDR_PTR, ptr.wrapping_add(1));
        usize::from(ptr)
    }

    fn write_op_mode(&mut self, value: u8) {
        self.set_reg(REG_OP_MODE, value);
        if value & LONG_RANGE_MODE == 0 || value & MODE_MASK != MODE_TX || self.stall_tx {
            return;
        }
        let base = usize::from(self.reg(REG_FIFO_TX_BASE_ADDR));
        let len = usize::from(self.reg(REG_PAYLOAD_LENGTH));
        let packet: Vec<u8> = (0..len).map(|i| self.fifo[(base + i) % FIFO_SIZE]).collect();
        self.outbox.push(packet);
        let irq = self.reg(REG_IRQ_FLAGS) | IRQ_TX_DONE;
        self.set_reg(REG_IRQ_FLAGS, irq);
        self.set_reg(REG_OP_MODE, LONG_RANGE_MODE | MODE_STDBY);
    }
}

/// Handle to a simulated SX127x.
#[derive(Clone)]
pub struct SimChip {
    state: Rc<RefCell<ChipState>>,
}

impl SimChip {
    /// A powered chip with datasheet reset values.
    pub fn new() -> Self {
        SimChip {
            state: Rc::new(RefCell::new(ChipState::new())),
        }
    }

    /// Current register value as the chip holds it.
    pub fn register(&self, addr: u8) -> u8 {
        self.state.borrow().reg(addr)
    }

    /// Number of completed reset pulses.
    pub fn reset_pulses(&self) -> u32 {
        self.state.borrow().reset_pulses
    }

    /// Register and FIFO write accesses so far.
    pub fn write_count(&self) -> u64 {
        self.state.borrow().writes
    }

    /// Drain the packets that left the antenna.
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.borrow_mut().outbox)
    }

    /// Deliver a packet as if it had been received over the air.
    ///
    /// Only lands when the chip is listening in RX continuous mode; returns
    /// whether it did.
    pub fn inject_packet(&self, payload: &[u8], rssi_raw: u8, snr_raw: u8, crc_error: bool) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.is_receiving() || payload.is_empty() || payload.len() > MAX_PACKET_LEN {
            return false;
        }
        let base = state.reg(REG_FIFO_RX_BASE_ADDR);
        for (i, byte) in payload.iter().enumerate() {
            state.fifo[(usize::from(base) + i) % FIFO_SIZE] = *byte;
        }
        state.set_reg(REG_FIFO_RX_CURRENT_ADDR, base);
        state.set_reg(REG_RX_NB_BYTES, payload.len() as u8);
        state.set_reg(REG_PKT_RSSI_VALUE, rssi_raw);
        state.set_reg(REG_PKT_SNR_VALUE, snr_raw);
        let mut irq = state.reg(REG_IRQ_FLAGS) | IRQ_RX_DONE;
        if crc_error {
            irq |= IRQ_PAYLOAD_CRC_ERROR;
        }
        state.set_reg(REG_IRQ_FLAGS, irq);
        true
    }

    /// Fault injection: read this value from the version register.
    pub fn set_version_override(&self, version: Option<u8>) {
        self.state.borrow_mut().version_override = version;
    }

    /// Fault injection: never raise TX-done.
    pub fn set_stall_tx(&self, stall: bool) {
        self.state.borrow_mut().stall_tx = stall;
    }

    /// Fault injection: fail every bus access.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.borrow_mut().disconnected = disconnected;
    }

    /// Fault injection: overwrite the op-mode register behind the driver.
    pub fn force_op_mode(&self, value: u8) {
        self.state.borrow_mut().set_reg(REG_OP_MODE, value);
    }
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBus for SimChip {
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError> {
        let state = self.state.borrow();
        state.check_bus()?;
        match (addr, state.version_override) {
            (REG_VERSION, Some(version)) => Ok(version),
            _ => Ok(state.reg(addr)),
        }
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        state.check_bus()?;
        state.writes += 1;
        match addr {
            REG_IRQ_FLAGS => {
                let irq = state.reg(REG_IRQ_FLAGS) & !value;
                state.set_reg(REG_IRQ_FLAGS, irq);
            }
            REG_OP_MODE => state.write_op_mode(value),
            REG_VERSION | REG_RX_NB_BYTES | REG_FIFO_RX_CURRENT_ADDR => {}
            _ => state.set_reg(addr, value),
        }
        Ok(())
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        state.check_bus()?;
        state.writes += 1;
        for byte in data {
            let ptr = state.fifo_ptr_advance();
            state.fifo[ptr] = *byte;
        }
        Ok(())
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        state.check_bus()?;
        for slot in buf.iter_mut() {
            let ptr = state.fifo_ptr_advance();
            *slot = state.fifo[ptr];
        }
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        if !high {
            state.reset_held = true;
        } else if state.reset_held {
            state.reset_held = false;
            state.reset_pulses += 1;
            state.load_defaults();
            state.fifo = [0; FIFO_SIZE];
        }
        Ok(())
    }
}

/// Shared manual time source; `delay_ms` advances it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(u64::from(ms));
    }
}

/// Counters kept by [`SimAir`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AirStats {
    pub transmitted: u64,
    pub delivered: u64,
    /// Dropped by the loss model.
    pub lost: u64,
    /// Receiver was not listening.
    pub missed: u64,
}

/// Broadcast medium between simulated chips with seeded random loss.
pub struct SimAir {
    chips: Vec<SimChip>,
    loss_probability: f64,
    rssi_raw: u8,
    snr_raw: u8,
    rng: ChaCha8Rng,
    stats: AirStats,
}

impl SimAir {
    pub fn new(seed: u64) -> Self {
        SimAir {
            chips: Vec::new(),
            loss_probability: 0.0,
            rssi_raw: 100,
            snr_raw: 32,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: AirStats::default(),
        }
    }

    /// Probability that a packet is lost for each receiver, clamped to 0..=1.
    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Raw RSSI and SNR register values stamped on delivered packets.
    pub fn with_link_quality(mut self, rssi_raw: u8, snr_raw: u8) -> Self {
        self.rssi_raw = rssi_raw;
        self.snr_raw = snr_raw;
        self
    }

    /// Put a chip on the air.
    pub fn attach(&mut self, chip: SimChip) {
        self.chips.push(chip);
    }

    pub fn stats(&self) -> AirStats {
        self.stats
    }

    /// Move everything transmitted since the last step to every other chip.
    /// Returns the number of deliveries.
    pub fn step(&mut self) -> usize {
        let mut delivered = 0;
        for sender in 0..self.chips.len() {
            for packet in self.chips[sender].take_transmitted() {
                self.stats.transmitted += 1;
                for receiver in 0..self.chips.len() {
                    if receiver == sender {
                        continue;
                    }
                    if self.rng.gen_bool(self.loss_probability) {
                        self.stats.lost += 1;
                    } else if self.chips[receiver].inject_packet(&packet, self.rssi_raw, self.snr_raw, false) {
                        self.stats.delivered += 1;
                        delivered += 1;
                    } else {
                        self.stats.missed += 1;
                    }
                }
            }
        }
        delivered
    }
}
