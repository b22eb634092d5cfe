//! SX127x register map (LoRa mode) and bit definitions.

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_FRF_MID: u8 = 0x07;
pub const REG_FRF_LSB: u8 = 0x08;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_OCP: u8 = 0x0B;
pub const REG_LNA: u8 = 0x0C;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS_MASK: u8 = 0x11;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

/// Set on the register address byte for a write access.
pub const SPI_WRITE: u8 = 0x80;

// OpMode
pub const LONG_RANGE_MODE: u8 = 0x80;
pub const MODE_MASK: u8 = 0x07;
pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STDBY: u8 = 0x01;
pub const MODE_TX: u8 = 0x03;
pub const MODE_RX_CONTINUOUS: u8 = 0x05;

// IrqFlags
pub const IRQ_RX_DONE: u8 = 0x40;
pub const IRQ_PAYLOAD_CRC_ERROR: u8 = 0x20;
pub const IRQ_TX_DONE: u8 = 0x08;
pub const IRQ_ALL: u8 = 0xFF;

pub const LNA_BOOST_HF_ON: u8 = 0x03;
pub const OCP_DEFAULT: u8 = 0x2B;
pub const PA_BOOST: u8 = 0x80;
pub const PA_DAC_DEFAULT: u8 = 0x84;
pub const MODEM_CONFIG_3_AGC_AUTO: u8 = 0x04;
pub const MODEM_CONFIG_3_LOW_DATA_RATE: u8 = 0x08;
pub const MODEM_CONFIG_2_RX_CRC: u8 = 0x04;

/// Silicon revision reported by SX1276/77/78.
pub const SX127X_VERSION: u8 = 0x12;

/// Largest payload the packet engine accepts.
pub const MAX_PACKET_LEN: usize = 255;
/// FIFO size in bytes.
pub const FIFO_SIZE: usize = 256;

/// Crystal frequency used for the FRF ratio.
pub const FXOSC_HZ: u64 = 32_000_000;

/// Whether a version register value indicates a live chip.
///
/// 0x00 and 0xFF are what a floating or shorted MISO line reads back.
pub fn version_ok(version: u8) -> bool {
    version != 0x00 && version != 0xFF
}

/// Operational mode of the transceiver as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RadioMode {
    /// Lowest power, FIFO inaccessible.
    Sleep,
    /// Oscillator running, ready to switch.
    Standby,
    /// Transmitting the FIFO contents.
    Transmit,
    /// Listening; the only mode that captures packets.
    ReceiveContinuous,
}

impl RadioMode {
    /// Mode bits for `REG_OP_MODE`.
    pub fn bits(self) -> u8 {
        match self {
            RadioMode::Sleep => MODE_SLEEP,
            RadioMode::Standby => MODE_STDBY,
            RadioMode::Transmit => MODE_TX,
            RadioMode::ReceiveContinuous => MODE_RX_CONTINUOUS,
        }
    }

    /// Decode the mode bits of an `REG_OP_MODE` value.
    ///
    /// Returns `None` for modes the driver never uses (FS, RX single, CAD).
    pub fn from_op_mode(op_mode: u8) -> Option<Self> {
        match op_mode & MODE_MASK {
            MODE_SLEEP => Some(RadioMode::Sleep),
            MODE_STDBY => Some(RadioMode::Standby),
            MODE_TX => Some(RadioMode::Transmit),
            MODE_RX_CONTINUOUS => Some(RadioMode::ReceiveContinuous),
            _ => None,
        }
    }
}
