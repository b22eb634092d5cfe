//! Radio configuration.

use serde::{Deserialize, Serialize};

use crate::error::RadioError;
use crate::registers::*;

/// Modem and timing parameters. Both ends of a link must agree on the modem
/// fields (frequency through CRC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Carrier frequency in Hz.
    pub frequency_hz: u32,
    /// Spreading factor, 6..=12.
    pub spreading_factor: u8,
    /// Signal bandwidth in Hz (7.8 kHz .. 500 kHz).
    pub bandwidth_hz: u32,
    /// Coding rate denominator, 5..=8 for 4/5 .. 4/8.
    pub coding_rate_denom: u8,
    /// LoRa sync word. 0x12 is the private-network default.
    pub sync_word: u8,
    /// Output power on PA_BOOST, clamped to 2..=17 dBm.
    pub tx_power_dbm: i8,
    /// Enable the PHY payload CRC.
    pub crc_enabled: bool,
    /// Preamble length in symbols.
    pub preamble_len: u16,
    /// Minimum spacing between transmit attempts.
    pub tx_guard_ms: u64,
    /// Hard deadline for the TX-done interrupt.
    pub tx_timeout_ms: u64,
    /// Interval of the receive-mode watchdog.
    pub rx_mode_check_ms: u64,
    /// Interval of the register health check (0 disables it).
    pub health_check_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            frequency_hz: 433_000_000,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate_denom: 5,
            sync_word: 0x12,
            tx_power_dbm: 17,
            crc_enabled: true,
            preamble_len: 8,
            tx_guard_ms: 5,
            tx_timeout_ms: 800,
            rx_mode_check_ms: 300,
            health_check_ms: 2000,
        }
    }
}

impl RadioConfig {
    /// Check the modem parameters are within what the chip supports.
    pub fn validate(&self) -> Result<(), RadioError> {
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(RadioError::InvalidConfig(format!(
                "spreading factor {} outside 6..=12",
                self.spreading_factor
            )));
        }
        if !(5..=8).contains(&self.coding_rate_denom) {
            return Err(RadioError::InvalidConfig(format!(
                "coding rate 4/{} outside 4/5..=4/8",
                self.coding_rate_denom
            )));
        }
        if self.bandwidth_hz == 0 {
            return Err(RadioError::InvalidConfig("bandwidth must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Frequency synthesizer ratio: `freq * 2^19 / FXOSC`.
    pub fn frf(&self) -> u32 {
        ((u64::from(self.frequency_hz) << 19) / FXOSC_HZ) as u32
    }

    /// Bandwidth register code (0 = 7.8 kHz .. 9 = 500 kHz).
    pub fn bandwidth_code(&self) -> u8 {
        const TABLE: [u32; 9] = [7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000];
        TABLE
            .iter()
            .position(|&limit| self.bandwidth_hz <= limit)
            .map_or(9, |code| code as u8)
    }

    /// Coding rate register code (1 = 4/5 .. 4 = 4/8).
    pub fn coding_rate_code(&self) -> u8 {
        self.coding_rate_denom.clamp(5, 8) - 4
    }

    /// `REG_MODEM_CONFIG_1`: bandwidth, coding rate, explicit header.
    pub fn modem_config_1(&self) -> u8 {
        (self.bandwidth_code() << 4) | (self.coding_rate_code() << 1)
    }

    /// `REG_MODEM_CONFIG_2`: spreading factor and RX CRC.
    pub fn modem_config_2(&self) -> u8 {
        let mut value = self.spreading_factor.clamp(6, 12) << 4;
        if self.crc_enabled {
            value |= MODEM_CONFIG_2_RX_CRC;
        }
        value
    }

    /// `REG_MODEM_CONFIG_3`: AGC auto, plus low data rate optimisation when
    /// symbols get long (SF11/12 at 125 kHz or narrower).
    pub fn modem_config_3(&self) -> u8 {
        let mut value = MODEM_CONFIG_3_AGC_AUTO;
        if self.spreading_factor >= 11 && self.bandwidth_hz <= 125_000 {
            value |= MODEM_CONFIG_3_LOW_DATA_RATE;
        }
        value
    }

    /// `REG_PA_CONFIG` for the PA_BOOST output.
    pub fn pa_config(&self) -> u8 {
        let power = self.tx_power_dbm.clamp(2, 17);
        PA_BOOST | (power - 2) as u8
    }
}
