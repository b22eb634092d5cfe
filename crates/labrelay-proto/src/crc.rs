//! CRC-16/MODBUS.

const POLY_REFLECTED: u16 = 0xA001;
const SEED: u16 = 0xFFFF;

/// Compute CRC-16/MODBUS over `data`.
///
/// Polynomial 0x8005 processed LSB-first (reflected 0xA001), seed 0xFFFF,
/// no final XOR.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16_modbus_update(SEED, data)
}

/// Continue a CRC-16/MODBUS computation from a previous state.
///
/// `crc16_modbus_update(crc16_modbus(a), b) == crc16_modbus(a ++ b)`.
pub fn crc16_modbus_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_empty_is_seed() {
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data = [0x06, 0x10, 0x01, 0x02, 0xAA, 0x55];
        let split = crc16_modbus_update(crc16_modbus(&data[..3]), &data[3..]);
        assert_eq!(split, crc16_modbus(&data));
    }
}
