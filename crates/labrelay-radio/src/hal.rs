//! Hardware seams: register bus and millisecond clock.

use std::time::Instant;

use embedded_hal::digital::{Error as _, OutputPin};
use embedded_hal::spi::{Error as _, Operation, SpiDevice};

use crate::error::BusError;
use crate::registers::{REG_FIFO, SPI_WRITE};

/// Register-level access to an SX127x.
pub trait RadioBus {
    /// Read one register.
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError>;

    /// Write one register.
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError>;

    /// Burst write into the FIFO at the current FIFO pointer.
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), BusError>;

    /// Burst read from the FIFO at the current FIFO pointer.
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Drive the active-low reset line. `true` releases the chip.
    fn set_reset(&mut self, high: bool) -> Result<(), BusError>;
}

/// Monotonic millisecond time source with a blocking delay.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;

    /// Block for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// [`RadioBus`] over an `embedded-hal` SPI device and reset pin.
///
/// The SPI device owns chip select; each register access is one transaction.
pub struct SpiRadioBus<SPI, RST> {
    spi: SPI,
    reset: RST,
}

impl<SPI, RST> SpiRadioBus<SPI, RST>
where
    SPI: SpiDevice,
    RST: OutputPin,
{
    pub fn new(spi: SPI, reset: RST) -> Self {
        SpiRadioBus { spi, reset }
    }

    /// Give back the SPI device and reset pin.
    pub fn release(self) -> (SPI, RST) {
        (self.spi, self.reset)
    }
}

impl<SPI, RST> RadioBus for SpiRadioBus<SPI, RST>
where
    SPI: SpiDevice,
    RST: OutputPin,
{
    fn read_register(&mut self, addr: u8) -> Result<u8, BusError> {
        let mut value = [0u8];
        self.spi
            .transaction(&mut [Operation::Write(&[addr & !SPI_WRITE]), Operation::Read(&mut value)])
            .map_err(|e| BusError::Spi(e.kind()))?;
        Ok(value[0])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), BusError> {
        self.spi
            .write(&[addr | SPI_WRITE, value])
            .map_err(|e| BusError::Spi(e.kind()))
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.spi
            .transaction(&mut [Operation::Write(&[REG_FIFO | SPI_WRITE]), Operation::Write(data)])
            .map_err(|e| BusError::Spi(e.kind()))
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.spi
            .transaction(&mut [Operation::Write(&[REG_FIFO]), Operation::Read(buf)])
            .map_err(|e| BusError::Spi(e.kind()))
    }

    fn set_reset(&mut self, high: bool) -> Result<(), BusError> {
        let result = if high { self.reset.set_high() } else { self.reset.set_low() };
        result.map_err(|e| BusError::Pin(e.kind()))
    }
}

/// Wall clock backed by [`Instant`], delays via `thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    epoch: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        StdClock { epoch: Instant::now() }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
