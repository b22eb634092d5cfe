use thiserror::Error;

/// Failure of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("SPI transfer failed: {0:?}")]
    Spi(embedded_hal::spi::ErrorKind),

    #[error("reset pin write failed: {0:?}")]
    Pin(embedded_hal::digital::ErrorKind),

    #[error("bus disconnected")]
    Disconnected,
}

/// Errors from bringing the radio up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("version register read 0x{0:02X}; chip absent or not powered")]
    BadVersion(u8),

    #[error("invalid radio configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result alias for radio operations.
pub type RadioResult<T> = Result<T, RadioError>;
