use labrelay_proto::ProtocolError;
use thiserror::Error;

/// Errors from sending frames or submitting commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The radio refused the send inside its guard interval. Try again later.
    #[error("radio busy")]
    Busy,

    /// The transport accepted the frame but could not put it on the medium.
    #[error("transmit failed")]
    TransmitFailed,

    /// The byte channel has been closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Only one command may await its Ack at a time.
    #[error("command 0x{msg_type:02X} seq {sequence} still awaiting Ack")]
    CommandPending {
        /// Message type of the outstanding command.
        msg_type: u8,
        /// Its sequence number.
        sequence: u8,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
