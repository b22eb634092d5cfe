//! Transports and link-level roles.
//!
//! - [`FrameLink`] moves whole frames over a wired byte channel
//!   ([`SerialLink`]) or over the LoRa driver ([`RadioFrameLink`]).
//! - [`ControllerLink`] is the controller-side transport adapter: it applies
//!   inbound commands to a [`ControlState`], answers them with Acks and sends
//!   telemetry.
//! - [`ReliableCommander`] sequences commands, matches Acks and retries.
//! - [`AirRelay`] bridges the controller's UART and the radio on the vehicle.
//! - [`GroundStation`] drives the commander from the ground side and renders
//!   what happens as console lines.

mod channel;
mod control;
mod error;
mod ground;
mod link;
mod relay;
mod reliable;

pub use channel::*;
pub use control::*;
pub use error::*;
pub use ground::*;
pub use link::*;
pub use relay::*;
pub use reliable::*;
