//! Lab relay simulation runner
//!
//! Runs the controller, the air relay and the ground station against each
//! other on the host. Radios are register-level SX127x models exchanging
//! packets over a seeded lossy channel, the controller is a virtual bench, and
//! time is a manual clock, so any run can be reproduced from its scenario.
//!
//! # Example
//!
//! ```rust
//! use labrelay_sim::{Scenario, ScenarioConfig};
//!
//! let config = ScenarioConfig { duration_ms: 1_000, ..Default::default() };
//! let mut scenario = Scenario::new(config).unwrap();
//! let summary = scenario.run(|event| println!("{}", event.line));
//! assert!(summary.link_alive);
//! ```

mod bench;
mod config;
mod error;
mod scenario;

pub use bench::*;
pub use config::*;
pub use error::*;
pub use scenario::*;
