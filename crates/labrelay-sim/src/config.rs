//! Scenario configuration.
//!
//! A scenario is a YAML document describing the simulated bench: the seed and
//! length of the run, how lossy the air is, the tunables of each node and a
//! timeline of operator commands and radio faults.
//!
//! ```yaml
//! seed: 7
//! duration_ms: 8000
//! loss: 0.1
//! actions:
//!   - at_ms: 500
//!     action: mode
//!     mode: manual
//!   - at_ms: 1500
//!     action: manual
//!     heater_pct: 40.0
//!   - at_ms: 4000
//!     action: fault
//!     node: air
//!     fault: stall_tx
//!     duration_ms: 1000
//! ```

use std::path::Path;

use labrelay_link::{RelayConfig, ReliableConfig};
use labrelay_proto::{
    ControlMode, ManualCommand, Setpoints, MAN_FLAG_HEATER, MAN_FLAG_PUMP, MAN_FLAG_VALVE,
    SP_ENABLE_PRESSURE, SP_ENABLE_PUMP, SP_ENABLE_TEMP, SP_ENABLE_VALVE,
};
use labrelay_radio::RadioConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ScenarioError, ScenarioResult};

// ============================================================================
// Scenario
// ============================================================================

/// Everything needed to run one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Seed for the air's loss model.
    pub seed: u64,
    /// Simulated time to run.
    pub duration_ms: u64,
    /// Granularity of the main loop.
    pub step_ms: u64,
    /// Per-receiver packet loss probability, 0..=1.
    pub loss: f64,
    pub radio: RadioConfig,
    pub reliable: ReliableConfig,
    pub relay: RelayConfig,
    pub controller: ControllerConfig,
    /// Timeline of operator commands and faults, in any order.
    pub actions: Vec<ScheduledAction>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 0,
            duration_ms: 10_000,
            step_ms: 10,
            loss: 0.0,
            radio: RadioConfig::default(),
            reliable: ReliableConfig::default(),
            relay: RelayConfig::default(),
            controller: ControllerConfig::default(),
            actions: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    /// Parse a scenario from YAML text.
    pub fn from_yaml(text: &str) -> ScenarioResult<Self> {
        let config: ScenarioConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a scenario file.
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// The built-in walk through every command type and one radio fault.
    pub fn demo() -> Self {
        ScenarioConfig {
            seed: 1,
            duration_ms: 8_000,
            loss: 0.05,
            actions: vec![
                ScheduledAction::new(500, Action::Mode { mode: ControlMode::Manual }),
                ScheduledAction::new(
                    1_500,
                    Action::Manual(ManualAction {
                        heater_pct: Some(40.0),
                        valve_pct: Some(25.0),
                        pump_temp_c: None,
                    }),
                ),
                ScheduledAction::new(
                    3_000,
                    Action::Setpoints(SetpointAction {
                        temp_c: Some(45.0),
                        pressure_pa: Some(95_000.0),
                        valve_pct: None,
                        pump_temp_c: None,
                    }),
                ),
                ScheduledAction::new(3_500, Action::Mode { mode: ControlMode::Auto }),
                ScheduledAction::new(
                    5_000,
                    Action::Fault {
                        node: RadioNode::Air,
                        fault: RadioFault::StallTx,
                        duration_ms: 1_000,
                    },
                ),
                ScheduledAction::new(6_500, Action::Mode { mode: ControlMode::Safe }),
            ],
            ..Default::default()
        }
    }

    /// Check the values serde cannot.
    pub fn validate(&self) -> ScenarioResult<()> {
        if self.step_ms == 0 {
            return Err(ScenarioError::InvalidScenario("step_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(ScenarioError::InvalidScenario(format!(
                "loss {} outside 0..=1",
                self.loss
            )));
        }
        if self.controller.temperatures_c.is_empty() {
            return Err(ScenarioError::InvalidScenario(
                "controller needs at least one temperature channel".into(),
            ));
        }
        Ok(())
    }

    /// Actions sorted by time, stable for equal times.
    pub fn timeline(&self) -> Vec<ScheduledAction> {
        let mut actions = self.actions.clone();
        actions.sort_by_key(|a| a.at_ms);
        actions
    }
}

// ============================================================================
// Controller Bench
// ============================================================================

/// The simulated controller and its sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub telemetry_period_ms: u64,
    /// No valid frame for this long marks the link down.
    pub link_timeout_ms: u64,
    /// Baseline reading of each temperature channel.
    pub temperatures_c: Vec<f32>,
    /// Amplitude of the slow sine wander added to every channel.
    pub wander_c: f32,
    pub pressure_pa: f32,
    /// Above this on channel 0 the controller drops to Safe.
    pub max_temp_c: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            telemetry_period_ms: 200,
            link_timeout_ms: 1_500,
            temperatures_c: vec![20.0],
            wander_c: 2.0,
            pressure_pa: 101_325.0,
            max_temp_c: 80.0,
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// An action and when it happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

impl ScheduledAction {
    pub fn new(at_ms: u64, action: Action) -> Self {
        ScheduledAction { at_ms, action }
    }
}

/// Something the operator or the environment does to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Ground station sends a mode switch.
    Mode { mode: ControlMode },
    /// Ground station sends setpoints; absent loops are disabled.
    Setpoints(SetpointAction),
    /// Ground station sends a manual command; absent channels are not applied.
    Manual(ManualAction),
    /// A radio misbehaves for a while.
    Fault {
        node: RadioNode,
        fault: RadioFault,
        #[serde(default)]
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetpointAction {
    pub temp_c: Option<f32>,
    pub pressure_pa: Option<f32>,
    pub valve_pct: Option<f32>,
    pub pump_temp_c: Option<f32>,
}

impl SetpointAction {
    /// Wire record with an enable bit for every given target.
    pub fn to_record(&self) -> Setpoints {
        let mut enable_mask = 0;
        let mut target = |value: Option<f32>, bit: u8| {
            if value.is_some() {
                enable_mask |= bit;
            }
            value.unwrap_or(0.0)
        };
        let target_temp_c = target(self.temp_c, SP_ENABLE_TEMP);
        let target_pressure_pa = target(self.pressure_pa, SP_ENABLE_PRESSURE);
        let target_valve_pct = target(self.valve_pct, SP_ENABLE_VALVE);
        let target_pump_temp_c = target(self.pump_temp_c, SP_ENABLE_PUMP);
        Setpoints {
            target_temp_c,
            target_pressure_pa,
            target_valve_pct,
            target_pump_temp_c,
            enable_mask,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualAction {
    pub heater_pct: Option<f32>,
    pub valve_pct: Option<f32>,
    pub pump_temp_c: Option<f32>,
}

impl ManualAction {
    /// Wire record with a presence flag for every given channel.
    pub fn to_record(&self) -> ManualCommand {
        let mut flags = 0;
        let mut channel = |value: Option<f32>, bit: u8| {
            if value.is_some() {
                flags |= bit;
            }
            value.unwrap_or(0.0)
        };
        let heater_pct = channel(self.heater_pct, MAN_FLAG_HEATER);
        let valve_pct = channel(self.valve_pct, MAN_FLAG_VALVE);
        let pump_temp_c = channel(self.pump_temp_c, MAN_FLAG_PUMP);
        ManualCommand {
            flags,
            heater_pct,
            valve_pct,
            pump_temp_c,
        }
    }
}

/// Which gateway radio a fault hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioNode {
    Ground,
    Air,
}

impl RadioNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioNode::Ground => "ground",
            RadioNode::Air => "air",
        }
    }
}

/// Chip misbehaviour the simulated radio can be told to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioFault {
    /// TX-done never rises, so every transmit times out.
    StallTx,
    /// The version register reads back garbage.
    BadVersion,
    /// The chip drops out of LoRa mode once; `duration_ms` is ignored.
    ModeDrift,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware() {
        let config = ScenarioConfig::default();
        assert_eq!(config.step_ms, 10);
        assert_eq!(config.controller.telemetry_period_ms, 200);
        assert_eq!(config.controller.link_timeout_ms, 1_500);
        assert_eq!(config.reliable.ack_timeout_ms, 400);
        assert_eq!(config.reliable.max_retries, 3);
        assert_eq!(config.relay.heartbeat_period_ms, 500);
        assert_eq!(config.radio.tx_timeout_ms, 800);
    }

    #[test]
    fn test_parse_yaml_timeline() {
        let yaml = r#"
seed: 7
duration_ms: 3000
loss: 0.2
radio:
  tx_guard_ms: 8
actions:
  - at_ms: 2000
    action: fault
    node: ground
    fault: bad_version
  - at_ms: 500
    action: mode
    mode: manual
  - at_ms: 1000
    action: manual
    heater_pct: 40.0
  - at_ms: 1500
    action: setpoints
    temp_c: 45.0
"#;
        let config = ScenarioConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.radio.tx_guard_ms, 8);
        assert_eq!(config.radio.tx_timeout_ms, 800);

        let timeline = config.timeline();
        assert_eq!(timeline[0].action, Action::Mode { mode: ControlMode::Manual });
        assert_eq!(
            timeline[3].action,
            Action::Fault {
                node: RadioNode::Ground,
                fault: RadioFault::BadVersion,
                duration_ms: 0
            }
        );
        match timeline[1].action {
            Action::Manual(m) => {
                let record = m.to_record();
                assert_eq!(record.flags, MAN_FLAG_HEATER);
                assert_eq!(record.heater_pct, 40.0);
            }
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_setpoint_enable_mask() {
        let action = SetpointAction {
            temp_c: Some(45.0),
            pump_temp_c: Some(60.0),
            ..Default::default()
        };
        let record = action.to_record();
        assert_eq!(record.enable_mask, SP_ENABLE_TEMP | SP_ENABLE_PUMP);
        assert_eq!(record.target_pressure_pa, 0.0);
        assert_eq!(record.target_pump_temp_c, 60.0);
    }

    #[test]
    fn test_validation() {
        let bad_loss = ScenarioConfig {
            loss: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad_loss.validate(), Err(ScenarioError::InvalidScenario(_))));

        let bad_step = ScenarioConfig {
            step_ms: 0,
            ..Default::default()
        };
        assert!(bad_step.validate().is_err());

        assert!(ScenarioConfig::from_yaml("loss: -0.1").is_err());
        assert!(ScenarioConfig::demo().validate().is_ok());
    }

    #[test]
    fn test_bundled_demo_scenario_parses() {
        let config = ScenarioConfig::from_yaml(include_str!("../scenarios/demo.yaml")).unwrap();
        assert!(!config.actions.is_empty());
    }
}
