//! The simulated controller: virtual sensors, the mode manager and the
//! over-temperature guard.

use labrelay_link::{ControlState, TelemetrySnapshot};
use labrelay_proto::ControlMode;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ControllerConfig;

/// Actuator commands computed each control cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Outputs {
    pub heater_pct: f32,
    pub valve_pct: f32,
    pub pump_temp_c: f32,
}

impl Outputs {
    /// Outputs for the current mode.
    ///
    /// Safe holds everything at zero. Manual applies only the channels the
    /// last manual command carried. Auto has no control law yet and also
    /// holds zero.
    pub fn for_state(state: &ControlState) -> Self {
        let mut out = Outputs::default();
        if state.mode == ControlMode::Manual {
            let manual = &state.manual;
            if manual.has_heater {
                out.heater_pct = manual.heater_pct;
            }
            if manual.has_valve {
                out.valve_pct = manual.valve_pct;
            }
            if manual.has_pump_temp {
                out.pump_temp_c = manual.pump_temp_c;
            }
        }
        out
    }
}

/// Counters kept by the bench.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BenchStats {
    pub control_cycles: u64,
    pub safety_trips: u64,
    pub link_losses: u64,
}

/// Controller-side plant and control loop.
pub struct Bench {
    config: ControllerConfig,
    outputs: Outputs,
    stats: BenchStats,
}

impl Bench {
    pub fn new(config: ControllerConfig) -> Self {
        Bench {
            config,
            outputs: Outputs::default(),
            stats: BenchStats::default(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Get the outputs applied in the last cycle.
    pub fn outputs(&self) -> Outputs {
        self.outputs
    }

    pub fn stats(&self) -> BenchStats {
        self.stats
    }

    /// Temperature channels at `now_ms`: each baseline plus a slow sine.
    pub fn read_temperatures(&self, now_ms: u64) -> Vec<f32> {
        let wander = self.config.wander_c * (now_ms as f32 / 5_000.0).sin();
        self.config
            .temperatures_c
            .iter()
            .map(|base| base + wander)
            .collect()
    }

    /// One control cycle: sample, watch the link, compute outputs, apply the
    /// safety clamp. Returns the snapshot telemetry should carry.
    pub fn cycle(&mut self, state: &mut ControlState, now_ms: u64) -> TelemetrySnapshot {
        self.stats.control_cycles += 1;
        let temperatures = self.read_temperatures(now_ms);

        if state.link_alive && !state.link_alive_at(now_ms, self.config.link_timeout_ms) {
            state.link_alive = false;
            self.stats.link_losses += 1;
            warn!("Bench: link lost at {} ms (last frame {:?} ms)", now_ms, state.last_link_ms);
        }

        let mut outputs = Outputs::for_state(state);
        if let Some(&t0) = temperatures.first() {
            if t0 > self.config.max_temp_c {
                if state.mode != ControlMode::Safe {
                    info!(
                        "Bench: {:.1} C over limit {:.1} C, forcing safe mode",
                        t0, self.config.max_temp_c
                    );
                    self.stats.safety_trips += 1;
                }
                state.mode = ControlMode::Safe;
                outputs.heater_pct = 0.0;
                outputs.valve_pct = 0.0;
            }
        }
        self.outputs = outputs;

        TelemetrySnapshot::new(
            &temperatures,
            self.config.pressure_pa,
            outputs.heater_pct,
            outputs.valve_pct,
        )
    }
}
