//! Three-node scenario runner.
//!
//! The ground station and the air relay each drive a simulated SX127x; the
//! two chips share a lossy [`SimAir`]. The air relay reaches the controller
//! over an in-memory UART. Everything runs on one [`ManualClock`], so a run is
//! a pure function of its [`ScenarioConfig`].

use std::collections::VecDeque;

use labrelay_link::{
    AirRelay, CommandStats, ControlState, ControllerLink, GroundEvent, GroundStation, LinkError,
    MemoryChannel, RadioFrameLink, RelayStats, SerialLink,
};
use labrelay_proto::ControlMode;
use labrelay_radio::registers::MODE_STDBY;
use labrelay_radio::sim::{AirStats, ManualClock, SimAir, SimChip};
use labrelay_radio::{Diagnostics, LoRaLink, RadioConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bench::{Bench, BenchStats, Outputs};
use crate::config::{Action, RadioFault, RadioNode, ScenarioConfig, ScheduledAction};
use crate::error::{ScenarioError, ScenarioResult};

/// Interval between bring-up attempts on a radio whose self-heal failed.
const RADIO_RESTART_MS: u64 = 1_000;

/// Garbage the version register returns during a `bad_version` fault.
const BAD_VERSION_VALUE: u8 = 0x00;

type SimRadio = RadioFrameLink<SimChip, ManualClock>;
type Wired = SerialLink<MemoryChannel>;

// ============================================================================
// Events and Summary
// ============================================================================

/// A ground console event and when it happened.
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    pub line: String,
    pub event: GroundEvent,
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub elapsed_ms: u64,
    pub final_mode: ControlMode,
    pub link_alive: bool,
    pub outputs: Outputs,
    pub commands: CommandStats,
    /// Scripted commands refused because one was still outstanding.
    pub rejected_commands: u64,
    pub controller_acks: u32,
    pub relay: RelayStats,
    pub air: AirStats,
    pub bench: BenchStats,
    pub radio_restarts: u64,
    pub ground_radio: Diagnostics,
    pub air_radio: Diagnostics,
}

impl Summary {
    /// Human-readable report, one line per subsystem.
    pub fn lines(&self) -> Vec<String> {
        let radio = |name: &str, d: &Diagnostics| {
            format!(
                "[SIM] {} radio: tx={} rx={} crc_drops={} reinit={} (version={} tx_timeout={} mode={})",
                name,
                d.tx_packets,
                d.rx_packets,
                d.rx_crc_errors,
                d.reinit_total,
                d.reinit_version_bad,
                d.reinit_tx_timeout,
                d.reinit_mode_bad
            )
        };
        vec![
            format!(
                "[SIM] t={} ms mode={:?} link_alive={} heater=%={:.1} valve=%={:.1}",
                self.elapsed_ms,
                self.final_mode,
                self.link_alive,
                self.outputs.heater_pct,
                self.outputs.valve_pct
            ),
            format!(
                "[SIM] commands: sent={} acked={} retries={} failed={} rejected={}",
                self.commands.submitted,
                self.commands.acked,
                self.commands.retries,
                self.commands.failed,
                self.rejected_commands
            ),
            format!(
                "[SIM] relay: uplinked={} downlinked={} superseded={} dropped={} heartbeats={}",
                self.relay.uplinked,
                self.relay.downlinked,
                self.relay.telemetry_superseded,
                self.relay.dropped,
                self.relay.heartbeats
            ),
            format!(
                "[SIM] air: transmitted={} delivered={} lost={} missed={}",
                self.air.transmitted, self.air.delivered, self.air.lost, self.air.missed
            ),
            radio("ground", &self.ground_radio),
            radio("air", &self.air_radio),
        ]
    }
}

// ============================================================================
// Scenario
// ============================================================================

struct FaultClear {
    at_ms: u64,
    node: RadioNode,
    fault: RadioFault,
}

/// A running simulation.
pub struct Scenario {
    config: ScenarioConfig,
    clock: ManualClock,
    air: SimAir,
    ground_chip: SimChip,
    air_chip: SimChip,
    ground: GroundStation<SimRadio>,
    relay: AirRelay<Wired, SimRadio>,
    controller: ControllerLink<Wired>,
    bench: Bench,
    state: ControlState,
    timeline: VecDeque<ScheduledAction>,
    fault_clears: Vec<FaultClear>,
    last_telemetry_ms: Option<u64>,
    last_restart_ms: [Option<u64>; 2],
    rejected_commands: u64,
    radio_restarts: u64,
    start_ms: u64,
}

fn start_radio(
    node: RadioNode,
    clock: &ManualClock,
    config: &RadioConfig,
) -> ScenarioResult<(SimRadio, SimChip)> {
    let chip = SimChip::new();
    let mut radio = LoRaLink::new(chip.clone(), clock.clone(), config.clone());
    radio.initialize().map_err(|source| ScenarioError::RadioError {
        node: node.as_str(),
        source,
    })?;
    Ok((RadioFrameLink::new(radio), chip))
}

impl Scenario {
    /// Build the three nodes and bring both radios up.
    pub fn new(config: ScenarioConfig) -> ScenarioResult<Self> {
        config.validate()?;

        let clock = ManualClock::new(0);
        let (ground_radio, ground_chip) = start_radio(RadioNode::Ground, &clock, &config.radio)?;
        let (air_radio, air_chip) = start_radio(RadioNode::Air, &clock, &config.radio)?;
        // Bring-up delays ran on the shared clock; scenario time starts here.
        let start_ms = clock.now();

        let mut air = SimAir::new(config.seed).with_loss(config.loss);
        air.attach(ground_chip.clone());
        air.attach(air_chip.clone());

        let (relay_uart, controller_uart) = MemoryChannel::pair();

        info!(
            "Scenario: seed {} for {} ms, loss {:.2}, {} scripted actions",
            config.seed,
            config.duration_ms,
            config.loss,
            config.actions.len()
        );

        Ok(Scenario {
            ground: GroundStation::new(ground_radio, config.reliable.clone()),
            relay: AirRelay::new(SerialLink::new(relay_uart), air_radio, config.relay.clone()),
            controller: ControllerLink::new(SerialLink::new(controller_uart)),
            bench: Bench::new(config.controller.clone()),
            state: ControlState::default(),
            timeline: config.timeline().into(),
            fault_clears: Vec::new(),
            last_telemetry_ms: None,
            last_restart_ms: [None; 2],
            rejected_commands: 0,
            radio_restarts: 0,
            start_ms,
            clock,
            air,
            ground_chip,
            air_chip,
            config,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Get the simulated time elapsed since both radios came up.
    pub fn now_ms(&self) -> u64 {
        self.clock.now().saturating_sub(self.start_ms)
    }

    pub fn is_finished(&self) -> bool {
        self.now_ms() >= self.config.duration_ms
    }

    /// Get the controller's command-side state.
    pub fn control_state(&self) -> &ControlState {
        &self.state
    }

    pub fn bench(&self) -> &Bench {
        &self.bench
    }

    pub fn ground(&self) -> &GroundStation<SimRadio> {
        &self.ground
    }

    pub fn relay(&self) -> &AirRelay<Wired, SimRadio> {
        &self.relay
    }

    /// Advance one step and return the console events it produced.
    pub fn step(&mut self) -> Vec<TimedEvent> {
        self.clock.advance(self.config.step_ms);
        let now = self.clock.now();
        let elapsed = self.now_ms();

        self.run_due_actions(elapsed, now);
        self.clear_due_faults(now);
        self.supervise_radios(now);

        let events: Vec<TimedEvent> = self
            .ground
            .poll(now)
            .into_iter()
            .map(|event| TimedEvent {
                at_ms: elapsed,
                line: event.console_line(),
                event,
            })
            .collect();

        self.air.step();
        self.relay.poll(self.clock.now());
        self.air.step();

        let now = self.clock.now();
        self.controller.poll(&mut self.state, now);
        let snapshot = self.bench.cycle(&mut self.state, now);
        let due = self
            .last_telemetry_ms
            .map_or(true, |last| now.saturating_sub(last) >= self.config.controller.telemetry_period_ms);
        if due {
            self.last_telemetry_ms = Some(now);
            if let Err(e) = self.controller.send_telemetry(&snapshot, now) {
                warn!("Scenario: controller telemetry not sent: {}", e);
            }
        }
        events
    }

    /// Run to the configured duration, handing each event to `on_event`.
    pub fn run(&mut self, mut on_event: impl FnMut(&TimedEvent)) -> Summary {
        while !self.is_finished() {
            for event in self.step() {
                on_event(&event);
            }
        }
        let summary = self.summary();
        info!(
            "Scenario: finished at {} ms, {} commands acked of {}",
            summary.elapsed_ms, summary.commands.acked, summary.commands.submitted
        );
        summary
    }

    /// Get a snapshot of every counter in the system.
    pub fn summary(&self) -> Summary {
        Summary {
            elapsed_ms: self.now_ms(),
            final_mode: self.state.mode,
            link_alive: self.state.link_alive,
            outputs: self.bench.outputs(),
            commands: self.ground.commander().stats(),
            rejected_commands: self.rejected_commands,
            controller_acks: self.controller.acks_sent(),
            relay: self.relay.stats(),
            air: self.air.stats(),
            bench: self.bench.stats(),
            radio_restarts: self.radio_restarts,
            ground_radio: self.ground.link().radio().diagnostics().clone(),
            air_radio: self.relay.radio().radio().diagnostics().clone(),
        }
    }

    fn run_due_actions(&mut self, elapsed: u64, now: u64) {
        while self.timeline.front().is_some_and(|a| a.at_ms <= elapsed) {
            let Some(scheduled) = self.timeline.pop_front() else {
                break;
            };
            self.apply(scheduled.action, now);
        }
    }

    fn apply(&mut self, action: Action, now: u64) {
        let submitted = match action {
            Action::Mode { mode } => self.ground.set_mode(mode, now),
            Action::Setpoints(sp) => self.ground.send_setpoints(&sp.to_record(), now),
            Action::Manual(cmd) => self.ground.send_manual(&cmd.to_record(), now),
            Action::Fault { node, fault, duration_ms } => {
                self.inject_fault(node, fault, duration_ms, now);
                return;
            }
        };
        match submitted {
            Ok(seq) => info!("Scenario: t={} submitted {:?} as seq {}", now, action, seq),
            Err(LinkError::CommandPending { msg_type, sequence }) => {
                self.rejected_commands += 1;
                warn!(
                    "Scenario: t={} {:?} refused, msg=0x{:02X} seq={} still pending",
                    now, action, msg_type, sequence
                );
            }
            Err(e) => {
                self.rejected_commands += 1;
                warn!("Scenario: t={} {:?} failed: {}", now, action, e);
            }
        }
    }

    fn chip(&self, node: RadioNode) -> &SimChip {
        match node {
            RadioNode::Ground => &self.ground_chip,
            RadioNode::Air => &self.air_chip,
        }
    }

    fn inject_fault(&mut self, node: RadioNode, fault: RadioFault, duration_ms: u64, now: u64) {
        info!("Scenario: t={} {:?} fault on {} radio", now, fault, node.as_str());
        let chip = self.chip(node);
        match fault {
            RadioFault::StallTx => chip.set_stall_tx(true),
            RadioFault::BadVersion => chip.set_version_override(Some(BAD_VERSION_VALUE)),
            RadioFault::ModeDrift => {
                chip.force_op_mode(MODE_STDBY);
                return;
            }
        }
        if duration_ms > 0 {
            self.fault_clears.push(FaultClear {
                at_ms: now + duration_ms,
                node,
                fault,
            });
        }
    }

    fn clear_due_faults(&mut self, now: u64) {
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.fault_clears)
            .into_iter()
            .partition(|c| c.at_ms <= now);
        self.fault_clears = pending;
        for clear in due {
            debug!("Scenario: t={} {:?} fault on {} radio cleared", now, clear.fault, clear.node.as_str());
            let chip = self.chip(clear.node);
            match clear.fault {
                RadioFault::StallTx => chip.set_stall_tx(false),
                RadioFault::BadVersion => chip.set_version_override(None),
                RadioFault::ModeDrift => {}
            }
        }
    }

    /// Gateways retry bring-up of a radio that self-heal could not recover.
    fn supervise_radios(&mut self, now: u64) {
        for (slot, node) in [RadioNode::Ground, RadioNode::Air].into_iter().enumerate() {
            let radio = match node {
                RadioNode::Ground => self.ground.link_mut().radio_mut(),
                RadioNode::Air => self.relay.radio_mut().radio_mut(),
            };
            if radio.is_initialized() {
                continue;
            }
            let due = self.last_restart_ms[slot]
                .map_or(true, |last| now.saturating_sub(last) >= RADIO_RESTART_MS);
            if !due {
                continue;
            }
            self.last_restart_ms[slot] = Some(now);
            self.radio_restarts += 1;
            match radio.initialize() {
                Ok(()) => info!("Scenario: {} radio restarted", node.as_str()),
                Err(e) => debug!("Scenario: {} radio still down: {}", node.as_str(), e),
            }
        }
    }
}
