//! Controller, air relay and ground station wired together over the
//! simulated radio.

use labrelay_link::{
    AirRelay, CommandEvent, ControlState, ControllerLink, GroundEvent, GroundStation,
    MemoryChannel, RadioFrameLink, RelayConfig, ReliableConfig, SerialLink, TelemetrySnapshot,
};
use labrelay_proto::{AckStatus, ControlMode, Setpoints, MSG_MODE_SWITCH, SP_ENABLE_TEMP};
use labrelay_radio::sim::{ManualClock, SimAir, SimChip};
use labrelay_radio::{LoRaLink, RadioConfig};

type Radio = RadioFrameLink<SimChip, ManualClock>;

struct Testbed {
    clock: ManualClock,
    air: SimAir,
    ground: GroundStation<Radio>,
    relay: AirRelay<SerialLink<MemoryChannel>, Radio>,
    controller: ControllerLink<SerialLink<MemoryChannel>>,
    state: ControlState,
    events: Vec<GroundEvent>,
    last_telemetry_ms: u64,
}

fn radio(clock: &ManualClock) -> (Radio, SimChip) {
    let chip = SimChip::new();
    let mut driver = LoRaLink::new(chip.clone(), clock.clone(), RadioConfig::default());
    driver.initialize().expect("radio init");
    (RadioFrameLink::new(driver), chip)
}

impl Testbed {
    fn new(loss: f64) -> Self {
        let clock = ManualClock::new(0);
        let (ground_radio, ground_chip) = radio(&clock);
        let (air_radio, air_chip) = radio(&clock);
        let mut air = SimAir::new(3).with_loss(loss);
        air.attach(ground_chip);
        air.attach(air_chip);

        let (relay_uart, controller_uart) = MemoryChannel::pair();
        Testbed {
            air,
            ground: GroundStation::new(ground_radio, ReliableConfig::default()),
            relay: AirRelay::new(SerialLink::new(relay_uart), air_radio, RelayConfig::default()),
            controller: ControllerLink::new(SerialLink::new(controller_uart)),
            state: ControlState::default(),
            events: Vec::new(),
            last_telemetry_ms: 0,
            clock,
        }
    }

    fn step(&mut self) {
        self.clock.advance(10);
        let now = self.clock.now();
        self.events.extend(self.ground.poll(now));
        self.air.step();
        self.relay.poll(now);
        self.air.step();
        self.controller.poll(&mut self.state, now);
        if now - self.last_telemetry_ms >= 200 {
            self.last_telemetry_ms = now;
            let snapshot = TelemetrySnapshot::new(&[21.5, 22.0, 23.0], 98_000.0, 40.0, 10.0);
            self.controller
                .send_telemetry(&snapshot, now)
                .expect("telemetry on the wire");
        }
    }

    fn run_for(&mut self, ms: u64) {
        for _ in 0..ms / 10 {
            self.step();
        }
    }

    fn command_events(&self) -> Vec<CommandEvent> {
        self.events
            .iter()
            .filter_map(|e| match e {
                GroundEvent::Command(c) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn test_mode_switch_reaches_controller_and_is_acked() {
    let mut bed = Testbed::new(0.0);
    let now = bed.clock.now();
    let seq = bed.ground.set_mode(ControlMode::Manual, now).unwrap();

    bed.run_for(300);

    assert_eq!(bed.state.mode, ControlMode::Manual);
    assert!(bed.state.link_alive);
    let acked: Vec<_> = bed
        .command_events()
        .into_iter()
        .filter(|e| matches!(e, CommandEvent::Acked { .. }))
        .collect();
    assert_eq!(acked.len(), 1);
    match acked[0] {
        CommandEvent::Acked { msg_type, sequence, status, attempts, .. } => {
            assert_eq!(msg_type, MSG_MODE_SWITCH);
            assert_eq!(sequence, seq);
            assert_eq!(status, AckStatus::Ok);
            assert_eq!(attempts, 1);
        }
        _ => unreachable!(),
    }
    assert!(bed.ground.commander().is_idle());
    assert!(bed
        .events
        .iter()
        .any(|e| e.console_line() == format!("[CMD] ACK received for msg=0x10 seq={} status=0", seq)));
}

#[test]
fn test_telemetry_reaches_ground() {
    let mut bed = Testbed::new(0.0);
    bed.run_for(1_200);

    let telemetry: Vec<_> = bed
        .events
        .iter()
        .filter_map(|e| match e {
            GroundEvent::Telemetry(t) => Some(*t),
            _ => None,
        })
        .collect();
    // Controller sends every 200 ms, relay thins to one per 500 ms.
    assert!((2..=4).contains(&telemetry.len()), "{} telemetry frames", telemetry.len());
    assert_eq!(telemetry[0].temperatures(), &[21.5, 22.0, 23.0]);
    assert!(bed.ground.last_telemetry().is_some());
    assert!(bed.relay.stats().telemetry_superseded > 0);
}

#[test]
fn test_heartbeat_keeps_controller_link_alive() {
    let mut bed = Testbed::new(0.0);
    bed.run_for(2_000);
    let now = bed.clock.now();
    assert!(bed.state.link_alive_at(now, 1_500));
    assert!(bed.relay.stats().heartbeats >= 4);
}

#[test]
fn test_setpoints_survive_lossy_link() {
    let mut bed = Testbed::new(0.3);
    let sp = Setpoints {
        target_temp_c: 45.0,
        enable_mask: SP_ENABLE_TEMP,
        ..Default::default()
    };
    let now = bed.clock.now();
    bed.ground.send_setpoints(&sp, now).unwrap();
    bed.run_for(2_000);

    let outcome = bed
        .command_events()
        .into_iter()
        .find(|e| matches!(e, CommandEvent::Acked { .. } | CommandEvent::Failed { .. }));
    match outcome {
        Some(CommandEvent::Acked { .. }) => {
            assert!(bed.state.setpoints.temp_enabled);
            assert_eq!(bed.state.setpoints.target_temp_c, 45.0);
        }
        Some(CommandEvent::Failed { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("command unresolved: {:?}", other),
    }
}

#[test]
fn test_dead_air_fails_after_retries() {
    let mut bed = Testbed::new(1.0);
    let now = bed.clock.now();
    let seq = bed.ground.set_mode(ControlMode::Auto, now).unwrap();
    bed.run_for(1_700);

    let events = bed.command_events();
    let retries = events
        .iter()
        .filter(|e| matches!(e, CommandEvent::Retried { .. }))
        .count();
    assert_eq!(retries, 3);
    assert_eq!(
        events.last(),
        Some(&CommandEvent::Failed { msg_type: MSG_MODE_SWITCH, sequence: seq, attempts: 4 })
    );
    assert_eq!(bed.state.mode, ControlMode::Safe);
    assert!(bed
        .events
        .iter()
        .any(|e| e.console_line() == format!("[CMD] FAIL: no ACK for msg=0x10 seq={}", seq)));
}
