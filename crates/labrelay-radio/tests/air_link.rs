//! Two drivers talking over the simulated air.

use labrelay_radio::sim::{ManualClock, SimAir, SimChip};
use labrelay_radio::{LoRaLink, RadioConfig, ReinitReason, TxResult};

fn node(clock: &ManualClock) -> (LoRaLink<SimChip, ManualClock>, SimChip) {
    let chip = SimChip::new();
    let mut link = LoRaLink::new(chip.clone(), clock.clone(), RadioConfig::default());
    link.initialize().expect("radio init");
    (link, chip)
}

#[test]
fn test_packet_crosses_air() {
    let clock = ManualClock::new(0);
    let (mut ground, ground_chip) = node(&clock);
    let (mut air_node, air_chip) = node(&clock);

    let mut air = SimAir::new(42).with_link_quality(120, 40);
    air.attach(ground_chip);
    air.attach(air_chip);

    assert_eq!(ground.transmit(&[0xAA, 0x55, 0x01]), TxResult::Ok);
    assert_eq!(air.step(), 1);

    let mut buf = [0u8; 64];
    let packet = air_node.poll_receive(&mut buf).expect("packet");
    assert_eq!(&buf[..packet.len], &[0xAA, 0x55, 0x01]);
    assert_eq!(packet.rssi_dbm, -44);
    assert_eq!(packet.snr_db, 10.0);

    assert!(ground.poll_receive(&mut buf).is_none());
}

#[test]
fn test_link_recovers_after_timeout() {
    let clock = ManualClock::new(0);
    let (mut ground, ground_chip) = node(&clock);
    let (mut air_node, air_chip) = node(&clock);

    let mut air = SimAir::new(1);
    air.attach(ground_chip.clone());
    air.attach(air_chip);

    ground_chip.set_stall_tx(true);
    assert_eq!(ground.transmit(&[1, 2]), TxResult::Fail);
    assert_eq!(ground.diagnostics().reinit_count(ReinitReason::TransmitTimeout), 1);
    assert_eq!(air.step(), 0);

    ground_chip.set_stall_tx(false);
    clock.advance(10);
    assert_eq!(ground.transmit(&[3, 4]), TxResult::Ok);
    air.step();

    let mut buf = [0u8; 8];
    let packet = air_node.poll_receive(&mut buf).expect("packet after recovery");
    assert_eq!(&buf[..packet.len], &[3, 4]);
}

#[test]
fn test_lossy_air_is_deterministic() {
    fn run(seed: u64) -> u64 {
        let clock = ManualClock::new(0);
        let (mut sender, sender_chip) = node(&clock);
        let (_receiver, receiver_chip) = node(&clock);
        let mut air = SimAir::new(seed).with_loss(0.5);
        air.attach(sender_chip);
        air.attach(receiver_chip);
        for i in 0..50u8 {
            clock.advance(10);
            sender.transmit(&[i]);
            air.step();
        }
        air.stats().lost
    }

    assert_eq!(run(9), run(9));
    let lost = run(9);
    assert!(lost > 5 && lost < 45, "lost {lost}");
}
