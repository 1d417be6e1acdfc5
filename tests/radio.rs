mod common;

mod tests {
    use crate::common::{Air, TestClock};
    use strandcast::clock::Clock;
    use strandcast::config::RadioConfig;
    use strandcast::radio::{regs, Rfio, MAXPACK};

    fn pair() -> (Air, Rfio<crate::common::FakeChip>, Rfio<crate::common::FakeChip>) {
        let air = Air::new();
        let mut a = Rfio::new(air.chip());
        let mut b = Rfio::new(air.chip());
        let cfg = RadioConfig::default();
        a.prepare(&cfg);
        b.prepare(&cfg);
        (air, a, b)
    }

    #[test]
    fn unicast_reaches_the_addressed_node_only() {
        let clock = TestClock::manual();
        let (_air, mut a, mut b) = pair();

        a.node_id(1);
        b.node_id(7);
        a.enable(true, clock.now());
        b.enable(true, clock.now());

        // Wrong address: filtered in hardware, never delivered
        a.sendto(9, &[0x55], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }
        assert!(!b.received(clock.now()));

        // Matching address: delivered with payload and sender intact
        a.sendto(7, &[0x42, 0x43], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }
        assert!(b.received(clock.now()));

        let mut msg = [0u8; MAXPACK];
        let (dst, length) = b.receive(&mut msg, clock.now());
        assert_eq!(dst, 7);
        assert_eq!(&msg[..length], &[0x42, 0x43]);
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let clock = TestClock::manual();
        let (_air, mut a, mut b) = pair();

        a.node_id(1);
        b.node_id(7);
        a.enable(true, clock.now());
        b.enable(true, clock.now());

        a.sendto(0xFF, &[0x01], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }

        assert!(b.received(clock.now()));
        let mut msg = [0u8; MAXPACK];
        let (dst, _) = b.receive(&mut msg, clock.now());
        assert_eq!(dst, 0xFF);
    }

    #[test]
    fn promiscuous_mode_bypasses_the_filter() {
        let clock = TestClock::manual();
        let (_air, mut a, mut b) = pair();

        a.node_id(1);
        b.node_id(7);
        b.promiscuous(true);
        a.enable(true, clock.now());
        b.enable(true, clock.now());

        a.sendto(200, &[0x99], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }

        assert!(b.received(clock.now()));
        let mut msg = [0u8; MAXPACK];
        let (dst, length) = b.receive(&mut msg, clock.now());
        assert_eq!((dst, length), (200, 1));
    }

    #[test]
    fn oversized_payloads_are_clipped_to_maxpack() {
        let clock = TestClock::manual();
        let (air, mut a, mut b) = pair();

        a.node_id(1);
        b.node_id(7);
        b.enable(true, clock.now());

        let big = [0xEE; 100];
        a.sendto(7, &big, clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }

        let packets = air.sent_packets();
        assert_eq!(packets.len(), 1);
        // len byte counts payload plus two framing bytes
        assert_eq!(packets[0].1[0] as usize, MAXPACK + 2);

        assert!(b.received(clock.now()));
        let mut msg = [0u8; MAXPACK];
        let (_, length) = b.receive(&mut msg, clock.now());
        assert_eq!(length, MAXPACK);
    }

    #[test]
    fn rssi_is_latched_per_packet() {
        let clock = TestClock::manual();
        let (_air, mut a, mut b) = pair();

        b.node_id(7);
        b.enable(true, clock.now());
        a.sendto(7, &[1], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }

        assert!(b.received(clock.now()));
        let mut msg = [0u8; MAXPACK];
        b.receive(&mut msg, clock.now());
        // The fake chip reports 122 half-dB steps below zero
        assert_eq!(b.rssi(), -61);
    }

    #[test]
    fn listen_mode_latches_the_wake_event() {
        let clock = TestClock::manual();
        let (_air, mut a, mut b) = pair();

        a.node_id(1);
        b.node_id(7);
        a.enable(true, clock.now());

        b.listen(1000, 100);
        assert!(!b.trip());

        a.sendto(7, &[0xCA, 0xFE, 0xBA, 0xBE], clock.now());
        while !a.sent(clock.now()) {
            clock.idle();
        }

        assert!(b.trip());
        let mut msg = [0u8; MAXPACK];
        let (_, length) = b.receive(&mut msg, clock.now());
        assert_eq!(&msg[..length], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn tuning_registers_hold_the_documented_encodings() {
        let air = Air::new();
        let chip = air.chip();
        let probe = chip.clone();
        let mut rf = Rfio::new(chip);
        rf.prepare(&RadioConfig::default());

        // 868 MHz at a 32 MHz crystal is 0xD90000
        rf.frequency(868_000_000);
        assert_eq!(probe.reg(regs::REG_FRF_MSB), 0xD9);
        assert_eq!(probe.reg(regs::REG_FRF_MID), 0x00);
        assert_eq!(probe.reg(regs::REG_FRF_LSB), 0x00);

        // 4.8 kbit/s divides the crystal by 6666
        rf.bitrate(4800);
        assert_eq!(probe.reg(regs::REG_BITRATE_MSB), 0x1A);
        assert_eq!(probe.reg(regs::REG_BITRATE_LSB), 0x0A);

        // 5 kHz deviation in 61 Hz PLL steps
        rf.fdev(5000);
        assert_eq!(probe.reg(regs::REG_FDEV_MSB), 0x00);
        assert_eq!(probe.reg(regs::REG_FDEV_LSB), 81);

        // 10.4 kHz receiver bandwidth: DCC at 4 %, mantissa 16, exponent 5
        rf.rxbw(10_400);
        assert_eq!(probe.reg(regs::REG_RX_BW), 0x45);

        // Threshold register counts half-dB below zero
        rf.sensitivity(-90);
        assert_eq!(probe.reg(regs::REG_RSSI_THRESH), 180);

        // The mesh id becomes the sync word
        rf.mesh_id(0xABCD);
        assert_eq!(probe.reg(regs::reg_sync_value(0)), 0xAB);
        assert_eq!(probe.reg(regs::reg_sync_value(1)), 0xCD);

        // 13 dBm on PA0
        rf.power(13);
        assert_eq!(probe.reg(regs::REG_PA_LEVEL), 0x80 | 31);
    }
}
