//! Radio link.
//!
//! Register-level driver for an SX1231-family FSK transceiver. The chip is
//! reached through the [`RadioBus`] trait (SPI register access plus the two
//! interrupt lines), so the driver carries no wiring of its own.
//!
//! Packets are variable length `len | dst | payload`, Manchester DC-free
//! with hardware CRC, a two-byte sync word carrying the mesh id and the
//! hardware address filter matching the node id or the broadcast address
//! `0xFF`. Transmission goes through the chip's auto mode so the time spent
//! in TX is minimal; a watchdog synthesizes a FIFO-drain condition should
//! the auto mode ever get stuck. Reception keeps a 30-second watchdog that
//! clears the AFC, which otherwise can run away on a silent channel and
//! de-tune the receiver for good.

pub mod regs;

use regs::*;

use crate::clock::Deadline;
use crate::config::RadioConfig;

/// Maximum payload per packet (dst byte not counted).
pub const MAXPACK: usize = 60;

/// Crystal reference in Hertz.
pub const RF_XTAL: u32 = 32_000_000;

/// TX auto-mode watchdog, in milliseconds.
pub const RF_TX_TIMEOUT: u32 = 1000;

/// AFC runaway watchdog, in milliseconds.
pub const RF_AFC_TIMEOUT: u32 = 30_000;

/// Register-level access to the transceiver.
pub trait RadioBus {
    /// Write one configuration register.
    fn write(&mut self, reg: u8, value: u8);

    /// Read one configuration register.
    fn read(&mut self, reg: u8) -> u8;

    /// Burst-write the FIFO.
    fn write_fifo(&mut self, data: &[u8]);

    /// Burst-read the FIFO.
    fn read_fifo(&mut self, data: &mut [u8]);

    /// Level of the payload-ready interrupt line.
    fn dio0(&self) -> bool;

    /// Sticky wake event latched from the payload-ready edge.
    fn wake_event(&self) -> bool;

    /// Arm the wake event latch and clear any pending edge.
    fn arm_wake(&mut self);

    /// Disarm and clear the wake event latch.
    fn disarm_wake(&mut self);
}

/// The radio driver.
pub struct Rfio<B: RadioBus> {
    bus: B,
    rssi: u8,
    node: u8,
    watchdog: Deadline,
}

impl<B: RadioBus> Rfio<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            rssi: 0,
            node: 0,
            watchdog: Deadline::after(0, RF_AFC_TIMEOUT),
        }
    }

    /// Change the operating mode, aborting listen mode on the way.
    fn chmode(&mut self, mode: u8) {
        let mut request = mode | OP_MODE_LISTEN_ABORT;
        loop {
            self.bus.write(REG_OP_MODE, request);
            request &= !OP_MODE_LISTEN_ABORT;

            while self.bus.read(REG_IRQ_FLAGS1) & IRQ1_MODE_READY == 0 {}

            if self.bus.read(REG_OP_MODE) & OP_MODE_MODE == mode & OP_MODE_MODE {
                break;
            }
        }
    }

    fn flush_fifo(&mut self) {
        // Writing the overrun flag clears the FIFO.
        self.bus.write(REG_IRQ_FLAGS2, IRQ2_FIFO_OVERRUN);
    }

    fn afc_reset(&mut self) {
        let fei = self.bus.read(REG_AFC_FEI);
        self.bus.write(REG_AFC_FEI, fei | AFC_FEI_AFC_CLEAR);
        let cfg2 = self.bus.read(REG_PACKET_CONFIG2);
        self.bus.write(REG_PACKET_CONFIG2, cfg2 | PACKET_CONFIG2_RESTART_RX);
    }

    /// Run the RC oscillator calibration.
    pub fn calibrate(&mut self) {
        self.chmode(OP_MODE_STDBY);
        self.bus.write(REG_OSC1, OSC1_RC_CAL_START);
        while self.bus.read(REG_OSC1) & OSC1_RC_CAL_DONE != OSC1_RC_CAL_DONE {}
    }

    /// Tune the carrier frequency in Hertz.
    ///
    /// `Frf = f / Fxtal * 2^19`; the synthesizer latches the value upon the
    /// LSB write. The frequency must not be changed while transmitting.
    pub fn frequency(&mut self, f: u32) {
        let mode = self.bus.read(REG_OP_MODE);
        if mode & OP_MODE_MODE == OP_MODE_TX {
            self.chmode(OP_MODE_RX);
        }

        let f = f.clamp(290_000_000, 1_020_000_000);
        let reg = ((f as u64) << 19) / RF_XTAL as u64;
        self.bus.write(REG_FRF_MSB, (reg >> 16) as u8);
        self.bus.write(REG_FRF_MID, (reg >> 8) as u8);
        self.bus.write(REG_FRF_LSB, reg as u8);

        if mode & OP_MODE_MODE == OP_MODE_RX {
            self.chmode(OP_MODE_FS);
        }
        self.chmode(OP_MODE_STDBY);
    }

    /// Mantissa/exponent encoding of a receiver bandwidth.
    ///
    /// `B = Fxtal / (RxBwMant * 2^(RxBwExp + 2))`; the bandwidth must stay
    /// above half the bit rate.
    fn bwflags(bandwidth: u32) -> u8 {
        let bandwidth = bandwidth.clamp(2600, 500_000);
        let mut div = (RF_XTAL / 4 / bandwidth) as u16;

        let mut exp: u8 = 0;
        while div >= 16 {
            exp += 1;
            div >>= 1;
        }
        exp -= 1;
        div <<= 1;

        let mant = ((div as u8) & !0x08) << 1;
        (mant & RX_BW_MANT) | (exp & RX_BW_EXP)
    }

    /// Receiver bandwidth, DC canceller at 4 % of it.
    pub fn rxbw(&mut self, bandwidth: u32) {
        self.bus.write(REG_RX_BW, RX_BW_DCC_FREQ_4 | Self::bwflags(bandwidth));
    }

    /// AFC bandwidth, DC canceller at 4 % of it.
    pub fn afcbw(&mut self, bandwidth: u32) {
        self.bus.write(REG_AFC_BW, RX_BW_DCC_FREQ_4 | Self::bwflags(bandwidth));
    }

    /// FSK frequency deviation in Hertz, in multiples of the PLL step.
    pub fn fdev(&mut self, deviation: u32) {
        let reg = ((deviation as u64) << 19) / RF_XTAL as u64;
        self.bus.write(REG_FDEV_MSB, (reg >> 8) as u8);
        self.bus.write(REG_FDEV_LSB, reg as u8);
    }

    /// Bit rate, derived directly from the crystal. Must stay below twice
    /// the receiver bandwidth.
    pub fn bitrate(&mut self, rate: u32) {
        let reg = (RF_XTAL / rate.max(1)) as u16;
        self.bus.write(REG_BITRATE_MSB, (reg >> 8) as u8);
        self.bus.write(REG_BITRATE_LSB, reg as u8);
    }

    /// Transmit power in dBm on PA0, clamped to -18..=13.
    pub fn power(&mut self, power: i8) {
        let power = power.min(13);
        if power >= -18 {
            self.bus.write(
                REG_PA_LEVEL,
                PA_LEVEL_PA0_ON | ((power + 18) as u8 & PA_LEVEL_OUTPUT_POWER),
            );
        } else {
            // Shutdown
            self.bus.write(REG_PA_LEVEL, 0);
        }
    }

    /// RSSI qualification threshold in dBm.
    pub fn sensitivity(&mut self, sens: i16) {
        let sens = sens.clamp(-127, 0);
        self.bus.write(REG_RSSI_THRESH, (-2 * sens) as u8);
    }

    /// Signal strength of the last received packet in dBm.
    pub fn rssi(&self) -> i16 {
        -(self.rssi as i16) / 2
    }

    /// Frequency error indicator in Hertz.
    pub fn fei(&mut self) -> i32 {
        let fei =
            ((self.bus.read(REG_FEI_MSB) as u16) << 8) | self.bus.read(REG_FEI_LSB) as u16;
        fei as i16 as i32 * 61
    }

    /// Program the mesh id into the sync word.
    pub fn mesh_id(&mut self, id: u16) {
        self.bus.write(reg_sync_value(0), (id >> 8) as u8);
        self.bus.write(reg_sync_value(1), id as u8);
    }

    /// Program the node address filter.
    pub fn node_id(&mut self, id: u8) {
        self.node = id;
        self.bus.write(REG_NODE_ADRS, id);
    }

    /// Configured node id.
    pub fn node(&self) -> u8 {
        self.node
    }

    /// Bypass or restore the hardware address filter.
    pub fn promiscuous(&mut self, on: bool) {
        let mut reg = PACKET_CONFIG1_FORMAT_VARIABLE
            | PACKET_CONFIG1_DC_FREE_MANCHESTER
            | PACKET_CONFIG1_CRC_ON;

        if on {
            reg |= PACKET_CONFIG1_FILTER_NONE;
        } else {
            reg |= PACKET_CONFIG1_FILTER_NODE_BC;
        }

        self.bus.write(REG_PACKET_CONFIG1, reg);
    }

    /// Enter listen mode with the given idle and RX windows in
    /// milliseconds.
    ///
    /// Each window is encoded as a coefficient times one of the chip's
    /// resolutions (64 us, 4.1 ms, 262 ms). Qualification criteria is the
    /// sync word; after a qualified packet the chip resumes idling on its
    /// own, and the payload-ready edge is latched as the wake event.
    pub fn listen(&mut self, idle: u16, rx: u16) {
        self.chmode(OP_MODE_STDBY);
        if idle == 0 || rx == 0 {
            return;
        }

        let mut listen1 = LISTEN1_CRITERIA_SYNC | LISTEN1_END_RESUME;

        let idle_coef;
        if idle <= 16 {
            listen1 |= LISTEN1_RESOL_IDLE_64US;
            idle_coef = (idle * 16) as u8;
        } else if idle < 1050 {
            listen1 |= LISTEN1_RESOL_IDLE_4MS;
            idle_coef = (idle / 4) as u8;
        } else {
            listen1 |= LISTEN1_RESOL_IDLE_262MS;
            idle_coef = (idle / 262) as u8;
        }

        let rx_coef;
        if rx <= 16 {
            listen1 |= LISTEN1_RESOL_RX_64US;
            rx_coef = (rx * 16) as u8;
        } else if rx < 1050 {
            listen1 |= LISTEN1_RESOL_RX_4MS;
            rx_coef = (rx / 4) as u8;
        } else {
            listen1 |= LISTEN1_RESOL_RX_262MS;
            rx_coef = (rx / 262) as u8;
        }

        self.bus.write(REG_LISTEN1, listen1);
        self.bus.write(REG_LISTEN2, idle_coef);
        self.bus.write(REG_LISTEN3, rx_coef);

        self.bus.arm_wake();

        // Set ListenOn manually; listen mode changes modes on its own,
        // which would fight the polling loop in chmode().
        self.afc_reset();
        self.bus.write(REG_OP_MODE, OP_MODE_STDBY | OP_MODE_LISTEN_ON);
    }

    /// Whether the latched wake event fired. The payload-ready flag itself
    /// vanishes when listen mode resumes, hence the latch.
    pub fn trip(&self) -> bool {
        self.bus.wake_event()
    }

    /// Recover from a deadlock in auto mode.
    ///
    /// While the auto-mode flag is set the intermediate mode cannot be left
    /// by writing the mode register; synthesize the exit condition instead.
    fn recover_auto_mode(&mut self) {
        let mut scratch = [0u8; FIFO_SIZE];
        self.bus.write(
            REG_AUTO_MODES,
            AUTO_MODES_ENTER_FIFO_NOT_EMPTY
                | AUTO_MODES_EXIT_FIFO_EMPTY
                | AUTO_MODES_INTERMEDIATE_STDBY,
        );
        self.bus.write(REG_FIFO, 0xFF);
        self.bus.read_fifo(&mut scratch);
        self.bus.write(REG_AUTO_MODES, 0);
    }

    /// Queue one packet for transmission.
    ///
    /// The auto mode enters TX once the whole packet is in the FIFO and
    /// drops back to standby after the packet went out, keeping TX time
    /// minimal. Completion is polled with [`Self::sent`].
    pub fn sendto(&mut self, to: u8, msg: &[u8], now: u32) {
        // Disable the receiver so nothing overwrites the FIFO
        self.chmode(OP_MODE_STDBY);
        self.flush_fifo();

        let length = msg.len().min(MAXPACK);
        self.bus.write(
            REG_FIFO_THRESH,
            FIFO_THRESH_TX_START_LEVEL | fifo_thresh_level(length as u8 + 1),
        );

        self.bus.write(
            REG_AUTO_MODES,
            AUTO_MODES_INTERMEDIATE_TX
                | AUTO_MODES_ENTER_FIFO_LEVEL
                | AUTO_MODES_EXIT_PACKET_SENT,
        );

        self.bus.write(REG_FIFO, length as u8 + 2);
        self.bus.write(REG_FIFO, to);
        self.bus.write_fifo(&msg[..length]);
        self.watchdog = Deadline::after(now, RF_TX_TIMEOUT);
    }

    /// Whether the queued packet has left the chip. Transitions back to RX
    /// on completion; the TX watchdog forces completion should the auto
    /// mode be stuck.
    pub fn sent(&mut self, now: u32) -> bool {
        if self.bus.read(REG_IRQ_FLAGS1) & IRQ1_AUTO_MODE != 0
            || self.bus.read(REG_IRQ_FLAGS2) & IRQ2_FIFO_NOT_EMPTY != 0
        {
            if !self.watchdog.expired(now) {
                return false;
            }

            log::warn!("radio: tx watchdog, recovering auto mode");
            self.recover_auto_mode();
        }

        self.bus.write(REG_AUTO_MODES, 0);
        self.chmode(OP_MODE_RX);
        self.watchdog = Deadline::after(now, RF_AFC_TIMEOUT);
        true
    }

    /// Whether a packet is waiting in the FIFO. Expiry of the AFC watchdog
    /// resets the frequency correction to recover from runaway.
    pub fn received(&mut self, now: u32) -> bool {
        if self.bus.dio0() {
            if self.bus.read(REG_IRQ_FLAGS2) & IRQ2_PAYLOAD_READY != 0 {
                self.chmode(OP_MODE_STDBY);
                self.watchdog = Deadline::after(now, RF_AFC_TIMEOUT);
                return true;
            }
        } else if self.watchdog.expired(now) {
            log::debug!("radio: afc watchdog, clearing correction");
            self.afc_reset();
            self.watchdog = Deadline::after(now, RF_AFC_TIMEOUT);
        }

        false
    }

    /// Read the pending packet.
    ///
    /// Returns the addressee byte and the payload length; the payload is
    /// clipped to `msg`. The RSSI is latched first because the register
    /// resets with the next RSSI phase.
    pub fn receive(&mut self, msg: &mut [u8], now: u32) -> (u8, usize) {
        self.rssi = self.bus.read(REG_RSSI_VALUE);

        let n = self.bus.read(REG_FIFO);
        let rcpt = self.bus.read(REG_FIFO);

        let length = if n < 2 {
            // Should not happen - malformed packet
            0
        } else {
            let n = (n - 2) as usize;
            let length = n.min(msg.len());
            self.bus.read_fifo(&mut msg[..length]);
            length
        };

        self.watchdog = Deadline::after(now, RF_AFC_TIMEOUT);
        self.chmode(OP_MODE_RX);
        (rcpt, length)
    }

    /// Enable or disable reception, arming or clearing the wake latch.
    pub fn enable(&mut self, on: bool, now: u32) {
        if on {
            self.chmode(OP_MODE_RX);
            self.watchdog = Deadline::after(now, RF_AFC_TIMEOUT);
            self.bus.arm_wake();
        } else {
            self.chmode(OP_MODE_STDBY);
            self.bus.disarm_wake();
        }
    }

    /// Leave auto and listen modes and force the clock output on, which
    /// the host MCU may run from.
    fn clkout(&mut self) {
        self.recover_auto_mode();

        // Possibly end listen mode
        self.bus
            .write(REG_OP_MODE, OP_MODE_STDBY | OP_MODE_LISTEN_ABORT);
        self.chmode(OP_MODE_STDBY);

        // Outside of sleep mode CLKOUT is always driven.
        loop {
            self.bus.write(REG_DIO_MAPPING2, DIO_MAPPING2_CLK_OUT_4);
            if self.bus.read(REG_DIO_MAPPING2) & DIO_MAPPING2_CLK_OUT == DIO_MAPPING2_CLK_OUT_4
            {
                break;
            }
        }
    }

    /// Program the static defaults: packet engine, modulation, LNA, AFC
    /// and listen-mode setup.
    fn init(&mut self) {
        const DEFAULTS: &[(u8, u8)] = &[
            (REG_OP_MODE, OP_MODE_STDBY),
            (REG_AUTO_MODES, 0),
            (REG_DATA_MODUL, DATA_MODUL_PACKET_FSK),
            // Current limit at 45mA + 5mA * trim = 95mA
            (REG_OCP, OCP_ON | ((95 - 45) / 5)),
            (REG_PA_RAMP, PA_RAMP_40US),
            (REG_LOW_BAT, 0),
            // Assume a modulation index above 2
            (REG_AFC_CTRL, 0),
            (REG_AFC_FEI, AFC_FEI_AFC_AUTO_ON | AFC_FEI_AFC_AUTOCLEAR_ON),
            (REG_TEST_DAGC, TEST_DAGC_CONTINUOUS_HI_BETA),
            (REG_LNA, LNA_GAIN_AGC),
            (REG_TEST_LNA, TEST_LNA_SENSITIVITY_NORMAL),
            (REG_PREAMBLE_MSB, 0),
            (REG_PREAMBLE_LSB, 10),
            (REG_SYNC_CONFIG, SYNC_CONFIG_ON | sync_config_size(2)),
            (reg_sync_value(0), 0xAA),
            (reg_sync_value(1), 0xAA),
            (
                REG_PACKET_CONFIG1,
                PACKET_CONFIG1_FORMAT_VARIABLE
                    | PACKET_CONFIG1_DC_FREE_MANCHESTER
                    | PACKET_CONFIG1_CRC_ON
                    | PACKET_CONFIG1_FILTER_NODE_BC,
            ),
            (
                REG_PACKET_CONFIG2,
                packet_config2_rx_delay(4) | PACKET_CONFIG2_AUTO_RX_RESTART_ON,
            ),
            (REG_NODE_ADRS, 0),
            (REG_BROADCAST_ADRS, 0xFF),
            (REG_PAYLOAD_LENGTH, MAXPACK as u8 + 2),
            (
                REG_FIFO_THRESH,
                FIFO_THRESH_TX_START_LEVEL | fifo_thresh_level(MAXPACK as u8 + 1),
            ),
            (REG_RX_TIMEOUT1, 0),
            (REG_RX_TIMEOUT2, MAXPACK as u8 * 2 + 5),
            // Listen mode defaults
            (
                REG_LISTEN1,
                LISTEN1_RESOL_IDLE_64US
                    | LISTEN1_RESOL_RX_64US
                    | LISTEN1_CRITERIA_SYNC
                    | LISTEN1_END_RESUME,
            ),
            (REG_LISTEN2, 1),
            (REG_LISTEN3, 1),
            // PayloadReady on DIO0
            (REG_DIO_MAPPING1, DIO_MAPPING1_DIO0_0),
        ];

        for &(reg, value) in DEFAULTS {
            self.bus.write(reg, value);
        }
    }

    /// Apply the tunable link parameters.
    ///
    /// The usual constraints apply: modulation index `2 * Fdev / Bitrate`
    /// between 0.5 and 10, and both bandwidths above `Fdev + Bitrate / 2`.
    pub fn configure(&mut self, cfg: &RadioConfig) {
        self.frequency(cfg.frequency);
        self.bitrate(cfg.bitrate);
        self.afcbw(cfg.afcbw);
        self.rxbw(cfg.rxbw);
        self.fdev(cfg.fdev);
        self.power(cfg.power);
        self.sensitivity(cfg.sensitivity);

        self.mesh_id(cfg.mesh);
        self.node_id(cfg.node);
    }

    /// Bring the chip from an unknown state into the configured one.
    pub fn prepare(&mut self, cfg: &RadioConfig) {
        self.clkout();
        self.init();
        self.configure(cfg);
    }
}
