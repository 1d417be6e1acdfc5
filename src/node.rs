//! Node assembly and main loop.
//!
//! [`Node`] owns every subsystem; the process-wide singletons of the design
//! (working buffer, configuration, pixel frame) become owned fields whose
//! access is serialized by the cooperative loop. One [`Node::poll`] runs
//! the UI debounce, kicks the analog sampler, drives the frame generator
//! and gives the selected mode task one tick.
//!
//! Boot mirrors the card-first policy: a parsable configuration selects the
//! mode; without a card (or with a rejected configuration) the hex switch
//! does, with built-in default maps for the direct TPM2 and DMX inputs.

use crate::buffer::{WorkBuffer, MAXBUFF, MAXDMX};
use crate::clock::Clock;
use crate::config::parser::log_diagnostic;
use crate::config::{Config, ConfigStream, RunMode, CONFIG_FILE};
use crate::dmx::{DmxReceiver, DMX_BAUD};
use crate::pixel::{LedMap, MapChannel, PixelEngine, WaveformSink, MAXLEDS};
use crate::radio::{RadioBus, Rfio};
use crate::scene::{SceneEngine, SceneIo};
use crate::serial::{LineStatus, SerialPort};
use crate::server::{Server, ServerInfo, SERVER_BAUD};
use crate::storage::Volume;
use crate::tpm2::Tpm2Decoder;
use crate::ui::{Controls, Ui};
use crate::Rgb;

/// Analog sampling and supply monitoring, an opaque sensor interface.
pub trait Sensors {
    /// Battery voltage in millivolts.
    fn vbat(&mut self) -> u16;

    /// LED rail voltage in millivolts.
    fn vled(&mut self) -> u16;

    /// Die temperature in degrees Celsius.
    fn temperature(&mut self) -> i16;

    /// Start the next conversion round.
    fn kick(&mut self);
}

/// Chip-level services: identity, versions and clock gymnastics for the
/// listen-mode sleep.
pub trait SystemCtl {
    /// The MCU's unique serial.
    fn serial(&self) -> [u8; 12];

    fn hardware_version(&self) -> u16;

    fn software_version(&self) -> u16;

    /// Drop to the internal oscillator so the radio clock may stop.
    fn slow_clock(&mut self);

    /// Restore the full-speed clock.
    fn fast_clock(&mut self);

    /// Halt the core until a wake event fires.
    fn stop_until_event(&mut self);
}

/// The hardware seams a node is built from.
pub trait Platform {
    type Clock: Clock;
    type Radio: RadioBus;
    type Sink: WaveformSink;
    type Serial: SerialPort;
    type Volume: Volume;
    type Controls: Controls;
    type Sensors: Sensors;
    type System: SystemCtl;
}

/// The platform pieces handed to [`Node::new`].
pub struct Parts<P: Platform> {
    pub clock: P::Clock,
    pub radio: P::Radio,
    pub sink: P::Sink,
    pub serial: P::Serial,
    pub volume: P::Volume,
    pub controls: P::Controls,
    pub sensors: P::Sensors,
    pub system: P::System,
}

type VFile<P> = <<P as Platform>::Volume as Volume>::File;

/// Jenkins one-at-a-time hash; condenses the MCU serial into the 32-bit
/// device identifier reported by FINGER.
pub fn jenkins(data: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in data {
        hash = hash.wrapping_add(byte as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }

    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// One assembled node.
pub struct Node<P: Platform> {
    pub(crate) clock: P::Clock,
    pub(crate) rf: Rfio<P::Radio>,
    pub(crate) pixel: PixelEngine<P::Sink>,
    pub(crate) tty: P::Serial,
    pub(crate) volume: P::Volume,
    pub(crate) sensors: P::Sensors,
    pub(crate) system: P::System,
    pub(crate) ui: Ui<P::Controls>,
    pub(crate) config: Config,
    pub(crate) stream: Option<ConfigStream<VFile<P>>>,
    pub(crate) buffer: WorkBuffer,
    pub(crate) tpm2: Tpm2Decoder,
    pub(crate) dmx: DmxReceiver,
    pub(crate) scene: SceneEngine<VFile<P>>,
    pub(crate) server: Server,
    pub(crate) mode: RunMode,
    pub(crate) counter: u8,
    scene_select: u8,
}

impl<P: Platform> Node<P> {
    pub fn new(parts: Parts<P>) -> Self {
        let now = parts.clock.now();
        Self {
            rf: Rfio::new(parts.radio),
            pixel: PixelEngine::new(parts.sink),
            tty: parts.serial,
            volume: parts.volume,
            sensors: parts.sensors,
            system: parts.system,
            ui: Ui::new(parts.controls, now),
            config: Config::default(),
            stream: None,
            buffer: WorkBuffer::new(),
            tpm2: Tpm2Decoder::new(now),
            dmx: DmxReceiver::new(now),
            scene: SceneEngine::new(),
            server: Server::new(),
            mode: RunMode::Standalone,
            counter: 0,
            scene_select: 0xFF,
            clock: parts.clock,
        }
    }

    /// Read, apply and arm everything; decides the run mode.
    pub fn boot(&mut self) {
        self.rf.prepare(&self.config.rf);

        // Wait for a stable mode switch reading
        while !self.ui.debounce(self.clock.now()) {
            self.clock.idle();
        }

        // Card configuration; a rejected file leaves the defaults and a
        // diagnostic behind and falls back to the switch-selected mode.
        if let Some(src) = self.volume.open(CONFIG_FILE) {
            let mut stream = ConfigStream::new(src);
            let mut config = Config::default();
            match stream.parse(&mut config) {
                Ok(()) => {
                    self.config = config;
                    self.stream = Some(stream);
                }
                Err(error) => {
                    log::warn!(
                        "config rejected at line {}: {}",
                        error.line,
                        error.cause
                    );
                    log_diagnostic(&mut self.volume, CONFIG_FILE, &error);
                }
            }
        }

        let now = self.clock.now();
        self.rf.configure(&self.config.rf);
        self.pixel.configure(
            self.config.leds.length,
            self.config.leds.framerate,
            self.config.leds.dim,
            now,
        );

        // Clear prevalent data in the strings
        self.pixel.enable(true, now);
        self.clock.delay(500);
        for _ in 0..3 {
            self.pixel.universe();
            while self.pixel.busy() {
                self.clock.idle();
            }
        }
        self.pixel.enable(false, self.clock.now());

        let mode = match self.config.mode.mode {
            Some(mode) => mode,
            None => self.switch_mode(),
        };

        let now = self.clock.now();
        match mode {
            RunMode::Standalone | RunMode::Scene => {
                self.pixel.enable(true, now);
            }

            RunMode::Tpm2 => {
                self.tpm2.reset(now);
                self.pixel.enable(true, now);
            }

            RunMode::Dmx => {
                self.dmx.reset(now);
                self.tty.set_baud(DMX_BAUD);
                self.pixel.enable(true, now);
            }

            RunMode::Tx => {
                self.rf.node_id(0);
                self.rf.enable(true, now);
                self.rf.promiscuous(true);
                self.tty.set_baud(SERVER_BAUD);
            }

            RunMode::Rx => {
                self.rf.enable(true, now);
            }

            RunMode::Beacon => {
                self.pixel.enable(true, now);
                self.rf.node_id(0);
                self.rf.enable(true, now);
            }
        }

        self.mode = mode;
        log::debug!("booted into {:?}", mode);
    }

    /// Cardless mode selection from the hex switch.
    fn switch_mode(&mut self) -> RunMode {
        let now = self.clock.now();
        match self.ui.hex() {
            '9' => {
                // Direct TPM2: consecutive buffer triplets onto string 1.
                self.config.leds.maps.clear();
                let _ = self.config.leds.maps.push(LedMap {
                    string: 0,
                    begin: 0,
                    end: (MAXBUFF / 3 - 1) as u16,
                    step: 1,
                    red: MapChannel::sweep(0, MAXBUFF as u16, 3),
                    green: MapChannel::sweep(1, MAXBUFF as u16, 3),
                    blue: MapChannel::sweep(2, MAXBUFF as u16, 3),
                    cmy: false,
                });

                self.pixel.framerate(0, now);
                self.pixel.set_dim(Rgb::new(0xFF, 0xFF, 0xFF));
                self.pixel.set_length(MAXLEDS as u16);
                RunMode::Tpm2
            }

            'D' => {
                self.config.leds.maps.clear();
                for map in dmx_default_maps() {
                    let _ = self.config.leds.maps.push(map);
                }

                self.pixel.framerate(0, now);
                self.pixel.set_dim(Rgb::new(0xFF, 0xFF, 0xFF));
                self.pixel.set_length(MAXLEDS as u16);
                RunMode::Dmx
            }

            '6' => RunMode::Rx,
            '7' => RunMode::Tx,

            _ => {
                self.pixel.framerate(20, now);
                self.pixel.set_dim(Rgb::new(0xFF, 0xFF, 0xFF));
                self.pixel.set_length(MAXLEDS as u16);
                RunMode::Standalone
            }
        }
    }

    /// One iteration of the cooperative main loop.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        self.ui.debounce(now);
        self.sensors.kick();
        self.pixel.poll(now);

        match self.mode {
            RunMode::Standalone => self.standalone_task(),
            RunMode::Scene => self.scene_task(),
            RunMode::Tpm2 => self.tpm2_task(),
            RunMode::Dmx => self.dmx_task(),
            RunMode::Tx => self.tx_task(),
            RunMode::Rx => self.rx_task(),
            RunMode::Beacon => self.beacon_task(),
        }
    }

    /// Run the node forever.
    pub fn run(&mut self) -> ! {
        self.boot();
        loop {
            self.poll();
        }
    }

    /// Serial receive hook; routes to whatever the mode listens with.
    pub fn on_serial(&mut self, status: LineStatus, byte: u8) {
        let now = self.clock.now();
        match self.mode {
            RunMode::Tpm2 => self.tpm2.feed(&mut self.buffer, status, byte, now),
            RunMode::Dmx => self.dmx.feed(&mut self.buffer, status, byte),
            RunMode::Tx => self.server.feed(status, byte),
            _ => {}
        }
    }

    /// Test patterns and DMX-free standalone display.
    ///
    /// Hex positions: 0 dark, 1 rainbows, 2/3/4 faint red/green/blue,
    /// 5 full white.
    fn standalone_task(&mut self) {
        if !self.pixel.capture() {
            return;
        }

        match self.ui.hex() {
            '1' => {
                // Color rainbows, one flavor per string
                for i in 0..MAXLEDS as u16 {
                    let pos = self.counter.wrapping_add(i as u8);
                    let (r, g, b) = if pos < 85 {
                        (255 - pos * 3, 0, pos * 3)
                    } else if pos < 170 {
                        let pos = pos - 85;
                        (0, pos * 3, 255 - pos * 3)
                    } else {
                        let pos = pos - 170;
                        (pos * 3, 255 - pos * 3, 0)
                    };

                    self.pixel.rgb(i, 0, Rgb::new(r, g, b));
                    self.pixel.rgb(i, 1, Rgb::new(r, 0, 0));
                    self.pixel.rgb(i, 2, Rgb::new(0, g, 0));
                    self.pixel.rgb(i, 3, Rgb::new(0, 0, b));
                    self.pixel.rgb(i, 4, Rgb::new(r, r, r));
                    self.pixel
                        .rgb(MAXLEDS as u16 - 1 - i, 5, Rgb::new(r, g, b));
                }
            }

            '2' => self.unicolor(Rgb::new(10, 0, 0)),
            '3' => self.unicolor(Rgb::new(0, 10, 0)),
            '4' => self.unicolor(Rgb::new(0, 0, 10)),
            '5' => self.unicolor(Rgb::new(255, 255, 255)),

            _ => self.pixel.clear(),
        }

        self.pixel.release();
        self.counter = self.counter.wrapping_add(1);
        let blink = self.counter & 1 != 0;
        self.ui.led(blink);
    }

    fn unicolor(&mut self, color: Rgb) {
        for i in 0..MAXLEDS as u16 {
            for string in 0..6 {
                self.pixel.rgb(i, string, color);
            }
        }
    }

    /// Direct TPM2 input; repaints the default map while undetected.
    fn tpm2_task(&mut self) {
        let now = self.clock.now();
        if self.tpm2.detect(&mut self.tty, now) {
            if self.tpm2.trip() && self.pixel.capture() {
                self.pixel
                    .maps(&self.config.leds.maps, self.buffer.as_slice());
                self.pixel.release();
                self.tpm2.clear();

                self.counter = self.counter.wrapping_add(1);
                let blink = self.counter & 1 != 0;
                self.ui.led(blink);
            }
        } else if self.pixel.capture() {
            self.apply_default_block();
            self.pixel.release();
            self.ui.led(false);
        }
    }

    /// Direct DMX input; repaints the default map while undetected.
    fn dmx_task(&mut self) {
        let now = self.clock.now();
        if self.dmx.detect(now) {
            if self.dmx.trip() && self.pixel.capture() {
                self.pixel
                    .maps(&self.config.leds.maps, self.buffer.as_slice());
                self.pixel.release();
                self.dmx.clear();

                self.counter = self.counter.wrapping_add(1);
                let blink = self.counter & 1 != 0;
                self.ui.led(blink);
            }
        } else if self.pixel.capture() {
            self.apply_default_block();
            self.pixel.release();
            self.ui.led(false);
        }
    }

    /// Scene playback selected by the hex switch.
    fn scene_task(&mut self) {
        let hex = self.ui.digit();
        if self.scene_select != hex {
            self.scene_select = hex;
            self.scene_start(hex as u16);
        }

        if self.scene_play() {
            self.counter = self.counter.wrapping_add(1);
            let blink = self.counter & 4 != 0;
            self.ui.led(blink);
        } else if self.pixel.capture() {
            self.apply_default_block();
            self.pixel.release();
            self.ui.led(false);
        }
    }

    /// Coordinator-facing textual server.
    fn tx_task(&mut self) {
        if self.serve() {
            self.counter = self.counter.wrapping_add(1);
            let blink = self.counter & 1 != 0;
            self.ui.led(blink);
        }
    }

    /// Worker side packet dispatch.
    fn rx_task(&mut self) {
        if self.handle_packet() {
            self.counter = self.counter.wrapping_add(1);
            let blink = self.counter & 1 != 0;
            self.ui.led(blink);
        }
    }

    /// Identification beacon for range tests.
    fn beacon_task(&mut self) {
        let now = self.clock.now();
        if !self.pixel.capture() {
            return;
        }

        let beacon = [0xBA, 0xDA, 0x55, self.counter];
        self.rf.sendto(0, &beacon, now);
        while !self.rf.sent(self.clock.now()) {
            self.clock.idle();
        }

        self.counter = self.counter.wrapping_add(1);
        let on = self.counter & 1 != 0;
        self.ui.led(on);
        let red = if on { 16 } else { 0 };
        for i in 0..MAXLEDS as u16 {
            for string in 0..6 {
                self.pixel.rgb(i, string, Rgb::new(red, 0, 0));
            }
        }

        self.pixel.release();
    }

    /// Paint the configured default map block, if any.
    pub(crate) fn apply_default_block(&mut self) {
        let offset = self.config.leds.default_block;
        if offset == 0 {
            return;
        }

        if let Some(stream) = self.stream.as_mut() {
            self.pixel.clear();
            let pixel = &mut self.pixel;
            let buffer = &self.buffer;
            if let Err(error) = stream.map_block(offset, |map| pixel.map(&map, buffer.as_slice()))
            {
                log::warn!(
                    "default map rejected at line {}: {}",
                    error.line,
                    error.cause
                );
            }
        }
    }

    /// Spin until the frame buffer is captured, keeping the frame
    /// generator ticking.
    pub(crate) fn capture_blocking(&mut self) {
        loop {
            let now = self.clock.now();
            self.pixel.poll(now);
            if self.pixel.capture() {
                return;
            }

            self.clock.idle();
        }
    }

    pub(crate) fn scene_start(&mut self, scene: u16) -> bool {
        let now = self.clock.now();
        let mut io = SceneIo {
            stream: self.stream.as_mut(),
            config: &self.config,
            pixel: &mut self.pixel,
            decoder: &mut self.tpm2,
            buffer: &mut self.buffer,
            volume: &mut self.volume,
            now,
        };
        self.scene.start(scene, &mut io)
    }

    pub(crate) fn scene_play(&mut self) -> bool {
        let now = self.clock.now();
        let mut io = SceneIo {
            stream: self.stream.as_mut(),
            config: &self.config,
            pixel: &mut self.pixel,
            decoder: &mut self.tpm2,
            buffer: &mut self.buffer,
            volume: &mut self.volume,
            now,
        };
        self.scene.play(&mut io)
    }

    pub(crate) fn scene_skip(&mut self) {
        let now = self.clock.now();
        let mut io = SceneIo {
            stream: self.stream.as_mut(),
            config: &self.config,
            pixel: &mut self.pixel,
            decoder: &mut self.tpm2,
            buffer: &mut self.buffer,
            volume: &mut self.volume,
            now,
        };
        self.scene.skip(&mut io);
    }

    pub(crate) fn scene_stop(&mut self) {
        let now = self.clock.now();
        let mut io = SceneIo {
            stream: self.stream.as_mut(),
            config: &self.config,
            pixel: &mut self.pixel,
            decoder: &mut self.tpm2,
            buffer: &mut self.buffer,
            volume: &mut self.volume,
            now,
        };
        self.scene.stop(&mut io);
    }

    pub(crate) fn scene_pause(&mut self) {
        self.scene.pause();
    }

    /// Run one server exchange, if a request is pending.
    fn serve(&mut self) -> bool {
        let info = ServerInfo {
            uid: jenkins(&self.system.serial()),
            hardware: self.system.hardware_version(),
            software: self.system.software_version(),
            vbat: self.sensors.vbat(),
            temperature: self.sensors.temperature(),
        };

        let mut commander = crate::handler::Commander {
            rf: &mut self.rf,
            clock: &self.clock,
            listen: self.config.mode.listen,
        };
        self.server.serve(&mut commander, &info, &mut self.tty)
    }

    /// The mode the node booted into.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct access to the pixel engine, for bench diagnostics.
    pub fn pixel(&mut self) -> &mut PixelEngine<P::Sink> {
        &mut self.pixel
    }
}

/// The six factory maps for cardless DMX input: triplets onto string 1,
/// single-channel intensities onto strings 2..5, and the first three slots
/// driving all of string 6.
fn dmx_default_maps() -> [LedMap; 6] {
    let all = MAXDMX as u16;
    [
        LedMap {
            string: 0,
            begin: 0,
            end: (MAXDMX / 3 - 1) as u16,
            step: 1,
            red: MapChannel::sweep(0, all, 3),
            green: MapChannel::sweep(1, all, 3),
            blue: MapChannel::sweep(2, all, 3),
            cmy: false,
        },
        LedMap {
            string: 1,
            begin: 0,
            end: all - 1,
            step: 1,
            red: MapChannel::sweep(0, all, 1),
            green: MapChannel::Fixed(0),
            blue: MapChannel::Fixed(0),
            cmy: false,
        },
        LedMap {
            string: 2,
            begin: 0,
            end: all - 1,
            step: 1,
            red: MapChannel::Fixed(0),
            green: MapChannel::sweep(0, all, 1),
            blue: MapChannel::Fixed(0),
            cmy: false,
        },
        LedMap {
            string: 3,
            begin: 0,
            end: all - 1,
            step: 1,
            red: MapChannel::Fixed(0),
            green: MapChannel::Fixed(0),
            blue: MapChannel::sweep(0, all, 1),
            cmy: false,
        },
        LedMap {
            string: 4,
            begin: 0,
            end: all - 1,
            step: 1,
            red: MapChannel::sweep(0, all, 1),
            green: MapChannel::sweep(0, all, 1),
            blue: MapChannel::sweep(0, all, 1),
            cmy: false,
        },
        LedMap {
            string: 5,
            begin: 0,
            end: all - 1,
            step: 1,
            red: MapChannel::sweep(0, 0, 0),
            green: MapChannel::sweep(1, 1, 0),
            blue: MapChannel::sweep(2, 2, 0),
            cmy: false,
        },
    ]
}
