//! Packet handler: the acknowledged request/reply layer over the radio.
//!
//! [`Commander`] is the client side used on a coordinator-configured node:
//! each verb serializes a request, transmits it and waits for the reply
//! with a short timeout. Workers answer with their own node id in the dst
//! byte; the coordinator receives promiscuously and matches on it.
//!
//! The worker side lives on [`Node`]: [`Node::handle_packet`] dispatches
//! one incoming packet to the scene, pixel and radio subsystems. Replies
//! are only sent for unicast requests, so a broadcast never provokes a
//! pile-up on the channel. Unknown command codes are dropped silently.
//!
//! Sleep and wake ride on magic payloads rather than command codes: a
//! `0xDEADBEEF` packet puts the node into listen-mode sleep, and waking is
//! a `0xCAFEBABE` burst long enough to cover a whole listen period, each
//! packet carrying the time the burst still has to run so the node can
//! align its single ack to the end of it.

use crate::clock::Clock;
use crate::node::{jenkins, Node, Platform, Sensors, SystemCtl};
use crate::radio::{RadioBus, Rfio, MAXPACK};
use crate::wire::{
    Reader, Writer, BROADCAST, HND_DIM, HND_FINGER, HND_FRAME, HND_PAUSE, HND_PING, HND_SKIP,
    HND_START, HND_STOP, HND_TPM2, SLEEP_MAGIC, WAKE_MAGIC,
};

/// Reply timeout per request, in milliseconds.
pub const HND_TIMEOUT: u32 = 500;

/// Cadence of the wake burst, in milliseconds.
const WAKE_CADENCE: u32 = 42;

/// Margin added to the listen period for a wake burst, in milliseconds.
const WAKE_MARGIN: u32 = 150;

/// Client side of the packet protocol.
pub struct Commander<'a, B: RadioBus, C: Clock> {
    pub rf: &'a mut Rfio<B>,
    pub clock: &'a C,
    /// Listen period of the fleet, for wake bursts.
    pub listen: u32,
}

impl<B: RadioBus, C: Clock> Commander<'_, B, C> {
    /// Wait for the ack of the packet just queued. Returns the reply
    /// payload length, or `None` on timeout.
    fn rcvack(&mut self, id: u8, msg: &mut [u8; MAXPACK]) -> Option<usize> {
        while !self.rf.sent(self.clock.now()) {
            self.clock.idle();
        }

        let deadline = self.clock.deadline(HND_TIMEOUT);
        while !deadline.expired(self.clock.now()) {
            let now = self.clock.now();
            if self.rf.received(now) {
                let (sender, length) = self.rf.receive(msg, now);
                if sender == id {
                    return Some(length);
                }
            }

            self.clock.idle();
        }

        None
    }

    /// Request an empty ack for the packet just queued.
    fn empty_ack(&mut self, id: u8) -> bool {
        let mut msg = [0u8; MAXPACK];
        self.rcvack(id, &mut msg) == Some(0)
    }

    /// Battery, signal and temperature of a node.
    pub fn ping(&mut self, id: u8) -> Option<(u16, i16, i16)> {
        let mut request = Writer::new();
        request.u8(HND_PING);
        self.rf.sendto(id, request.as_slice(), self.clock.now());

        let mut msg = [0u8; MAXPACK];
        let length = self.rcvack(id, &mut msg)?;
        let mut reply = Reader::new(&msg[..length]);
        let vbat = reply.u16()?;
        let rssi = reply.i16()?;
        let temp = reply.i16()?;
        reply.finish().then_some((vbat, rssi, temp))
    }

    /// Start a scene on a node.
    pub fn start(&mut self, id: u8, scene: u16) -> bool {
        let mut request = Writer::new();
        request.u8(HND_START).u16(scene);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Pause the scene on a node.
    pub fn pause(&mut self, id: u8) -> bool {
        let mut request = Writer::new();
        request.u8(HND_PAUSE);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// End the current scene command on a node.
    pub fn skip(&mut self, id: u8) -> bool {
        let mut request = Writer::new();
        request.u8(HND_SKIP);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Stop the scene on a node.
    pub fn stop(&mut self, id: u8) -> bool {
        let mut request = Writer::new();
        request.u8(HND_STOP);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Force a one-shot frame emission on a node.
    pub fn frame(&mut self, id: u8) -> bool {
        let mut request = Writer::new();
        request.u8(HND_FRAME);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Device identification of a node.
    pub fn finger(&mut self, id: u8) -> Option<(u32, u16, u16)> {
        let mut request = Writer::new();
        request.u8(HND_FINGER);
        self.rf.sendto(id, request.as_slice(), self.clock.now());

        let mut msg = [0u8; MAXPACK];
        let length = self.rcvack(id, &mut msg)?;
        let mut reply = Reader::new(&msg[..length]);
        let uid = reply.u32()?;
        let hardware = reply.u16()?;
        let software = reply.u16()?;
        reply.finish().then_some((uid, hardware, software))
    }

    /// Set the global dim on a node.
    pub fn dim(&mut self, id: u8, red: u8, green: u8, blue: u8) -> bool {
        let mut request = Writer::new();
        request.u8(HND_DIM).u8(red).u8(green).u8(blue);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Stream a TPM2 frame to a node, chunked to the packet size with an
    /// ack per chunk. Reliability lives at the TPM2 layer: a lost chunk
    /// fails the whole transfer.
    pub fn tpm2(&mut self, id: u8, mut data: &[u8]) -> bool {
        loop {
            let chunk = data.len().min(MAXPACK - 1);
            let mut request = Writer::new();
            request.u8(HND_TPM2).bytes(&data[..chunk]);
            data = &data[chunk..];

            self.rf.sendto(id, request.as_slice(), self.clock.now());
            if !self.empty_ack(id) {
                return false;
            }

            if data.is_empty() {
                return true;
            }
        }
    }

    /// Put a node into listen-mode sleep.
    pub fn sleep(&mut self, id: u8) -> bool {
        let mut request = Writer::new();
        request.magic(&SLEEP_MAGIC);
        self.rf.sendto(id, request.as_slice(), self.clock.now());
        self.empty_ack(id)
    }

    /// Wake a sleeping node with a burst spanning its whole listen period.
    /// A broadcast wake always reports success.
    pub fn wake(&mut self, id: u8) -> bool {
        let period = self.listen + WAKE_MARGIN;
        let deadline = self.clock.deadline(period);
        loop {
            let mut request = Writer::new();
            request
                .magic(&WAKE_MAGIC)
                .u32(deadline.remaining(self.clock.now()));
            self.rf.sendto(id, request.as_slice(), self.clock.now());
            while !self.rf.sent(self.clock.now()) {
                self.clock.idle();
            }

            self.clock.delay(WAKE_CADENCE);
            if deadline.expired(self.clock.now()) {
                break;
            }
        }

        if id == BROADCAST {
            true
        } else {
            self.empty_ack(id)
        }
    }
}

impl<P: Platform> Node<P> {
    /// Reply to the pending request; the dst byte carries this node's own
    /// id so the coordinator can tell repliers apart. Keeps the scene
    /// playing while the packet drains.
    fn reply(&mut self, payload: &[u8]) {
        let node = self.config.rf.node;
        let now = self.clock.now();
        self.rf.sendto(node, payload, now);
        while !self.rf.sent(self.clock.now()) {
            self.scene_play();
        }
    }

    /// Dispatch one incoming packet, keeping the scene playing. Returns
    /// whether a packet was handled.
    pub fn handle_packet(&mut self) -> bool {
        self.scene_play();

        let now = self.clock.now();
        if !self.rf.received(now) {
            return false;
        }

        let mut msg = [0u8; MAXPACK];
        let (rcpt, length) = self.rf.receive(&mut msg, now);
        let unicast = rcpt != BROADCAST;

        if length == SLEEP_MAGIC.len() && msg[..4] == SLEEP_MAGIC {
            if unicast {
                self.reply(&[]);
            }

            return self.sleep_listen();
        }

        if length == 0 {
            return false;
        }

        match msg[0] {
            HND_PING if length == 1 => {
                let mut ack = Writer::new();
                ack.u16(self.sensors.vbat())
                    .i16(self.rf.rssi())
                    .i16(self.sensors.temperature());
                if unicast {
                    self.reply(ack.as_slice());
                }
            }

            HND_START => {
                let mut request = Reader::new(&msg[1..length]);
                let Some(scene) = request.u16() else {
                    return false;
                };
                if !request.finish() {
                    return false;
                }

                if self.scene_start(scene) && unicast {
                    self.reply(&[]);
                }
            }

            HND_PAUSE if length == 1 => {
                self.scene_pause();
                if unicast {
                    self.reply(&[]);
                }
            }

            HND_SKIP if length == 1 => {
                self.scene_skip();
                if unicast {
                    self.reply(&[]);
                }
            }

            HND_STOP if length == 1 => {
                self.scene_stop();
                if unicast {
                    self.reply(&[]);
                }
            }

            HND_FRAME if length == 1 => {
                self.pixel.universe();
                if unicast {
                    self.reply(&[]);
                }
            }

            HND_FINGER if length == 1 => {
                let mut ack = Writer::new();
                ack.u32(jenkins(&self.system.serial()))
                    .u16(self.system.hardware_version())
                    .u16(self.system.software_version());
                if unicast {
                    self.reply(ack.as_slice());
                }
            }

            HND_DIM if length == 4 => {
                self.pixel.set_dim(crate::Rgb::new(msg[1], msg[2], msg[3]));
                self.capture_blocking();
                let Node {
                    pixel,
                    config,
                    buffer,
                    ..
                } = self;
                pixel.maps(&config.leds.maps, buffer.as_slice());
                self.pixel.release();
                if unicast {
                    self.reply(&[]);
                }
            }

            HND_TPM2 => {
                if length == 1 {
                    // No data means reset, not an empty frame
                    self.scene_stop();
                    let now = self.clock.now();
                    self.tpm2.reset(now);
                } else {
                    self.tpm2.digest_slice(&mut self.buffer, &msg[1..length]);
                    if self.tpm2.trip() {
                        let now = self.clock.now();
                        self.pixel.enable(true, now);
                        self.capture_blocking();
                        let Node {
                            pixel,
                            config,
                            buffer,
                            ..
                        } = self;
                        pixel.maps(&config.leds.maps, buffer.as_slice());
                        self.pixel.release();
                        self.tpm2.clear();
                    }
                }

                if unicast {
                    self.reply(&[]);
                }
            }

            _ => return false,
        }

        true
    }

    /// Listen-mode sleep: stop everything, drop to the slow clock and halt
    /// until a wake burst arrives, then ack once aligned to its end.
    fn sleep_listen(&mut self) -> bool {
        // Save energy
        self.scene_stop();

        self.clock.delay(100);
        let now = self.clock.now();
        self.pixel.enable(false, now);
        self.ui.led(false);

        // Detach from the radio clock
        self.system.slow_clock();

        // Halt and wait for the wake magic
        let mut msg = [0u8; MAXPACK];
        let (rcpt, length) = loop {
            self.rf
                .listen(self.config.mode.listen.min(u16::MAX as u32) as u16, 100);
            loop {
                self.system.stop_until_event();
                if self.rf.trip() {
                    break;
                }
            }

            let now = self.clock.now();
            let received = self.rf.receive(&mut msg, now);
            if received.1 >= WAKE_MAGIC.len() && msg[..4] == WAKE_MAGIC {
                break received;
            }
        };

        // Back to full speed
        self.system.fast_clock();

        let now = self.clock.now();
        self.pixel.enable(true, now);
        self.rf.enable(true, now);

        // Continue
        self.scene_skip();

        // Reply after the end of the burst if not broadcast
        if rcpt != BROADCAST {
            let mut reader = Reader::new(&msg[..length]);
            let remaining = reader.skip_magic().and_then(|()| reader.u32());
            if let Some(remaining) = remaining {
                if reader.finish() {
                    let mut ticks = remaining.min(self.config.mode.listen) / 50;
                    while ticks > 0 {
                        ticks -= 1;
                        self.clock.delay(50);
                        let now = self.clock.now();
                        self.pixel.enable(ticks & 1 != 0, now);
                    }

                    self.reply(&[]);
                }
            }
        }

        true
    }
}
