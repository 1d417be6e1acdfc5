//! Scene engine.
//!
//! A scene is a sequence of commands stored inline in the configuration
//! file. The engine holds one active command at a time as a tagged variant
//! and advances by re-seeking the configuration stream to its saved byte
//! position, parsing exactly one statement per advance. [`SceneEngine::play`]
//! is the per-tick entry point; it returns whether the scene is still
//! running.
//!
//! The engine owns no hardware. Everything it touches arrives in a
//! [`SceneIo`] view assembled by the node for the duration of one call,
//! which is how the working buffer and the pixel frame stay single-owner
//! under the cooperative loop.

use crate::buffer::WorkBuffer;
use crate::clock::Deadline;
use crate::config::parser::FileName;
use crate::config::{Config, ConfigStream, SceneStep};
use crate::pixel::{PixelEngine, WaveformSink};
use crate::storage::{Source, Volume};
use crate::tpm2::Tpm2Decoder;
use crate::Rgb;

/// File read granularity for clip playback.
const CHUNK: usize = 128;

/// Everything a scene tick may touch.
pub struct SceneIo<'a, F: Source, W: WaveformSink, V: Volume<File = F>> {
    /// The configuration stream, absent when no card is mounted.
    pub stream: Option<&'a mut ConfigStream<F>>,
    pub config: &'a Config,
    pub pixel: &'a mut PixelEngine<W>,
    pub decoder: &'a mut Tpm2Decoder,
    pub buffer: &'a mut WorkBuffer,
    pub volume: &'a mut V,
    pub now: u32,
}

/// The active command.
enum Command<F> {
    /// Dead end; intentionally keeps the last frame for static display.
    Stop,
    Tpm2 {
        file: F,
        chunk: [u8; CHUNK],
        filled: usize,
        taken: usize,
    },
    Pause {
        deadline: Deadline,
        elapsed: bool,
    },
    Map {
        offset: u32,
    },
    Framerate {
        fps: u16,
    },
    Dim {
        dim: Rgb,
    },
}

/// The scene state machine.
pub struct SceneEngine<F: Source> {
    scene: u16,
    pos: u32,
    paused: bool,
    command: Command<F>,
}

impl<F: Source> SceneEngine<F> {
    pub fn new() -> Self {
        Self {
            scene: 0,
            pos: 0,
            paused: false,
            command: Command::Stop,
        }
    }

    /// Start scene `s`, or resume it when it is the paused current scene.
    /// Starting a different scene restarts from its head. Returns whether
    /// a playable position exists.
    pub fn start<W, V>(&mut self, s: u16, io: &mut SceneIo<'_, F, W, V>) -> bool
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        if self.scene != s {
            self.pos = 0;
        }

        if self.pos == 0 {
            // Start scene
            self.halt(io);
            self.scene = s;
            self.pos = match io.stream.as_deref_mut() {
                Some(stream) => stream.scene_offset(io.config, s),
                None => 0,
            };
            if self.pos != 0 {
                self.advance(io);
            }
        } else {
            // Continue scene
            self.paused = false;

            // Compensate for erratic timing
            if let Command::Pause { elapsed, .. } = &mut self.command {
                *elapsed = true;
            }
        }

        self.pos != 0
    }

    /// Pause the current command; resumed by [`Self::start`] on the same
    /// scene.
    pub fn pause(&mut self) {
        if !matches!(self.command, Command::Stop) {
            self.paused = true;
        }
    }

    /// End the current command now; the next tick advances the scene.
    pub fn skip<W, V>(&mut self, io: &mut SceneIo<'_, F, W, V>)
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        self.halt(io);
    }

    /// Stop the scene and darken the strip.
    pub fn stop<W, V>(&mut self, io: &mut SceneIo<'_, F, W, V>)
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        self.halt(io);
        self.pos = 0;
        io.pixel.enable(false, io.now);
        self.command = Command::Stop;
    }

    /// One scene tick. Returns whether the scene is still running.
    pub fn play<W, V>(&mut self, io: &mut SceneIo<'_, F, W, V>) -> bool
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        if self.paused {
            return false;
        }

        let running = match &mut self.command {
            // Dead end. This intentionally neither clears nor disables the
            // strip; static display relies on it.
            Command::Stop => true,

            Command::Tpm2 {
                file,
                chunk,
                filled,
                taken,
            } => {
                if io.decoder.trip() {
                    // Synchronize to the frame generator
                    if io.pixel.capture() {
                        io.pixel.maps(&io.config.leds.maps, io.buffer.as_slice());
                        io.pixel.release();
                        io.decoder.clear();
                    }

                    true
                } else {
                    // Digest clip data until one frame is complete
                    loop {
                        if *taken == *filled {
                            *taken = 0;
                            *filled = file.read(&mut chunk[..]);
                        }

                        let n = io.decoder.digest_slice(io.buffer, &chunk[*taken..*filled]);
                        *taken += n;

                        if io.decoder.trip() {
                            break;
                        }

                        if *taken == *filled && (*filled == 0 || file.eof()) {
                            break;
                        }
                    }

                    io.decoder.trip()
                }
            }

            Command::Pause { deadline, elapsed } => {
                if !*elapsed && !deadline.expired(io.now) {
                    true
                } else {
                    *elapsed = true;
                    false
                }
            }

            Command::Map { offset } => {
                if !io.pixel.capture() {
                    true
                } else {
                    let offset = *offset;
                    io.pixel.clear();
                    if let Some(stream) = io.stream.as_deref_mut() {
                        let pixel = &mut *io.pixel;
                        let buffer = &*io.buffer;
                        if let Err(error) =
                            stream.map_block(offset, |map| pixel.map(&map, buffer.as_slice()))
                        {
                            log::warn!(
                                "scene {}: bad map block at line {}: {}",
                                self.scene,
                                error.line,
                                error.cause
                            );
                        }
                    }
                    io.pixel.release();
                    false
                }
            }

            Command::Framerate { fps } => {
                if !io.pixel.capture() {
                    true
                } else {
                    let fps = *fps;
                    io.pixel.framerate(fps, io.now);
                    io.pixel.release();
                    false
                }
            }

            Command::Dim { dim } => {
                if !io.pixel.capture() {
                    true
                } else {
                    io.pixel.set_dim(*dim);
                    io.pixel.release();
                    false
                }
            }
        };

        if running {
            return true;
        }

        // Command over; fetch the next one
        self.halt(io);
        if self.pos != 0 {
            self.advance(io);
            true
        } else {
            false
        }
    }

    /// End the current command, running its teardown.
    fn halt<W, V>(&mut self, io: &mut SceneIo<'_, F, W, V>)
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        self.paused = false;
        match core::mem::replace(&mut self.command, Command::Stop) {
            Command::Tpm2 { file, .. } => {
                io.pixel.enable(false, io.now);
                drop(file);
            }
            Command::Map { .. } => {
                io.pixel.enable(false, io.now);
            }
            _ => {}
        }
    }

    /// Parse the next statement at the saved position and install it as
    /// the active command.
    fn advance<W, V>(&mut self, io: &mut SceneIo<'_, F, W, V>)
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        let step = match io.stream.as_deref_mut() {
            Some(stream) => match stream.next_command(self.pos) {
                Ok(Some((step, next))) => {
                    self.pos = next;
                    step
                }
                Ok(None) => {
                    self.pos = 0;
                    return;
                }
                Err(error) => {
                    log::warn!(
                        "scene {}: rejected at line {}: {}",
                        self.scene,
                        error.line,
                        error.cause
                    );
                    self.pos = 0;
                    return;
                }
            },
            None => {
                self.pos = 0;
                return;
            }
        };

        match step {
            SceneStep::Tpm2(name) => self.begin_tpm2(&name, io),
            SceneStep::Pause(msecs) => {
                self.command = Command::Pause {
                    deadline: Deadline::after(io.now, msecs),
                    elapsed: false,
                };
            }
            SceneStep::Map(offset) => {
                io.pixel.enable(true, io.now);
                self.command = Command::Map { offset };
            }
            SceneStep::Framerate(fps) => {
                self.command = Command::Framerate { fps };
            }
            SceneStep::Dim(dim) => {
                self.command = Command::Dim { dim };
            }
        }
    }

    fn begin_tpm2<W, V>(&mut self, name: &FileName, io: &mut SceneIo<'_, F, W, V>)
    where
        W: WaveformSink,
        V: Volume<File = F>,
    {
        io.pixel.enable(true, io.now);

        match io.volume.open(name) {
            Some(file) => {
                io.decoder.reset(io.now);
                self.command = Command::Tpm2 {
                    file,
                    chunk: [0; CHUNK],
                    filled: 0,
                    taken: 0,
                };
            }
            None => {
                log::warn!("scene {}: cannot open clip \"{}\"", self.scene, name);
            }
        }
    }
}

impl<F: Source> Default for SceneEngine<F> {
    fn default() -> Self {
        Self::new()
    }
}
