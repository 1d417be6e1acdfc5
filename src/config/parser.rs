//! Configuration parser and scene stream.
//!
//! A recursive-descent parser over the [`Lexer`]. [`ConfigStream::parse`]
//! is the structural pass filling a [`Config`]; the remaining entry points
//! serve the scene engine at run time by re-seeking into the stream:
//! [`ConfigStream::scene_offset`] locates a scene block and
//! [`ConfigStream::next_command`] parses exactly one scene statement into a
//! [`SceneStep`].

use core::fmt::Write as _;

use heapless::{String, Vec};

use super::lexer::{Keyword, Lexer, ParseError, Result, Token};
use super::{Config, LedsConfig, ModeConfig, RadioConfig, RunMode, MAXMAPS, MAXSCENES};
use crate::buffer::MAXBUFF;
use crate::pixel::{LedMap, MapChannel, MAXLEDS};
use crate::storage::{Source, Volume};

/// Clip file names referenced from scene blocks.
pub type FileName = String<64>;

/// Size cap for the diagnostic block appended on parse failure.
const DIAG_SIZE_CAP: u32 = 4 * 1024 * 1024;

/// One parsed scene statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneStep {
    /// Play a TPM2 clip file.
    Tpm2(FileName),
    /// Hold for the given number of milliseconds.
    Pause(u32),
    /// Apply the transient map block at the given byte offset.
    Map(u32),
    /// Change the frame rate.
    Framerate(u16),
    /// Change the global dim.
    Dim(crate::Rgb),
}

/// The configuration stream: parser state over the open file.
#[derive(Debug)]
pub struct ConfigStream<S: Source> {
    lexer: Lexer<S>,
}

impl<S: Source> ConfigStream<S> {
    pub fn new(src: S) -> Self {
        Self {
            lexer: Lexer::new(src),
        }
    }

    /// Structural pass: parse the whole file into `cfg`.
    ///
    /// On any error the configuration must be considered rejected as a
    /// whole; the caller falls back to standalone mode.
    pub fn parse(&mut self, cfg: &mut Config) -> Result<()> {
        loop {
            match self.lexer.token()? {
                Token::Eof => break,

                Token::Keyword(Keyword::Rf) => self.parse_rf(&mut cfg.rf)?,

                Token::Keyword(Keyword::Leds) => self.parse_leds(&mut cfg.leds)?,

                Token::Keyword(Keyword::Mode) => {
                    if cfg.mode.block != 0 {
                        return self.lexer.fail("Mode already set");
                    }

                    self.read_mode(&mut cfg.mode)?;
                    cfg.mode.block = self.lexer.tell();
                    self.parse_mode(&mut cfg.mode)?;
                }

                _ => return self.lexer.fail("Unknown top level block"),
            }
        }

        Ok(())
    }

    /// Locate scene `scene`, returning the byte offset of its first
    /// statement or zero when it does not exist.
    pub fn scene_offset(&mut self, cfg: &Config, scene: u16) -> u32 {
        if (scene as usize) < MAXSCENES {
            // Directly addressable scene
            let offset = cfg.mode.scenes[scene as usize];
            if offset == 0 {
                return 0;
            }

            self.lexer.seek(offset);
        } else {
            // Linearly addressable scene
            if cfg.mode.block == 0 {
                return 0;
            }

            self.lexer.seek(cfg.mode.block);
            match self.scan_mode(scene) {
                // Parsed through all the scenes without a match
                Ok(false) | Err(_) => return 0,
                Ok(true) => {}
            }
        }

        match self.lexer.token() {
            Ok(Token::LBrace) => self.lexer.tell(),
            _ => 0,
        }
    }

    /// Parse one scene statement at `pos`. Returns the step and the offset
    /// to continue from, or `None` at the end of the scene block.
    pub fn next_command(&mut self, pos: u32) -> Result<Option<(SceneStep, u32)>> {
        if pos == 0 {
            return Ok(None);
        }

        self.lexer.seek(pos);
        let tok = self.lexer.token()?;
        if tok == Token::RBrace {
            return Ok(None);
        }

        let step = self.scene_statement(tok)?;
        Ok(Some((step, self.lexer.tell())))
    }

    /// Parse the map block at `offset`, handing each map to `apply`.
    pub fn map_block(&mut self, offset: u32, mut apply: impl FnMut(LedMap)) -> Result<()> {
        self.lexer.seek(offset);
        self.parse_maps(&mut |map| {
            apply(map);
            true
        })
    }

    fn read_mode(&mut self, mode: &mut ModeConfig) -> Result<()> {
        self.lexer.expect(Token::Str, "Expected mode name")?;
        let name: String<16> = self.lexer.read_string()?;

        match RunMode::from_name(&name) {
            Some(m) => {
                mode.mode = Some(m);
                Ok(())
            }
            None => self.lexer.fail("Unknown mode"),
        }
    }

    fn parse_rf(&mut self, rf: &mut RadioConfig) -> Result<()> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.rf_statement(rf, tok);
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(()),
                tok => self.rf_statement(rf, tok)?,
            }
        }
    }

    fn rf_statement(&mut self, rf: &mut RadioConfig, tok: Token) -> Result<()> {
        let Token::Keyword(kw) = tok else {
            return self.lexer.fail("Unknown statement in rf block");
        };

        self.lexer.expect(Token::Colon, "Expected ':'")?;
        self.lexer.expect(Token::Int, "Expected integer")?;
        match kw {
            Keyword::Frequency => {
                rf.frequency = self.int_or(290_000_000, 1_020_000_000, "Invalid RF frequency")? as u32
            }
            Keyword::Bitrate => {
                rf.bitrate = self.int_or(1200, 300_000, "Invalid RF bitrate")? as u32
            }
            Keyword::Fdev => {
                rf.fdev = self.int_or(600, 300_000, "Invalid RF frequency deviation")? as u32
            }
            Keyword::Afcbw => {
                rf.afcbw = self.int_or(2600, 500_000, "Invalid RF AFC bandwidth")? as u32
            }
            Keyword::Rxbw => {
                rf.rxbw = self.int_or(2600, 500_000, "Invalid RF receiver bandwidth")? as u32
            }
            Keyword::Power => {
                rf.power = self.int_or(-18, 13, "Invalid RF transmitter power")? as i8
            }
            Keyword::Sensitivity => {
                rf.sensitivity = self.int_or(-127, 0, "Invalid RF sensitivity")? as i16
            }
            Keyword::Mesh => rf.mesh = self.int_or(1, 0xFFFE, "Invalid RF mesh")? as u16,
            Keyword::Node => rf.node = self.int_or(1, 0xFE, "Invalid RF node")? as u8,
            _ => return self.lexer.fail("Unknown statement in rf block"),
        }

        self.lexer.expect(Token::Semicolon, "Expected ';'")
    }

    fn int_or(&mut self, min: i32, max: i32, cause: &'static str) -> Result<i32> {
        match self.lexer.read_int(min, max) {
            Ok(i) => Ok(i),
            Err(_) => self.lexer.fail(cause),
        }
    }

    fn parse_leds(&mut self, leds: &mut LedsConfig) -> Result<()> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.leds_statement(leds, tok);
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(()),
                tok => self.leds_statement(leds, tok)?,
            }
        }
    }

    fn leds_statement(&mut self, leds: &mut LedsConfig, tok: Token) -> Result<()> {
        match tok {
            Token::Keyword(Keyword::Default) => {
                // Validated now, applied from the recorded offset at run time.
                leds.default_block = self.lexer.tell();
                return self.parse_maps(&mut |_| true);
            }

            Token::Keyword(Keyword::Map) => {
                let mut maps: Vec<LedMap, MAXMAPS> = Vec::new();
                let mut overrun = false;
                self.parse_maps(&mut |map| {
                    overrun = maps.push(map).is_err();
                    !overrun
                })?;
                if overrun {
                    return self.lexer.fail("Map count exceeded");
                }

                leds.maps = maps;
                return Ok(());
            }

            Token::Keyword(Keyword::Length) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                leds.length = self.int_or(1, MAXLEDS as i32, "Invalid string length")? as u16;
            }

            Token::Keyword(Keyword::Framerate) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                leds.framerate = self.int_or(0, 30, "Invalid framerate")? as u16;
            }

            Token::Keyword(Keyword::Dim) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Color, "Expected color")?;
                leds.dim = match self.lexer.read_color() {
                    Ok(dim) => dim,
                    Err(_) => return self.lexer.fail("Invalid color spec for global dim"),
                };
            }

            _ => return self.lexer.fail("Unknown statement in leds block"),
        }

        self.lexer.expect(Token::Semicolon, "Expected ';'")
    }

    fn parse_mode(&mut self, mode: &mut ModeConfig) -> Result<()> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.mode_statement(mode, tok);
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(()),
                tok => {
                    self.mode_statement(mode, tok)?;
                }
            }
        }
    }

    fn mode_statement(&mut self, mode: &mut ModeConfig, tok: Token) -> Result<()> {
        match tok {
            Token::Keyword(Keyword::Scene) => {
                self.lexer.expect(Token::Int, "Expected scene index")?;
                let index = self.int_or(0, u16::MAX as i32, "Invalid scene index")?;

                if (index as usize) < MAXSCENES {
                    mode.scenes[index as usize] = self.lexer.tell();
                }

                return self.parse_scene_block();
            }

            Token::Keyword(Keyword::Listen) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                mode.listen = self.int_or(1, 20_000, "Invalid listen period")? as u32;
            }

            _ => return self.lexer.fail("Unknown statement in mode block"),
        }

        self.lexer.expect(Token::Semicolon, "Expected ';'")
    }

    /// Scan the mode block for scene `target`. `Ok(true)` leaves the stream
    /// right before the scene's block.
    fn scan_mode(&mut self, target: u16) -> Result<bool> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.scan_mode_statement(target, tok);
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(false),
                tok => {
                    if self.scan_mode_statement(target, tok)? {
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn scan_mode_statement(&mut self, target: u16, tok: Token) -> Result<bool> {
        match tok {
            Token::Keyword(Keyword::Scene) => {
                self.lexer.expect(Token::Int, "Expected scene index")?;
                let index = self.int_or(0, u16::MAX as i32, "Invalid scene index")?;

                if index as u16 == target {
                    // Found, abort scanning
                    return Ok(true);
                }

                self.parse_scene_block()?;
                return Ok(false);
            }

            Token::Keyword(Keyword::Listen) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                self.int_or(1, 20_000, "Invalid listen period")?;
            }

            _ => return self.lexer.fail("Unknown statement in mode block"),
        }

        self.lexer.expect(Token::Semicolon, "Expected ';'")?;
        Ok(false)
    }

    /// Parse off a scene block, validating its statements.
    fn parse_scene_block(&mut self) -> Result<()> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.scene_statement(tok).map(|_| ());
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(()),
                tok => {
                    self.scene_statement(tok)?;
                }
            }
        }
    }

    fn scene_statement(&mut self, tok: Token) -> Result<SceneStep> {
        let step = match tok {
            Token::Str => SceneStep::Tpm2(self.lexer.read_string()?),

            Token::Keyword(Keyword::Pause) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                SceneStep::Pause(self.int_or(0, 60 * 60 * 1000, "Invalid pause")? as u32)
            }

            Token::Keyword(Keyword::Map) => {
                let offset = self.lexer.tell();
                self.parse_maps(&mut |_| true)?;
                // Block statements carry no trailing semicolon.
                return Ok(SceneStep::Map(offset));
            }

            Token::Keyword(Keyword::Framerate) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Int, "Expected integer")?;
                SceneStep::Framerate(self.int_or(0, 30, "Invalid framerate")? as u16)
            }

            Token::Keyword(Keyword::Dim) => {
                self.lexer.expect(Token::Colon, "Expected ':'")?;
                self.lexer.expect(Token::Color, "Expected color")?;
                match self.lexer.read_color() {
                    Ok(dim) => SceneStep::Dim(dim),
                    Err(_) => return self.lexer.fail("Invalid color spec for global dim"),
                }
            }

            _ => return self.lexer.fail("Unknown statement in scene block"),
        };

        self.lexer.expect(Token::Semicolon, "Expected ';'")?;
        Ok(step)
    }

    /// Parse a map block, handing each map to `store`; `false` from the
    /// store aborts with a count error.
    fn parse_maps(&mut self, store: &mut dyn FnMut(LedMap) -> bool) -> Result<()> {
        let tok = self.lexer.token()?;
        if tok != Token::LBrace {
            return self.map_statement(store, tok);
        }

        loop {
            match self.lexer.token()? {
                Token::Eof | Token::RBrace => return Ok(()),
                tok => self.map_statement(store, tok)?,
            }
        }
    }

    fn map_statement(&mut self, store: &mut dyn FnMut(LedMap) -> bool, tok: Token) -> Result<()> {
        if tok != Token::Int {
            return self.lexer.fail("Expected map");
        }

        let string = self.int_or(0, 5, "Invalid string index")? as u8;
        self.lexer.expect(Token::Colon, "Expected ':'")?;
        self.lexer.expect(Token::Range, "Expected string range")?;
        let (begin, end, step) = match self.lexer.read_range(MAXLEDS as u16 - 1) {
            Ok(range) => range,
            Err(_) => return self.lexer.fail("Invalid string range"),
        };

        self.lexer.expect(Token::Assign, "Expected '='")?;
        let (red, green, blue, cmy) = match self.lexer.token()? {
            Token::Color => {
                // Fixed color
                let color = match self.lexer.read_color() {
                    Ok(c) => c,
                    Err(_) => return self.lexer.fail("Invalid color spec for static map"),
                };
                (
                    MapChannel::Fixed(color.r),
                    MapChannel::Fixed(color.g),
                    MapChannel::Fixed(color.b),
                    false,
                )
            }

            Token::Keyword(kw @ (Keyword::Rgb | Keyword::Cmy)) => {
                self.lexer.expect(Token::LParen, "Expected '('")?;
                let red = self.map_channel()?;
                self.lexer.expect(Token::Comma, "Expected ','")?;
                let green = self.map_channel()?;
                self.lexer.expect(Token::Comma, "Expected ','")?;
                let blue = self.map_channel()?;
                self.lexer.expect(Token::RParen, "Expected ')'")?;
                (red, green, blue, kw == Keyword::Cmy)
            }

            _ => return self.lexer.fail("Expected map spec"),
        };

        let map = LedMap {
            string,
            begin,
            end,
            step,
            red,
            green,
            blue,
            cmy,
        };
        if !store(map) {
            return self.lexer.fail("Map count exceeded");
        }

        self.lexer.expect(Token::Semicolon, "Expected ';'")
    }

    fn map_channel(&mut self) -> Result<MapChannel> {
        match self.lexer.token()? {
            Token::Range => {
                let (begin, end, step) = match self.lexer.read_range(MAXBUFF as u16 - 1) {
                    Ok(range) => range,
                    Err(_) => return self.lexer.fail("Invalid buffer range for map"),
                };
                Ok(MapChannel::sweep(begin, end, step))
            }

            Token::Int => Ok(MapChannel::Fixed(self.lexer.read_color_component()?)),

            _ => self.lexer.fail("Invalid color spec for map"),
        }
    }
}

/// Append a diagnostic block to the configuration file, capped so repeated
/// boots cannot flood the card.
pub fn log_diagnostic<V: Volume>(volume: &mut V, name: &str, error: &ParseError) -> bool {
    if volume.size_of(name) > DIAG_SIZE_CAP {
        return false;
    }

    let mut text: String<256> = String::new();
    let _ = write!(
        text,
        "\n\n\
         /***************************************************\n\
         \n\
         \x20   Error reading configuration file:\n\
         \x20   At line {}: {}\n\
         \n\
         ***************************************************/\n",
        error.line, error.cause
    );

    volume.append(name, &text)
}
