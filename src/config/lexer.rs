//! Configuration tokenizer.
//!
//! A hand-written lexer over a [`Source`] stream with one character of
//! pushback. Literals are not materialized by [`Lexer::token`]; the parser
//! calls the dedicated `read_*` routines once it knows what it expects,
//! which keeps the token type trivially copyable and the literal buffers on
//! the caller's stack.

use crate::storage::Source;
use crate::Rgb;

use heapless::String;

/// A rejected configuration, with the line it was rejected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    pub line: u32,
    pub cause: &'static str,
}

pub type Result<T> = core::result::Result<T, ParseError>;

/// Keywords of the configuration language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Afcbw,
    Bitrate,
    Cmy,
    Default,
    Dim,
    Fdev,
    Framerate,
    Frequency,
    Leds,
    Length,
    Listen,
    Map,
    Mesh,
    Mode,
    Node,
    Pause,
    Power,
    Rf,
    Rgb,
    Rxbw,
    Scene,
    Sensitivity,
}

impl Keyword {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "afcbw" => Some(Self::Afcbw),
            "bitrate" => Some(Self::Bitrate),
            "cmy" => Some(Self::Cmy),
            "default" => Some(Self::Default),
            "dim" => Some(Self::Dim),
            "fdev" => Some(Self::Fdev),
            "framerate" => Some(Self::Framerate),
            "frequency" => Some(Self::Frequency),
            "leds" => Some(Self::Leds),
            "length" => Some(Self::Length),
            "listen" => Some(Self::Listen),
            "map" => Some(Self::Map),
            "mesh" => Some(Self::Mesh),
            "mode" => Some(Self::Mode),
            "node" => Some(Self::Node),
            "pause" => Some(Self::Pause),
            "power" => Some(Self::Power),
            "rf" => Some(Self::Rf),
            "rgb" => Some(Self::Rgb),
            "rxbw" => Some(Self::Rxbw),
            "scene" => Some(Self::Scene),
            "sensitivity" => Some(Self::Sensitivity),
            _ => None,
        }
    }
}

/// Lexical tokens. Literal tokens only announce the literal; the parser
/// reads its value with the matching `read_*` routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Eof,
    Semicolon,
    Colon,
    Comma,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Assign,
    Str,
    Color,
    Range,
    Int,
    Keyword(Keyword),
}

/// The tokenizer.
#[derive(Debug)]
pub struct Lexer<S: Source> {
    src: S,
    pushback: Option<u8>,
    line: u32,
}

impl<S: Source> Lexer<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            pushback: None,
            line: 1,
        }
    }

    /// Build a [`ParseError`] at the current line.
    pub fn fail<T>(&self, cause: &'static str) -> Result<T> {
        Err(ParseError {
            line: self.line,
            cause,
        })
    }

    fn getch(&mut self) -> Option<u8> {
        if let Some(ch) = self.pushback.take() {
            return Some(ch);
        }

        let ch = self.src.read_byte()?;
        if ch == b'\n' {
            self.line += 1;
        }

        Some(ch)
    }

    fn ungetch(&mut self, ch: u8) {
        self.pushback = Some(ch);
    }

    /// Byte offset of the next unread character.
    pub fn tell(&self) -> u32 {
        self.src.tell() - self.pushback.is_some() as u32
    }

    /// Reposition the stream, discarding any pushback.
    pub fn seek(&mut self, pos: u32) {
        self.pushback = None;
        self.src.seek(pos);
    }

    /// Next token. Literal values stay in the stream.
    pub fn token(&mut self) -> Result<Token> {
        while let Some(mut ch) = self.getch() {
            if ch.is_ascii_whitespace() {
                continue;
            }

            // Strip comments
            if ch == b'/' {
                match self.getch() {
                    Some(b'/') => {
                        // Single line comment
                        while let Some(ch) = self.getch() {
                            if ch == b'\n' {
                                break;
                            }
                        }
                        continue;
                    }
                    Some(b'*') => {
                        // Block comment
                        loop {
                            let mut ch = self.getch();
                            while let Some(c) = ch {
                                if c == b'*' {
                                    break;
                                }
                                ch = self.getch();
                            }
                            if ch.is_none() {
                                break;
                            }

                            match self.getch() {
                                None | Some(b'/') => break,
                                Some(_) => continue,
                            }
                        }
                        continue;
                    }
                    Some(other) => {
                        self.ungetch(other);
                        ch = b'/';
                    }
                    None => {}
                }
            }

            // Literals
            if ch == b'"' {
                self.ungetch(ch);
                return Ok(Token::Str);
            } else if ch.is_ascii_digit() || ch == b'-' || ch == b'+' {
                self.ungetch(ch);
                return Ok(Token::Int);
            } else if ch == b'[' {
                self.ungetch(ch);
                return Ok(Token::Range);
            } else if ch == b'&' {
                self.ungetch(ch);
                return Ok(Token::Color);
            }

            // Single character tokens
            match ch {
                b'{' => return Ok(Token::LBrace),
                b'}' => return Ok(Token::RBrace),
                b'(' => return Ok(Token::LParen),
                b')' => return Ok(Token::RParen),
                b';' => return Ok(Token::Semicolon),
                b'=' => return Ok(Token::Assign),
                b':' => return Ok(Token::Colon),
                b',' => return Ok(Token::Comma),
                _ => {}
            }

            // Keywords
            if ch.is_ascii_alphabetic() {
                let mut keyword: String<16> = String::new();
                loop {
                    let _ = keyword.push(ch as char);
                    match self.getch() {
                        Some(c) if c.is_ascii_alphabetic() => ch = c,
                        Some(c) => {
                            self.ungetch(c);
                            break;
                        }
                        None => break,
                    }
                }

                return match Keyword::from_name(&keyword) {
                    Some(kw) => Ok(Token::Keyword(kw)),
                    None => self.fail("Unknown keyword"),
                };
            }

            return self.fail("Stray character");
        }

        Ok(Token::Eof)
    }

    /// Fail unless the next token matches.
    pub fn expect(&mut self, want: Token, cause: &'static str) -> Result<()> {
        if self.token()? != want {
            return self.fail(cause);
        }

        Ok(())
    }

    /// Read a string literal: `"` characters `"` with `\t \r \n \\ \"`
    /// escapes. An unknown escape passes the backslash through.
    pub fn read_string<const N: usize>(&mut self) -> Result<String<N>> {
        if self.getch() != Some(b'"') {
            return self.fail("Expected '\"'");
        }

        let mut buf: String<N> = String::new();
        while let Some(mut ch) = self.getch() {
            if ch == b'"' {
                break;
            } else if ch == b'\\' {
                let Some(esc) = self.getch() else { break };
                match esc {
                    b't' => ch = b'\t',
                    b'r' => ch = b'\r',
                    b'n' => ch = b'\n',
                    b'"' | b'\\' => ch = esc,
                    _ => {
                        self.ungetch(esc);
                        ch = b'\\';
                    }
                }
            }

            if buf.push(ch as char).is_err() {
                return self.fail("String too long");
            }
        }

        Ok(buf)
    }

    fn skip_space(&mut self) -> Option<u8> {
        loop {
            let ch = self.getch()?;
            if !ch.is_ascii_whitespace() {
                return Some(ch);
            }
        }
    }

    /// Read an integer literal: optional sign, then decimal digits, or
    /// octal with a leading `0`, or hexadecimal with a leading `0x`.
    /// Rejected when outside `min..=max`.
    pub fn read_int(&mut self, min: i32, max: i32) -> Result<i32> {
        let mut ch = self.getch();
        let mut negative = false;
        if let Some(c) = ch {
            if c == b'-' || c == b'+' {
                negative = c == b'-';
                ch = self.getch();
            }
        }

        while let Some(c) = ch {
            if !c.is_ascii_whitespace() {
                break;
            }
            ch = self.getch();
        }

        let mut value: i32 = 0;
        let mut base = 10;
        let mut literal_zero = false;
        if ch == Some(b'0') {
            ch = self.getch();
            match ch {
                Some(c) if c.eq_ignore_ascii_case(&b'x') => {
                    base = 16;
                    ch = self.getch();
                }
                Some(c) if c.is_ascii_hexdigit() => base = 8,
                _ => literal_zero = true,
            }
        }

        if !literal_zero {
            if !matches!(ch, Some(c) if c.is_ascii_hexdigit()) {
                return self.fail("Expected integer digit");
            }

            while let Some(c) = ch {
                if !c.is_ascii_hexdigit() {
                    break;
                }

                let hexval = if c.is_ascii_digit() {
                    c - b'0'
                } else {
                    10 + c.to_ascii_uppercase() - b'A'
                };
                let digit = hexval as i32;

                if digit >= base {
                    return self.fail("Invalid digit for base");
                }

                if negative {
                    value = match value.checked_mul(base).and_then(|v| v.checked_sub(digit)) {
                        Some(v) => v,
                        None => return self.fail("Integer underflown"),
                    };
                } else {
                    value = match value.checked_mul(base).and_then(|v| v.checked_add(digit)) {
                        Some(v) => v,
                        None => return self.fail("Integer overflown"),
                    };
                }

                ch = self.getch();
            }
        }

        if let Some(c) = ch {
            self.ungetch(c);
        }

        if value > max || value < min {
            return self.fail("Integer out of range");
        }

        Ok(value)
    }

    /// Read a color component: an integer, or a percentage with a trailing
    /// `%` mapped 0..100 onto 0..255.
    pub fn read_color_component(&mut self) -> Result<u8> {
        let i = self.read_int(0, 255)?;

        match self.skip_space() {
            Some(b'%') => {
                if i > 100 {
                    return self.fail("Percentage out of range");
                }
                Ok((i * 255 / 100) as u8)
            }
            Some(ch) => {
                self.ungetch(ch);
                Ok(i as u8)
            }
            None => Ok(i as u8),
        }
    }

    /// Read a color literal: `& rgb(c,c,c)`, `& cmy(c,c,c)` or `& <gray>`.
    /// CMY components are stored complemented.
    pub fn read_color(&mut self) -> Result<Rgb> {
        if self.getch() != Some(b'&') {
            return self.fail("Expected '&'");
        }

        let tok = self.token()?;
        match tok {
            Token::Keyword(kw @ (Keyword::Rgb | Keyword::Cmy)) => {
                let mut comp = [0u8; 3];
                self.expect(Token::LParen, "Expected '('")?;
                for (i, c) in comp.iter_mut().enumerate() {
                    if i > 0 {
                        self.expect(Token::Comma, "Expected ','")?;
                    }

                    self.expect(Token::Int, "Expected color component")?;
                    *c = self.read_color_component()?;
                }

                self.expect(Token::RParen, "Expected ')'")?;
                if kw == Keyword::Cmy {
                    for c in &mut comp {
                        *c = !*c;
                    }
                }

                Ok(Rgb::new(comp[0], comp[1], comp[2]))
            }

            Token::Int => {
                let gray = self.read_color_component()?;
                Ok(Rgb::new(gray, gray, gray))
            }

            _ => self.fail("Unknown color spec"),
        }
    }

    /// Read a range literal: `[ a ]` or `[ a .. b ]` or `[ a .. b % s ]`
    /// with `^` for the begin and `$` for `max`. The step sign is derived
    /// from the direction and the end is adjusted to a whole number of
    /// steps, so the range is never empty.
    pub fn read_range(&mut self, max: u16) -> Result<(u16, u16, i8)> {
        if self.getch() != Some(b'[') {
            return self.fail("Expected '['");
        }

        let begin: u16;
        match self.skip_space() {
            Some(b'^') => begin = 0,
            Some(ch) => {
                self.ungetch(ch);
                if self.token()? != Token::Int {
                    return self.fail("Expected range offset");
                }
                begin = self.read_int(0, max as i32)? as u16;
            }
            None => return self.fail("Expected range offset"),
        }

        let mut end = begin;
        let mut step: i8 = 1;
        let mut ch = self.skip_space();
        if ch == Some(b'.') {
            if self.getch() != Some(b'.') {
                return self.fail("Expected range");
            }

            match self.skip_space() {
                Some(b'$') => end = max,
                Some(c) => {
                    self.ungetch(c);
                    if self.token()? != Token::Int {
                        return self.fail("Expected range end");
                    }
                    end = self.read_int(0, max as i32)? as u16;
                }
                None => return self.fail("Expected range end"),
            }

            let mut magnitude: i32 = 1;
            ch = self.skip_space();
            if ch == Some(b'%') {
                self.expect(Token::Int, "Expected range step")?;
                magnitude = self.read_int(0, 100)?.max(1);
                ch = self.skip_space();
            }

            step = if end > begin {
                magnitude as i8
            } else if end < begin {
                -(magnitude as i8)
            } else {
                1
            };

            // Adjust the range to a whole number of steps
            let steps = (end as i32 - begin as i32) / step as i32;
            end = (begin as i32 + steps * step as i32) as u16;
        }

        if ch != Some(b']') {
            return self.fail("Expected ']'");
        }

        Ok((begin, end, step))
    }
}
