//! Message framing and parsing for the teleoperation link.
//!
//! The wire protocol is newline-terminated UTF-8 text: either the sentinel
//! `RESET` or an object mapping leader ids to absolute positions. Both the
//! JSON form `{"10": 2000}` and the historical bare-key form `{10: 2000}`
//! are accepted; everything is decoded through a typed parser, never
//! evaluated. Network reads arrive in arbitrary chunks, so the framer keeps
//! unconsumed bytes across calls and never blocks waiting for a newline.
//! Each message parses independently; a malformed one is an error for that
//! message only and leaves the buffer intact for the next.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::utils::config::{JointId, Position, POSITION_MAX};
use crate::utils::controllers::mirror::Command;

/// Sentinel message body that homes the followers and re-synchronizes
/// baselines.
pub const RESET_SENTINEL: &str = "RESET";

/// Errors produced while decoding one message.
#[derive(Debug)]
pub enum ParseError {
    /// Message bytes are not valid UTF-8.
    InvalidUtf8,
    /// Message body is neither the reset sentinel nor a joint/position
    /// object.
    Malformed(serde_json::Error),
    /// A position value fell outside the encoder range.
    PositionOutOfRange { joint: JointId, value: u16 },
}

/// Splits an append-only byte stream into parsed commands.
#[derive(Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        LineFramer::default()
    }

    /// Append a chunk and decode every complete message now in the buffer.
    ///
    /// Bytes after the last newline are retained for the next call. Blank
    /// lines are skipped.
    pub fn feed(
        &mut self,
        bytes: &[u8],
    ) -> Vec<Result<Command, ParseError>> {
        self.buffer.extend_from_slice(bytes);
        let mut parsed = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let body = &line[..line.len() - 1];
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            parsed.push(parse_message(body));
        }
        parsed
    }

    /// Bytes of a trailing partial message, if any.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial message, e.g. when the connection goes away.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decode one newline-stripped message body.
///
/// The sentinel is recognized before the generic object form. Every joint id
/// must parse as an integer key and every position must lie in the encoder
/// range; anything else rejects the whole message rather than applying a
/// partial update.
pub fn parse_message(raw: &[u8]) -> Result<Command, ParseError> {
    let text = core::str::from_utf8(raw)
        .map_err(|_| ParseError::InvalidUtf8)?
        .trim();
    if text == RESET_SENTINEL {
        return Ok(Command::Reset);
    }
    let normalized = quote_bare_keys(text);
    let positions: BTreeMap<JointId, Position> =
        serde_json::from_str(&normalized).map_err(ParseError::Malformed)?;
    for (&joint, &value) in &positions {
        if value > POSITION_MAX {
            return Err(ParseError::PositionOutOfRange { joint, value });
        }
    }
    Ok(Command::PositionUpdate(positions))
}

/// Quote bare integer keys so the historical `{1: 100}` sender format parses
/// as JSON. Keys sit right after `{` or `,`; values after `:` are left alone,
/// as is anything already quoted.
fn quote_bare_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut at_key = false;
    let mut quoting = false;
    for c in text.chars() {
        if quoting && !c.is_ascii_digit() {
            out.push('"');
            quoting = false;
        }
        match c {
            '{' | ',' => at_key = true,
            _ if c.is_ascii_whitespace() => {}
            _ if at_key && c.is_ascii_digit() => {
                out.push('"');
                quoting = true;
                at_key = false;
            }
            _ => at_key = false,
        }
        out.push(c);
    }
    if quoting {
        out.push('"');
    }
    out
}
