//! Line framing of the event stream.

use strand_core::envelope::{Frame, decode};

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into lines, holding back any partial trailing line.
///
/// Splitting happens on the `\n` byte before UTF-8 decoding, so a multi-byte
/// character cut across two reads is reassembled intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every line they complete, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Flush the unterminated remainder at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches('\r');
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// What one line of the stream turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Frame(Frame),
    /// Blank lines, comments, non-data fields and `[DONE]`.
    Ignored,
    /// A data line whose body did not decode to a known event.
    Malformed,
}

pub fn classify_line(line: &str) -> Line {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Ignored;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() || data == DONE_SENTINEL {
        return Line::Ignored;
    }
    match decode(data) {
        Some(frame) => Line::Frame(frame),
        None => Line::Malformed,
    }
}

/// Decode a single `data:` line, skipping everything else.
pub fn parse_line(line: &str) -> Option<Frame> {
    match classify_line(line) {
        Line::Frame(frame) => Some(frame),
        Line::Ignored | Line::Malformed => None,
    }
}
