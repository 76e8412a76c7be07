//! In-band command marker carried over the PTY byte stream.
//!
//! The hook scripts make the wrapped shell print
//! `ESC ] 7770 ; <exit_code> ; <command> BEL` after every command. Terminals
//! ignore unknown OSC sequences, but the marker is still stripped before any
//! chunk reaches the real terminal.
//!
//! Only complete markers inside a single read chunk are recognised. A marker
//! split across two reads is missed and its bytes pass through to the terminal,
//! which ignores them.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::bytes::Regex;

/// OSC code reserved for the marker.
pub const MARKER_OSC: u32 = 7770;

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)\x1b\]7770;([0-9]+);([^\x07]*)\x07").expect("marker pattern is valid")
    })
}

/// One command completion reported by the wrapped shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub exit_code: i64,
    /// Most recent history entry, trimmed. May be empty.
    pub command: String,
}

impl Marker {
    /// Encode a marker the way the shell hooks emit it.
    pub fn encode(exit_code: u32, command: &str) -> Vec<u8> {
        format!("\x1b]{MARKER_OSC};{exit_code};{command}\x07").into_bytes()
    }

    fn from_captures(caps: &regex::bytes::Captures<'_>) -> Self {
        // Codes too large for i64 are still failures; saturate instead of dropping them.
        let exit_code = std::str::from_utf8(&caps[1])
            .ok()
            .and_then(|digits| digits.parse::<i64>().ok())
            .unwrap_or(i64::MAX);
        let command = String::from_utf8_lossy(&caps[2]).trim().to_string();
        Self { exit_code, command }
    }
}

/// All complete markers in `chunk`, in order of appearance.
pub fn find_markers(chunk: &[u8]) -> Vec<Marker> {
    marker_re()
        .captures_iter(chunk)
        .map(|caps| Marker::from_captures(&caps))
        .collect()
}

/// Parse a buffer holding exactly one marker and nothing else.
pub fn parse_marker(bytes: &[u8]) -> Option<Marker> {
    let caps = marker_re().captures(bytes)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != bytes.len() {
        return None;
    }
    Some(Marker::from_captures(&caps))
}

/// Remove every marker from `chunk`. Borrows when there is nothing to strip.
pub fn strip_markers(chunk: &[u8]) -> Cow<'_, [u8]> {
    marker_re().replace_all(chunk, &b""[..])
}
