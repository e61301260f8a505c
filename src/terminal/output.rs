//! Output Decoding and Normalization
//!
//! Turns the byte stream coming off a game server socket into text and
//! strips it down to what a test actually wants to compare against.
//!
//! Two stages:
//!
//! - [`TextDecoder`] is stateful and byte-level. It removes Telnet IAC
//!   negotiation and decodes UTF-8, carrying incomplete sequences from one
//!   chunk to the next.
//! - [`normalize`] is pure. It removes color/cursor escape sequences, bells,
//!   carriage returns and other control characters, then splits the result
//!   into non-empty logical lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Telnet "interpret as command"
const IAC: u8 = 0xFF;
/// Subnegotiation begin
const SB: u8 = 0xFA;
/// Subnegotiation end
const SE: u8 = 0xF0;
/// WILL / WONT / DO / DONT
const NEGOTIATION: std::ops::RangeInclusive<u8> = 0xFB..=0xFE;

/// CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`), charset selection and
/// two-byte escapes.
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[()*+][0-~]|[0-?@-Z\\^_])")
        .expect("escape sequence pattern is valid")
});

/// C0 controls other than tab, newline and ESC, plus DEL. Covers BEL and CR.
static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0b-\x1a\x1c-\x1f\x7f]").expect("control char pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum IacState {
    #[default]
    Data,
    Command,
    Option,
    Subnegotiation,
    SubnegotiationIac,
}

/// Streaming decoder from socket bytes to text
///
/// Telnet sequences are consumed and never reach the text. A literal
/// `IAC IAC` becomes a single 0xFF byte, which is not valid UTF-8 and so
/// shows up as U+FFFD.
#[derive(Debug, Default)]
pub struct TextDecoder {
    state: IacState,
    /// Bytes of an incomplete UTF-8 sequence from the previous chunk
    carry: Vec<u8>,
}

impl TextDecoder {
    /// Create a decoder in the data state
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of socket bytes
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.carry);
        data.reserve(bytes.len());

        for &byte in bytes {
            self.state = match (self.state, byte) {
                (IacState::Data, IAC) => IacState::Command,
                (IacState::Data, b) => {
                    data.push(b);
                    IacState::Data
                }
                (IacState::Command, IAC) => {
                    data.push(IAC);
                    IacState::Data
                }
                (IacState::Command, SB) => IacState::Subnegotiation,
                (IacState::Command, b) if NEGOTIATION.contains(&b) => IacState::Option,
                (IacState::Command, _) => IacState::Data,
                (IacState::Option, _) => IacState::Data,
                (IacState::Subnegotiation, IAC) => IacState::SubnegotiationIac,
                (IacState::Subnegotiation, _) => IacState::Subnegotiation,
                (IacState::SubnegotiationIac, SE) => IacState::Data,
                (IacState::SubnegotiationIac, _) => IacState::Subnegotiation,
            };
        }

        self.decode_utf8(data)
    }

    /// Flush any carried partial UTF-8 sequence as replacement characters
    pub fn finish(&mut self) -> String {
        self.state = IacState::Data;
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    /// Whether bytes are held back waiting for the rest of a sequence
    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty() || self.state != IacState::Data
    }

    fn decode_utf8(&mut self, data: Vec<u8>) -> String {
        let mut out = String::with_capacity(data.len());
        let mut rest = &data[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}

/// Normalized view of server text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Normalized {
    /// Text with escape sequences and control characters removed
    pub clean: String,
    /// Non-empty lines of `clean`, trailing whitespace trimmed
    pub lines: Vec<String>,
}

/// Strip escape sequences and control characters, then split into lines
///
/// Malformed or incomplete escape sequences are left in place. The returned
/// `clean` text is a fixed point: normalizing it again yields the same text.
pub fn normalize(raw: &str) -> Normalized {
    let clean = clean_text(raw);
    let lines = split_lines(&clean);
    Normalized { clean, lines }
}

/// Just the `clean` half of [`normalize`]
pub fn clean_text(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let stripped = ESCAPE_SEQUENCE.replace_all(&current, "");
        let stripped = CONTROL_CHARS.replace_all(&stripped, "");
        if stripped == current {
            return current;
        }
        // Removing a control char can splice a new escape sequence together
        current = stripped.into_owned();
    }
}

/// Non-empty logical lines of already clean text
pub fn split_lines(clean: &str) -> Vec<String> {
    clean
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim_end().to_string())
        .collect()
}
