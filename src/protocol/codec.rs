//! Message codes and the framing of a single protocol message.
//!
//! Every message is a five byte code, one separator byte and a payload:
//!
//! ```text
//! C:003 notes/a.txt a.txt
//! ^^^^^ code
//!      ^ separator
//!       ^^^^^^^^^^^^^^^^^ payload
//! ```
//!
//! The code always sits at offset zero, so a receiver classifies a message by
//! its first five bytes alone. Nothing after the separator is ever searched
//! for codes; a chunk of file content that happens to contain `S:200` is just
//! data.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::cast::FromPrimitive;

use crate::config::{CODE_PADDING, CODE_SIZE};

/// Separator between the code and the payload
pub const SEPARATOR: u8 = b' ';

/// Operations a client can ask for (`C:xxx`)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum CommandCode {
    Get = 1,
    Info = 2,
    Put = 3,
    MakeDir = 4,
    Remove = 5,
    Quit = 999,
}

/// Statuses exchanged by both sides (`S:xxx` and `E:xxx`)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum StatusCode {
    /// Ready for (more) content
    Continue = 100,
    /// Success, or the end of a transfer
    Ok = 200,
    /// One chunk of file content
    PartialContent = 206,
    NotFound = 404,
    /// The entry exists already, has the wrong type, or the operation failed
    NotAcceptable = 406,
    /// The chunked transfer is being abandoned
    Aborted = 500,
}

impl StatusCode {
    /// Error statuses carry the `E` class letter
    pub fn is_error(self) -> bool {
        self as u32 >= 400
    }
}

/// Any code that may open a message
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Command(CommandCode),
    Status(StatusCode),
}

impl From<CommandCode> for Code {
    fn from(code: CommandCode) -> Self {
        Code::Command(code)
    }
}

impl From<StatusCode> for Code {
    fn from(code: StatusCode) -> Self {
        Code::Status(code)
    }
}

impl Code {
    /// The five byte wire form of the code
    pub fn tag(self) -> [u8; CODE_SIZE] {
        let (class, number) = match self {
            Code::Command(c) => (b'C', c as u32),
            Code::Status(s) if s.is_error() => (b'E', s as u32),
            Code::Status(s) => (b'S', s as u32),
        };
        [
            class,
            b':',
            b'0' + (number / 100 % 10) as u8,
            b'0' + (number / 10 % 10) as u8,
            b'0' + (number % 10) as u8,
        ]
    }

    /// Classifies the first five bytes of `bytes`.
    ///
    /// Returns `None` when fewer than five bytes are present or the tag is not
    /// in the closed code alphabet. Bytes past the fifth are never looked at.
    pub fn classify(bytes: &[u8]) -> Option<Code> {
        let tag = bytes.get(..CODE_SIZE)?;
        if tag[1] != b':' || !tag[2..].iter().all(u8::is_ascii_digit) {
            return None;
        }
        let number = tag[2..].iter().fold(0_u32, |acc, d| acc * 10 + u32::from(d - b'0'));
        match tag[0] {
            b'C' => CommandCode::from_u32(number).map(Code::Command),
            b'S' => StatusCode::from_u32(number).filter(|s| !s.is_error()).map(Code::Status),
            b'E' => StatusCode::from_u32(number).filter(|s| s.is_error()).map(Code::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.tag()))
    }
}

/// Violations of the message format or of command syntax.
///
/// These are detected before any handler runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer than five bytes where a code was expected
    Truncated,
    /// The first five bytes are not a known code
    UnknownCode(String),
    /// The sixth byte is not the separator
    MissingSeparator,
    /// Payload longer than the configured maximum
    PayloadTooLarge { len: usize, max: usize },
    /// A status code arrived where a command was expected
    NotACommand(Code),
    /// The command got a number of arguments it does not accept
    WrongArgumentCount { command: CommandCode, got: usize },
    /// A remote path that is empty or starts with `.` or `/`
    InvalidPath(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Truncated => write!(f, "message shorter than a code"),
            ProtocolError::UnknownCode(tag) => write!(f, "unknown message code {tag:?}"),
            ProtocolError::MissingSeparator => write!(f, "missing separator after code"),
            ProtocolError::PayloadTooLarge { len, max } => {
                write!(f, "payload length {len} exceeds max {max}")
            }
            ProtocolError::NotACommand(code) => write!(f, "expected a command, got {code}"),
            ProtocolError::WrongArgumentCount { command, got } => {
                write!(f, "{command:?} does not take {got} argument(s)")
            }
            ProtocolError::InvalidPath(path) => write!(f, "invalid remote path {path:?}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A decoded protocol message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub code: Code,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new<C: Into<Code>, P: Into<Vec<u8>>>(code: C, payload: P) -> Self {
        Self { code: code.into(), payload: payload.into() }
    }

    /// The status, if this message carries one
    pub fn status(&self) -> Option<StatusCode> {
        match self.code {
            Code::Status(s) => Some(s),
            Code::Command(_) => None,
        }
    }

    pub fn is(&self, status: StatusCode) -> bool {
        self.code == Code::Status(status)
    }

    /// The payload as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Appends the encoded form of `message` to `out`.
///
/// Fails instead of truncating when the payload is longer than `max_payload`;
/// `out` is left untouched in that case.
pub fn encode_into(
    message: &Message,
    max_payload: usize,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    if message.payload.len() > max_payload {
        return Err(ProtocolError::PayloadTooLarge { len: message.payload.len(), max: max_payload });
    }
    out.reserve(CODE_SIZE + CODE_PADDING + message.payload.len());
    out.extend_from_slice(&message.code.tag());
    out.push(SEPARATOR);
    out.extend_from_slice(&message.payload);
    Ok(())
}

/// Encodes `message` into a fresh buffer
pub fn encode(message: &Message, max_payload: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    encode_into(message, max_payload, &mut out)?;
    Ok(out)
}

/// Decodes one message body.
///
/// A body of exactly five bytes is a code with an empty payload.
pub fn decode(body: &[u8]) -> Result<Message, ProtocolError> {
    if body.len() < CODE_SIZE {
        return Err(ProtocolError::Truncated);
    }
    let code = Code::classify(body).ok_or_else(|| {
        ProtocolError::UnknownCode(String::from_utf8_lossy(&body[..CODE_SIZE]).into_owned())
    })?;
    let payload = match body.get(CODE_SIZE) {
        None => Vec::new(),
        Some(&SEPARATOR) => body[CODE_SIZE + CODE_PADDING..].to_vec(),
        Some(_) => return Err(ProtocolError::MissingSeparator),
    };
    Ok(Message { code, payload })
}
