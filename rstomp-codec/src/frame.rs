use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::error::DecodeError;

/// Frame command tokens, client commands and server responses alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return Err(DecodeError::UnknownCommand(s.to_owned())),
        };
        Ok(command)
    }
}

/// One protocol message: a command, an ordered header list and a body.
///
/// Headers keep their wire order, duplicate keys are allowed and lookup
/// returns the first match. A frame is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    #[inline]
    pub fn new(command: Command, headers: Vec<(String, String)>, body: String) -> Self {
        Frame { command, headers, body }
    }

    #[inline]
    pub fn command(&self) -> Command {
        self.command
    }

    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Value of the first header with this key.
    #[inline]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Parses the text accumulated between two frame terminators.
    ///
    /// Header lines split on the first `:` only; the first line without a
    /// colon is consumed as the header/body separator and everything after
    /// it is the body, verbatim.
    pub(crate) fn parse(text: &str) -> Result<Frame, DecodeError> {
        let eol = text.find('\n').ok_or(DecodeError::MissingSeparator)?;
        let command = text[..eol].parse::<Command>()?;

        let mut headers = Vec::new();
        let mut pos = eol + 1;
        loop {
            let eol = text[pos..].find('\n').map(|i| pos + i);
            let line = match eol {
                Some(e) => &text[pos..e],
                None => &text[pos..],
            };
            match line.split_once(':') {
                Some((key, value)) => {
                    // headers must be followed by the separator line before
                    // the terminator
                    let Some(e) = eol else {
                        return Err(DecodeError::MissingSeparator);
                    };
                    headers.push((key.to_owned(), value.to_owned()));
                    pos = e + 1;
                }
                None => {
                    let body = match eol {
                        Some(e) => text[e + 1..].to_owned(),
                        None => String::new(),
                    };
                    return Ok(Frame { command, headers, body });
                }
            }
        }
    }

    /// Serializes to wire form, terminator included.
    pub(crate) fn write(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_size());
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (key, value) in &self.headers {
            dst.put_slice(key.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(self.body.as_bytes());
        dst.put_u8(0);
    }

    fn encoded_size(&self) -> usize {
        self.command.as_str().len()
            + self.headers.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>()
            + self.body.len()
            + 3
    }
}
