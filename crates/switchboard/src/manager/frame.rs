// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codec for the PBX manager protocol.
//!
//! A frame is a run of `Key: Value` lines terminated by a blank line. Keys
//! are case-sensitive and a repeated key overwrites the earlier value.
//! Lines without the `": "` separator are skipped.

use std::io;

use indexmap::IndexMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Ordered field map carried by commands and frames.
pub type Fields = IndexMap<String, String>;

/// Field that marks an unsolicited event frame.
pub const EVENT_KEY: &str = "Event";
/// Field that marks a command response frame.
pub const RESPONSE_KEY: &str = "Response";
/// Optional human-readable detail on a response.
pub const MESSAGE_KEY: &str = "Message";

const SEPARATOR: &str = ": ";

/// How the reader should route a parsed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Event,
    Response,
    Other,
}

/// One parsed block of `Key: Value` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Fields,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Classify the frame. `Event` wins over `Response` when both are present.
    pub fn kind(&self) -> FrameKind {
        if self.fields.contains_key(EVENT_KEY) {
            FrameKind::Event
        } else if self.fields.contains_key(RESPONSE_KEY) {
            FrameKind::Response
        } else {
            FrameKind::Other
        }
    }

    /// Absorb one protocol line. Returns `false` when the line is blank and
    /// therefore terminates the frame.
    fn push_line(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        if let Some((key, value)) = line.split_once(SEPARATOR) {
            self.fields.insert(key.to_owned(), value.to_owned());
        }
        true
    }
}

impl From<Fields> for Frame {
    fn from(fields: Fields) -> Self {
        Self { fields }
    }
}

/// Read one frame from `reader`.
///
/// End of stream is reported as [`io::ErrorKind::UnexpectedEof`], including
/// when it arrives mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Frame::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by PBX"));
        }
        if !frame.push_line(&line) {
            return Ok(frame);
        }
    }
}

/// Encode a command as `Action: <action>` followed by its fields and the
/// terminating blank line. Values are written verbatim and must not contain
/// CRLF.
pub fn encode_action(action: &str, fields: &Fields) -> Vec<u8> {
    let mut out = format!("Action{SEPARATOR}{action}\r\n");
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(SEPARATOR);
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}

/// Build a [`Fields`] map from literal pairs.
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
