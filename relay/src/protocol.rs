//! Syntactic validation of statsd lines.
//!
//! A line looks like `bucket:value|type` with an optional `|@rate` suffix.
//! Only the shape is checked: the bucket and value are never interpreted.

use std::fmt;

/// Why a line was refused.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Rejection {
    #[error("empty line")]
    Empty,
    #[error("missing ':' delimiter in {0:?}")]
    MissingColon(String),
    #[error("missing '|' delimiter in {0:?}")]
    MissingPipe(String),
    #[error("invalid metric type {code:?} in {line:?}")]
    BadTypeCode { code: String, line: String },
}

/// A line that passed validation, split into its segments.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    raw: &'a [u8],
    colon: usize,
    pipe: usize,
    type_end: usize,
}

impl<'a> Line<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn bucket(&self) -> &'a [u8] {
        &self.raw[..self.colon]
    }

    pub fn value(&self) -> &'a [u8] {
        &self.raw[self.colon + 1..self.pipe]
    }

    pub fn type_code(&self) -> &'a [u8] {
        &self.raw[self.pipe + 1..self.type_end]
    }

    /// Everything after the type code's trailing `|`, if present.
    pub fn sample(&self) -> Option<&'a [u8]> {
        (self.type_end < self.raw.len()).then(|| &self.raw[self.type_end + 1..])
    }
}

impl fmt::Debug for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Line")
            .field(&String::from_utf8_lossy(self.raw))
            .finish()
    }
}

pub fn validate(line: &[u8]) -> Result<Line<'_>, Rejection> {
    if line.is_empty() {
        return Err(Rejection::Empty);
    }

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Rejection::MissingColon(lossy(line)))?;

    let pipe = line[colon + 1..]
        .iter()
        .position(|&b| b == b'|')
        .map(|p| colon + 1 + p)
        .ok_or_else(|| Rejection::MissingPipe(lossy(line)))?;

    let type_end = line[pipe + 1..]
        .iter()
        .position(|&b| b == b'|')
        .map_or(line.len(), |p| pipe + 1 + p);

    let code_len = type_end - pipe - 1;
    if !(1..=2).contains(&code_len) {
        return Err(Rejection::BadTypeCode {
            code: lossy(&line[pipe + 1..type_end]),
            line: lossy(line),
        });
    }

    Ok(Line {
        raw: line,
        colon,
        pipe,
        type_end,
    })
}

/// Strips one trailing `\n` or `\r\n`.
pub fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
