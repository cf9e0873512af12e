//! # Part Framing
//!
//! A message is a run of length-prefixed parts closed by a zero length.
//! Anything after the end marker is padding and is never read.

use crate::Error;
use crate::Headers;
use crate::Result;

/// One header-tagged unit of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Part {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Part {
    pub fn new(headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self { headers, body: body.into() }
    }

    /// Writes the header block and body, without the length prefix.
    fn write_block(&self, out: &mut Vec<u8>) -> Result<()> {
        for (name, value) in self.headers.iter() {
            if !valid_name(name) || !valid_value(value) {
                return Err(Error::MalformedHeader(format!("{}: {}", name, value)));
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        Ok(())
    }

    fn read_block(block: &[u8]) -> Result<Self> {
        let mut headers = Headers::new();
        let mut pos = 0;
        loop {
            let Some(end) = find_crlf(&block[pos..]) else {
                let rest = String::from_utf8_lossy(&block[pos..]).into_owned();
                return Err(Error::MalformedHeader(rest));
            };
            let line = &block[pos..pos + end];
            pos += end + 2;
            if line.is_empty() {
                break;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::MalformedHeader(String::from_utf8_lossy(line).into_owned()))?;
            let Some((name, value)) = line.split_once(':') else {
                return Err(Error::MalformedHeader(line.to_string()));
            };
            if !valid_name(name) {
                return Err(Error::MalformedHeader(line.to_string()));
            }
            headers.set(name, value.trim_start());
        }
        Ok(Self { headers, body: block[pos..].to_vec() })
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

fn valid_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n')
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

// ============================================================================
//  ENCODER
// ============================================================================

/// Accumulates parts into one message.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part(&mut self, part: &Part) -> Result<()> {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0; 4]);
        part.write_block(&mut self.buf)?;
        let len = self.buf.len() - start - 4;
        // Never zero: a block always holds at least the blank line.
        let len32 = u32::try_from(len).map_err(|_| Error::TooLarge(len))?;
        self.buf[start..start + 4].copy_from_slice(&len32.to_le_bytes());
        Ok(())
    }

    /// Appends the end marker and yields the message bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.buf
    }
}

// ============================================================================
//  DECODER
// ============================================================================

/// Bounds-checked reader over a message.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, done: false }
    }

    /// Reads the next part; `None` once the end marker has been consumed.
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        if self.done {
            return Ok(None);
        }
        let len = self.read_len()?;
        if len == 0 {
            self.done = true;
            return Ok(None);
        }
        let have = self.buf.len() - self.pos;
        if len > have {
            return Err(Error::Truncated { need: len, have });
        }
        let block = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Part::read_block(block).map(Some)
    }

    /// Bytes after the end marker, or not yet read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_len(&mut self) -> Result<usize> {
        let have = self.buf.len() - self.pos;
        if have == 0 {
            return Err(Error::MissingTerminator);
        }
        if have < 4 {
            return Err(Error::Truncated { need: 4, have });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(raw) as usize)
    }
}

/// Encodes a whole message.
pub fn encode_parts<'p>(parts: impl IntoIterator<Item = &'p Part>) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    for part in parts {
        enc.part(part)?;
    }
    Ok(enc.finish())
}

/// Decodes every part up to the end marker, ignoring trailing padding.
pub fn decode_parts(buf: &[u8]) -> Result<Vec<Part>> {
    let mut dec = Decoder::new(buf);
    let mut parts = Vec::new();
    while let Some(part) = dec.next_part()? {
        parts.push(part);
    }
    Ok(parts)
}
