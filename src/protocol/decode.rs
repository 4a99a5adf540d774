//! Protocol message decoding

use super::constants::{prefix, MAX_ARRAY_LENGTH, MAX_BULK_LENGTH, MAX_LINE_LENGTH, MAX_NESTING_DEPTH};
use super::message::Frame;
use bytes::Bytes;
use std::io;

/// Decode one frame from the front of a buffer without consuming it
///
/// The caller advances its buffer by the returned byte count.
///
/// # Returns
/// `Ok((frame, consumed))` - Frame and number of bytes it occupied
/// `Err(e)` with [`io::ErrorKind::UnexpectedEof`] - frame is incomplete, read more
/// `Err(e)` with any other kind - input is malformed
pub fn decode_frame(data: &[u8]) -> io::Result<(Frame, usize)> {
    decode_at(data, 0, 0)
}

/// Check whether an error only means "need more bytes"
pub fn is_incomplete(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}

/// Locates the end of the next frame as bytes arrive
///
/// Retrying [`decode_frame`] after every read re-parses a large array from its
/// first element each time. The scanner keeps its position between calls, so
/// each byte is examined once; decode the frame when `scan` reports its length.
#[derive(Debug, Default)]
pub struct FrameScanner {
    offset: usize,
    // Items still expected by each open array, innermost last
    pending: Vec<usize>,
}

impl FrameScanner {
    /// Create a scanner positioned at the start of a frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue scanning `data`, which must start with the same frame and only
    /// ever grow between calls
    ///
    /// Returns `Ok(Some(len))` once the frame occupying `data[..len]` is
    /// complete and resets for the next frame, `Ok(None)` if more bytes are
    /// needed, and `Err` for malformed input.
    pub fn scan(&mut self, data: &[u8]) -> io::Result<Option<usize>> {
        loop {
            if self.pending.len() > MAX_NESTING_DEPTH {
                return Err(invalid(format!(
                    "array nesting exceeds maximum depth {}",
                    MAX_NESTING_DEPTH
                )));
            }

            let (children, end) = match scan_header(data, self.offset) {
                Ok(found) => found,
                Err(e) if is_incomplete(&e) => return Ok(None),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            self.offset = end;

            if children > 0 {
                self.pending.push(children);
                continue;
            }

            // A scalar (or empty array) finished; close every array it completes
            loop {
                match self.pending.last_mut() {
                    None => {
                        let len = self.offset;
                        self.reset();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.pending.pop();
                    }
                }
            }
        }
    }

    /// Forget any partial progress
    pub fn reset(&mut self) {
        self.offset = 0;
        self.pending.clear();
    }
}

// Skip one element header (and a bulk body) at `start`. Returns how many
// child elements follow and where the element's own bytes end.
fn scan_header(data: &[u8], start: usize) -> io::Result<(usize, usize)> {
    let tag = *data.get(start).ok_or_else(|| incomplete("frame tag"))?;
    let (line, after_line) = read_line(data, start + 1)?;

    match tag {
        prefix::SIMPLE_STRING | prefix::ERROR => Ok((0, after_line)),
        prefix::INTEGER => parse_int(line).map(|_| (0, after_line)),
        prefix::BULK_STRING => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok((0, after_line));
            }
            let len = checked_len(len, MAX_BULK_LENGTH, "bulk string")?;
            let body_end = after_line + len;
            if data.len() < body_end + 2 {
                return Err(incomplete("bulk string body"));
            }
            Ok((0, body_end + 2))
        }
        prefix::ARRAY => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok((0, after_line));
            }
            Ok((checked_len(len, MAX_ARRAY_LENGTH, "array")?, after_line))
        }
        other => Err(invalid(format!("unknown frame tag: 0x{:02X}", other))),
    }
}

fn decode_at(data: &[u8], start: usize, depth: usize) -> io::Result<(Frame, usize)> {
    if depth > MAX_NESTING_DEPTH {
        return Err(invalid(format!(
            "array nesting exceeds maximum depth {}",
            MAX_NESTING_DEPTH
        )));
    }

    let tag = *data.get(start).ok_or_else(|| incomplete("frame tag"))?;
    let (line, after_line) = read_line(data, start + 1)?;

    match tag {
        prefix::SIMPLE_STRING => Ok((Frame::Simple(utf8(line)?), after_line - start)),
        prefix::ERROR => Ok((Frame::Error(utf8(line)?), after_line - start)),
        prefix::INTEGER => Ok((Frame::Integer(parse_int(line)?), after_line - start)),
        prefix::BULK_STRING => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok((Frame::Null, after_line - start));
            }
            let len = checked_len(len, MAX_BULK_LENGTH, "bulk string")?;

            let body_end = after_line + len;
            if data.len() < body_end + 2 {
                return Err(incomplete("bulk string body"));
            }
            if &data[body_end..body_end + 2] != b"\r\n" {
                return Err(invalid("bulk string not terminated by CRLF".into()));
            }
            let body = Bytes::copy_from_slice(&data[after_line..body_end]);
            Ok((Frame::Bulk(body), body_end + 2 - start))
        }
        prefix::ARRAY => {
            let len = parse_int(line)?;
            if len == -1 {
                return Ok((Frame::NullArray, after_line - start));
            }
            let len = checked_len(len, MAX_ARRAY_LENGTH, "array")?;

            let mut items = Vec::with_capacity(len.min(1024));
            let mut offset = after_line;
            for _ in 0..len {
                let (item, consumed) = decode_at(data, offset, depth + 1)?;
                items.push(item);
                offset += consumed;
            }
            Ok((Frame::Array(items), offset - start))
        }
        other => Err(invalid(format!("unknown frame tag: 0x{:02X}", other))),
    }
}

/// Read a CRLF-terminated line starting at `from`
///
/// Returns the line (without CRLF) and the offset just past the CRLF.
fn read_line(data: &[u8], from: usize) -> io::Result<(&[u8], usize)> {
    let rest = data.get(from..).unwrap_or_default();
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            if pos > MAX_LINE_LENGTH {
                return Err(invalid(format!(
                    "line length {} exceeds maximum allowed {}",
                    pos, MAX_LINE_LENGTH
                )));
            }
            Ok((&rest[..pos], from + pos + 2))
        }
        None if rest.len() > MAX_LINE_LENGTH => Err(invalid(format!(
            "line length exceeds maximum allowed {}",
            MAX_LINE_LENGTH
        ))),
        None => Err(incomplete("line terminator")),
    }
}

fn parse_int(line: &[u8]) -> io::Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| invalid(format!("invalid integer: {:?}", String::from_utf8_lossy(line))))
}

fn checked_len(len: i64, max: usize, what: &str) -> io::Result<usize> {
    if len < 0 {
        return Err(invalid(format!("negative {} length: {}", what, len)));
    }
    let len = len as usize;
    if len > max {
        return Err(invalid(format!(
            "{} length {} exceeds maximum allowed {}",
            what, len, max
        )));
    }
    Ok(len)
}

fn utf8(line: &[u8]) -> io::Result<String> {
    String::from_utf8(line.to_vec()).map_err(|e| invalid(format!("invalid UTF-8: {}", e)))
}

fn incomplete(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("incomplete {}", what))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
