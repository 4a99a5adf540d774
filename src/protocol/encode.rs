//! Protocol message encoding

use super::constants::{prefix, CRLF};
use super::message::{Command, Frame};
use bytes::{BufMut, BytesMut};

/// Encode a command as an array of bulk strings
pub fn encode_command(cmd: &Command) -> BytesMut {
    let parts = cmd.parts();
    let mut buf = BytesMut::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());

    put_header(&mut buf, prefix::ARRAY, parts.len() as i64);
    for part in parts {
        put_header(&mut buf, prefix::BULK_STRING, part.len() as i64);
        buf.put_slice(part);
        buf.put_slice(CRLF);
    }

    buf
}

/// Encode any frame
///
/// Clients only ever send commands; this is used by servers and test doubles.
pub fn encode_frame(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    put_frame(&mut buf, frame);
    buf
}

fn put_frame(buf: &mut BytesMut, frame: &Frame) {
    match frame {
        Frame::Simple(s) => put_line(buf, prefix::SIMPLE_STRING, s),
        Frame::Error(e) => put_line(buf, prefix::ERROR, e),
        Frame::Integer(n) => put_header(buf, prefix::INTEGER, *n),
        Frame::Bulk(data) => {
            put_header(buf, prefix::BULK_STRING, data.len() as i64);
            buf.put_slice(data);
            buf.put_slice(CRLF);
        }
        Frame::Null => put_header(buf, prefix::BULK_STRING, -1),
        Frame::Array(items) => {
            put_header(buf, prefix::ARRAY, items.len() as i64);
            for item in items {
                put_frame(buf, item);
            }
        }
        Frame::NullArray => put_header(buf, prefix::ARRAY, -1),
    }
}

fn put_header(buf: &mut BytesMut, tag: u8, n: i64) {
    buf.put_u8(tag);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

// Simple strings and errors cannot carry CR or LF
fn put_line(buf: &mut BytesMut, tag: u8, line: &str) {
    buf.put_u8(tag);
    for b in line.bytes() {
        buf.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
    }
    buf.put_slice(CRLF);
}
