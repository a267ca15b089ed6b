//! Byte framing: ASCII decimal length, newline, then exactly that many
//! payload bytes. Both directions use the same framing.

use std::io::{self, BufRead, Read, Write};

/// Upper bound on a single frame's payload. A peer announcing more than
/// this is broken or hostile; the read fails rather than allocating.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Longest accepted length prefix (MAX_FRAME_LEN has 7 digits; leave slack).
const MAX_PREFIX_DIGITS: usize = 12;

/// Writes one frame and flushes.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    write!(writer, "{}\n", payload.len())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one frame, enforcing [`MAX_FRAME_LEN`].
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(MAX_PREFIX_DIGITS);
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        match byte[0] {
            b'\n' => break,
            b'0'..=b'9' => {
                if prefix.len() >= MAX_PREFIX_DIGITS {
                    return Err(invalid("frame length prefix too long"));
                }
                prefix.push(byte[0]);
            }
            other => {
                return Err(invalid(format!(
                    "unexpected byte 0x{other:02x} in frame length prefix"
                )));
            }
        }
    }
    if prefix.is_empty() {
        return Err(invalid("empty frame length prefix"));
    }

    let text = std::str::from_utf8(&prefix).expect("prefix bytes are ASCII digits");
    let len: usize = text
        .parse()
        .map_err(|_| invalid("unparseable frame length prefix"))?;
    if len > MAX_FRAME_LEN {
        return Err(invalid(format!("frame length {len} exceeds limit")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"{\"command\":\"PING\"}").unwrap();
        let mut cursor = Cursor::new(buffer);
        let payload = read_frame(&mut cursor).unwrap();
        assert_eq!(payload, b"{\"command\":\"PING\"}");
    }

    #[test]
    fn empty_payload_roundtrips() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"").unwrap();
        let payload = read_frame(&mut Cursor::new(buffer)).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"one").unwrap();
        write_frame(&mut buffer, b"two").unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"one");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"two");
    }

    #[test]
    fn rejects_non_digit_prefix() {
        let err = read_frame(&mut Cursor::new(b"abc\nxyz".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_oversized_length() {
        let frame = format!("{}\n", MAX_FRAME_LEN + 1);
        let err = read_frame(&mut Cursor::new(frame.into_bytes())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let err = read_frame(&mut Cursor::new(b"10\nshort".to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
