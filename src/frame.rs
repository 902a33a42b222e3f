/// Wire framing: preamble byte, varint payload length, varint message type,
/// payload. Tolerant of partial reads — the caller is expected to keep
/// buffering until a complete frame is available (see `session::worker`).
use crate::codec::{Reader, write_varint};
use crate::error::{CodecError, FrameError};

pub const PREAMBLE: u8 = 0x00;

/// Encodes `payload` as a complete frame for `message_type`.
pub fn encode_frame(message_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.push(PREAMBLE);
    write_varint(&mut out, payload.len() as u64);
    write_varint(&mut out, message_type as u64);
    out.extend_from_slice(payload);
    out
}

/// A frame header successfully parsed out of a buffer prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u32,
    pub payload_len: usize,
    /// Offset into the source buffer where the payload begins.
    pub payload_start: usize,
}

/// Attempts to decode one frame header from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds a valid-so-far but incomplete prefix
/// (not enough bytes yet for the header) — this is not an error, the caller
/// should wait for more bytes. Returns `Err` for a malformed preamble or a
/// varint that overflows.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != PREAMBLE {
        return Err(FrameError::InvalidPreamble);
    }

    let mut r = Reader::new(&buf[1..]);
    let payload_len = match r.read_varint() {
        Ok(v) => v as usize,
        Err(CodecError::Truncated) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let message_type = match r.read_varint() {
        Ok(v) => v as u32,
        Err(CodecError::Truncated) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // r's position is relative to buf[1..]; translate back to an absolute offset.
    let header_len = 1 + (buf[1..].len() - r.remaining());
    Ok(Some(FrameHeader {
        message_type,
        payload_len,
        payload_start: header_len,
    }))
}

/// A decoded frame: message type and a borrowed view of its payload.
pub struct Frame<'a> {
    pub message_type: u32,
    pub payload: &'a [u8],
    /// Total bytes consumed from the source buffer, including the header.
    pub consumed: usize,
}

/// Decodes one complete frame from the head of `buf`, if present.
///
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame (caller
/// should read more bytes and retry). The caller is responsible for checking
/// that `payload_start + payload_len` does not exceed `buf.len()` before
/// treating the frame as ready — this function performs that check itself.
pub fn decode_frame(buf: &[u8]) -> Result<Option<Frame<'_>>, FrameError> {
    let header = match decode_header(buf)? {
        Some(h) => h,
        None => return Ok(None),
    };
    let end = header.payload_start + header.payload_len;
    if end > buf.len() {
        return Ok(None);
    }
    Ok(Some(Frame {
        message_type: header.message_type,
        payload: &buf[header.payload_start..end],
        consumed: end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let payload = b"hello world";
        let framed = encode_frame(9, payload);
        let frame = decode_frame(&framed).unwrap().unwrap();
        assert_eq!(frame.message_type, 9);
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.consumed, framed.len());
    }

    #[test]
    fn encode_then_decode_empty_payload() {
        let framed = encode_frame(7, &[]);
        let frame = decode_frame(&framed).unwrap().unwrap();
        assert_eq!(frame.message_type, 7);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn decode_rejects_bad_preamble() {
        let buf = [0x01, 0x00, 0x01];
        assert_eq!(decode_header(&buf), Err(FrameError::InvalidPreamble));
    }

    #[test]
    fn decode_partial_header_is_none_not_error() {
        // Preamble only, no length varint yet.
        let buf = [0x00];
        assert_eq!(decode_header(&buf), Ok(None));
    }

    #[test]
    fn decode_rejects_overflowing_length_varint() {
        // Preamble followed by 10 continuation bytes: a malformed length
        // varint, not merely an incomplete one, so this must error rather
        // than be treated as "need more bytes".
        let mut buf = vec![0x00];
        buf.extend(std::iter::repeat(0xFF).take(10));
        assert_eq!(decode_header(&buf), Err(FrameError::Codec(CodecError::VarintOverflow)));
    }

    #[test]
    fn decode_partial_payload_is_none() {
        let framed = encode_frame(9, b"hello world");
        let partial = &framed[..framed.len() - 3];
        assert!(decode_frame(partial).unwrap().is_none());
    }

    #[test]
    fn decode_consumes_exact_byte_count() {
        let payload = vec![0xAB; 300];
        let framed = encode_frame(5, &payload);
        let mut expected_len = 1; // preamble
        {
            let mut v = payload.len() as u64;
            loop {
                expected_len += 1;
                v >>= 7;
                if v == 0 {
                    break;
                }
            }
        }
        expected_len += 1; // message type 5 fits in one varint byte
        expected_len += payload.len();
        assert_eq!(framed.len(), expected_len);

        let frame = decode_frame(&framed).unwrap().unwrap();
        assert_eq!(frame.consumed, framed.len());
    }

    #[test]
    fn trailing_bytes_after_one_frame_are_not_consumed() {
        let mut buf = encode_frame(1, b"first");
        let second = encode_frame(2, b"second");
        buf.extend_from_slice(&second);

        let frame = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.message_type, 1);
        assert_eq!(frame.payload, b"first");
        assert_eq!(frame.consumed, buf.len() - second.len());
    }
}
