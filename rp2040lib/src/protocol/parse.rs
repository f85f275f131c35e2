use std::ops::Range;

use super::{Marker, Opcode, HEADER_LEN};

/// Why a frame candidate was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Desync {
    /// The header opcode byte is not a known opcode.
    UnknownOpcode(u8),
    /// The header length exceeds the sanity ceiling.
    Oversize(usize),
    /// The byte after the payload was not the stop marker.
    BadTerminator(u8),
    /// The accumulator had no room for incoming data.
    Overflow,
}

impl core::fmt::Display for Desync {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::UnknownOpcode(b) => write!(f, "unknown opcode {:#04x}", b),
            Self::Oversize(len) => write!(f, "unreasonable payload length {}", len),
            Self::BadTerminator(b) => write!(f, "expected stop marker, found {:#04x}", b),
            Self::Overflow => write!(f, "accumulator overflow"),
        }
    }
}

/// A possible result from [frame_raw()].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameResult<'a> {
    /// Range for the full frame, its opcode and payload.
    Ok(Range<usize>, Opcode, &'a [u8]),
    /// A start marker led to a corrupt frame. Carries the offset of that
    /// start marker.
    Desync(usize, Desync),
    /// Only non-frame input was consumed, or more data is needed.
    None,
}

impl<'a> FrameResult<'a> {
    pub fn ok(self) -> Option<(Opcode, &'a [u8])> {
        match self {
            Self::Ok(_, opcode, payload) => Some((opcode, payload)),
            Self::Desync(_, _) => None,
            Self::None => None,
        }
    }

    pub fn range(&self) -> Option<&Range<usize>> {
        match self {
            Self::Ok(r, _, _) => Some(r),
            Self::Desync(_, _) => None,
            Self::None => None,
        }
    }
}

fn find_start(input: &[u8], from: usize) -> Option<usize> {
    input
        .get(from..)?
        .iter()
        .position(|b| *b == Marker::Start.byte())
        .map(|i| i + from)
}

/// Find a frame in the input.
///
/// Returns the number of bytes the caller should drop from the front of
/// `input`, and what was found:
///
///  * no start marker anywhere: everything is consumed, [FrameResult::None].
///  * a start marker, but not enough data yet: consume up to the start
///    marker, [FrameResult::None].
///  * a bad header or terminator: consume up to the *next* start marker
///    after the bad one (or everything), [FrameResult::Desync].
///  * a full frame: consume through its stop marker, [FrameResult::Ok].
///
/// There is no checksum. Payload bytes are not escaped, so only the
/// declared length decides where a frame ends.
pub fn frame_raw(input: &[u8], max_payload: usize) -> (usize, FrameResult<'_>) {
    let Some(start) = find_start(input, 0) else {
        // there is no start marker, anywhere
        return (input.len(), FrameResult::None);
    };

    // where to resume if this start marker turns out to be a false one
    let resync = || find_start(input, start + 1).unwrap_or(input.len());

    let Some(header) = input.get(start..start + HEADER_LEN) else {
        // not enough data yet, consume up to the start marker
        return (start, FrameResult::None);
    };

    let Some(opcode) = Opcode::from_byte(header[1]) else {
        return (resync(), FrameResult::Desync(start, Desync::UnknownOpcode(header[1])));
    };

    let length = u16::from_le_bytes([header[2], header[3]]) as usize;
    if length > max_payload {
        return (resync(), FrameResult::Desync(start, Desync::Oversize(length)));
    }

    let body_start = start + HEADER_LEN;
    let stop = body_start + length;
    let Some(&terminator) = input.get(stop) else {
        // not enough data yet, consume up to the start marker
        return (start, FrameResult::None);
    };

    if terminator != Marker::Stop.byte() {
        return (resync(), FrameResult::Desync(start, Desync::BadTerminator(terminator)));
    }

    (
        stop + 1,
        FrameResult::Ok(start..stop + 1, opcode, &input[body_start..stop]),
    )
}

#[cfg(test)]
mod test {
    use super::super::MAX_PAYLOAD;
    use super::*;

    fn frame(input: &[u8]) -> (usize, FrameResult<'_>) {
        frame_raw(input, MAX_PAYLOAD)
    }

    #[test]
    fn frame_raw_empty() {
        assert_eq!(frame(b""), (0, FrameResult::None));
    }

    #[test]
    fn frame_raw_discard_garbage() {
        assert_eq!(frame(b"abcdef"), (6, FrameResult::None));
    }

    #[test]
    fn frame_raw_incomplete_start_imm() {
        assert_eq!(frame(b"\xfe"), (0, FrameResult::None));
    }

    #[test]
    fn frame_raw_incomplete_header() {
        assert_eq!(frame(b"abc\xfe\x03\x02"), (3, FrameResult::None));
    }

    #[test]
    fn frame_raw_incomplete_body() {
        assert_eq!(frame(b"abc\xfe\x03\x03\x00fo"), (3, FrameResult::None));
    }

    #[test]
    fn frame_raw_missing_terminator() {
        assert_eq!(frame(b"\xfe\x03\x03\x00foo"), (0, FrameResult::None));
    }

    #[test]
    fn frame_raw_complete_imm() {
        assert_eq!(
            frame(b"\xfe\x03\x03\x00foo\xffafter"),
            (8, FrameResult::Ok(0..8, Opcode::GetState, b"foo".as_ref()))
        );
    }

    #[test]
    fn frame_raw_complete() {
        assert_eq!(
            frame(b"abc\xfe\x00\x03\x00foo\xffafter"),
            (11, FrameResult::Ok(3..11, Opcode::GetLog, b"foo".as_ref()))
        );
    }

    #[test]
    fn frame_raw_empty_payload() {
        assert_eq!(
            frame(b"\xfe\xfd\x00\x00\xff"),
            (5, FrameResult::Ok(0..5, Opcode::Ack, b"".as_ref()))
        );
    }

    #[test]
    fn frame_raw_payload_contains_markers() {
        // length decides, not marker bytes inside the payload
        assert_eq!(
            frame(b"\xfe\x03\x02\x00\xff\xfe\xff"),
            (
                7,
                FrameResult::Ok(0..7, Opcode::GetState, b"\xff\xfe".as_ref())
            )
        );
    }

    #[test]
    fn frame_raw_bad_terminator() {
        assert_eq!(
            frame(b"abc\xfe\x03\x03\x00foo\x00\xfe\x03"),
            (11, FrameResult::Desync(3, Desync::BadTerminator(0x00)))
        );
    }

    #[test]
    fn frame_raw_bad_terminator_no_next_start() {
        assert_eq!(
            frame(b"\xfe\x03\x03\x00foo\x00zz"),
            (10, FrameResult::Desync(0, Desync::BadTerminator(0x00)))
        );
    }

    #[test]
    fn frame_raw_oversize() {
        assert_eq!(
            frame(b"\xfe\x03\x01\x08junk"),
            (8, FrameResult::Desync(0, Desync::Oversize(0x0801)))
        );
    }

    #[test]
    fn frame_raw_marker_as_opcode() {
        assert_eq!(
            frame(b"\xfe\xfe\x00\x00\xff"),
            (1, FrameResult::Desync(0, Desync::UnknownOpcode(0xfe)))
        );
    }

    #[test]
    fn frame_raw_unknown_opcode() {
        assert_eq!(
            frame(b"x\xfe\x42\x00\x00\xff"),
            (6, FrameResult::Desync(1, Desync::UnknownOpcode(0x42)))
        );
    }

    #[test]
    fn frame_raw_custom_ceiling() {
        assert_eq!(
            frame_raw(b"\xfe\x03\x05\x00", 4),
            (4, FrameResult::Desync(0, Desync::Oversize(5)))
        );
    }
}
