//! Wire framing: a 4-byte big-endian length prefix followed by that many
//! bytes of command payload (spec §4.1, §6.1).

use crate::error::CodecError;

/// Refuse to allocate for a frame larger than this many bytes. Well above
/// any legitimate command, but bounds a hostile or corrupt length prefix.
pub const MAX_FRAME_LEN: u32 = 128 * 1024 * 1024;

/// Prefix `payload` with its big-endian length and append to `out`.
pub fn write_frame(out: &mut Vec<u8>, payload: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CodecError::FrameTooLarge { length: u32::MAX, max: MAX_FRAME_LEN })?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { length: len, max: MAX_FRAME_LEN });
    }
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Read a length prefix from a 4-byte header, validating it against
/// [`MAX_FRAME_LEN`]. Callers read exactly this many further bytes before
/// handing the payload to the command marshaller.
pub fn read_length_prefix(header: &[u8; 4]) -> Result<u32, CodecError> {
    let len = u32::from_be_bytes(*header);
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge { length: len, max: MAX_FRAME_LEN });
    }
    Ok(len)
}

/// Split a buffer holding a length prefix and payload back apart, checking
/// that the payload is exactly as long as advertised. Used by tests and by
/// transports that buffer a whole frame before decoding.
pub fn split_frame(buf: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    let header: [u8; 4] = buf
        .get(..4)
        .ok_or(CodecError::Truncated { expected: 4, actual: buf.len() })?
        .try_into()
        .expect("checked length 4");
    let len = read_length_prefix(&header)? as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(CodecError::Truncated { expected: len, actual: rest.len() });
    }
    Ok((&rest[..len], &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        let (payload, rest) = split_frame(&buf).unwrap();
        assert_eq!(payload, b"hello");
        assert!(rest.is_empty());
    }

    #[test]
    fn empty_payload_frames_to_just_a_length_prefix() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_allocating() {
        let header = (MAX_FRAME_LEN + 1).to_be_bytes();
        assert!(matches!(
            read_length_prefix(&header),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn truncated_payload_is_reported_with_expected_and_actual_lengths() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            split_frame(&buf),
            Err(CodecError::Truncated { expected: 11, actual: 8 })
        ));
    }

    #[test]
    fn buffer_shorter_than_length_header_is_truncated_not_a_panic() {
        assert!(matches!(split_frame(&[0, 0]), Err(CodecError::Truncated { expected: 4, actual: 2 })));
    }
}
