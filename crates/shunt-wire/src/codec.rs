//! On-wire integer and string codecs for the classic protocol.
//!
//! These are consumed by real MySQL servers and clients; layouts are
//! bit-exact. Integers are little-endian throughout.

use bytes::{Buf, BufMut};

use crate::error::{WireError, WireResult};

/// Append a fixed-width little-endian unsigned integer.
///
/// Valid widths are 1, 2, 3, 4, and 8 bytes.
pub fn put_fixed_le(out: &mut Vec<u8>, value: u64, width: usize) {
    debug_assert!(matches!(width, 1..=4 | 8));
    out.put_uint_le(value, width);
}

/// Read a fixed-width little-endian unsigned integer from the front
/// of `input`.
pub fn get_fixed_le(input: &[u8], width: usize) -> WireResult<u64> {
    debug_assert!(matches!(width, 1..=4 | 8));
    if input.len() < width {
        return Err(WireError::Truncated);
    }
    let mut head = &input[..width];
    Ok(head.get_uint_le(width))
}

/// Append a length-encoded unsigned integer.
///
/// Values below 0xFB are inline; larger values take a `0xFC`/`0xFD`/
/// `0xFE` prefix followed by a 2-, 3-, or 8-byte little-endian body.
pub fn put_lenenc_uint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xFA => out.put_u8(value as u8),
        0xFB..=0xFFFF => {
            out.put_u8(0xFC);
            out.put_u16_le(value as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            out.put_u8(0xFD);
            out.put_uint_le(value, 3);
        }
        _ => {
            out.put_u8(0xFE);
            out.put_u64_le(value);
        }
    }
}

/// Read a length-encoded unsigned integer; returns the value and the
/// number of bytes consumed.
pub fn get_lenenc_uint(input: &[u8]) -> WireResult<(u64, usize)> {
    let first = *input.first().ok_or(WireError::Truncated)?;
    match first {
        0..=0xFA => Ok((u64::from(first), 1)),
        0xFC => Ok((get_fixed_le(&input[1..], 2)?, 3)),
        0xFD => Ok((get_fixed_le(&input[1..], 3)?, 4)),
        0xFE => Ok((get_fixed_le(&input[1..], 8)?, 9)),
        _ => Err(WireError::BadPacket(
            "invalid length-encoded integer prefix".to_string(),
        )),
    }
}

/// Append a null-terminated string.
pub fn put_nul_str(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    out.put_u8(0);
}

/// Read a null-terminated byte string; returns the bytes before the
/// terminator and the number of bytes consumed including it.
pub fn get_nul_str(input: &[u8]) -> WireResult<(&[u8], usize)> {
    let end = input
        .iter()
        .position(|b| *b == 0)
        .ok_or(WireError::Truncated)?;
    Ok((&input[..end], end + 1))
}

/// Append length-encoded bytes: a length-encoded count followed by
/// the bytes themselves.
pub fn put_lenenc_bytes(out: &mut Vec<u8>, value: &[u8]) {
    put_lenenc_uint(out, value.len() as u64);
    out.extend_from_slice(value);
}

/// Read length-encoded bytes; returns the bytes and the total number
/// of bytes consumed.
pub fn get_lenenc_bytes(input: &[u8]) -> WireResult<(&[u8], usize)> {
    let (len, header) = get_lenenc_uint(input)?;
    let len = usize::try_from(len).map_err(|_| WireError::Truncated)?;
    let end = header.checked_add(len).ok_or(WireError::Truncated)?;
    if input.len() < end {
        return Err(WireError::Truncated);
    }
    Ok((&input[header..end], end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_le_round_trips_every_width() {
        for (value, width) in [
            (0u64, 1),
            (0xFF, 1),
            (0x1234, 2),
            (0xABCDEF, 3),
            (0xDEADBEEF, 4),
            (u64::MAX, 8),
        ] {
            let mut buf = Vec::new();
            put_fixed_le(&mut buf, value, width);
            assert_eq!(buf.len(), width);
            assert_eq!(get_fixed_le(&buf, width).unwrap(), value);
        }
    }

    #[test]
    fn fixed_le_is_little_endian() {
        let mut buf = Vec::new();
        put_fixed_le(&mut buf, 0x0102_03, 3);
        assert_eq!(buf, [0x03, 0x02, 0x01]);
    }

    #[test]
    fn fixed_le_truncated_input() {
        assert_eq!(get_fixed_le(&[0x01], 2), Err(WireError::Truncated));
    }

    #[test]
    fn lenenc_uint_boundaries() {
        for (value, encoded_len) in [
            (0u64, 1),
            (0xFA, 1),
            (0xFB, 3),
            (0xFFFF, 3),
            (0x1_0000, 4),
            (0xFF_FFFF, 4),
            (0x100_0000, 9),
            (u64::MAX, 9),
        ] {
            let mut buf = Vec::new();
            put_lenenc_uint(&mut buf, value);
            assert_eq!(buf.len(), encoded_len, "value {value:#x}");
            assert_eq!(get_lenenc_uint(&buf).unwrap(), (value, encoded_len));
        }
    }

    #[test]
    fn lenenc_uint_random_round_trips() {
        for _ in 0..1000 {
            let value: u64 = rand::random();
            let mut buf = Vec::new();
            put_lenenc_uint(&mut buf, value);
            assert_eq!(get_lenenc_uint(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn fixed_le_random_round_trips() {
        for width in [1usize, 2, 3, 4, 8] {
            let mask = if width == 8 {
                u64::MAX
            } else {
                (1u64 << (width * 8)) - 1
            };
            for _ in 0..200 {
                let value = rand::random::<u64>() & mask;
                let mut buf = Vec::new();
                put_fixed_le(&mut buf, value, width);
                assert_eq!(get_fixed_le(&buf, width).unwrap(), value);
            }
        }
    }

    #[test]
    fn lenenc_uint_rejects_reserved_prefixes() {
        assert!(get_lenenc_uint(&[0xFB]).is_err());
        assert!(get_lenenc_uint(&[0xFF]).is_err());
        assert_eq!(get_lenenc_uint(&[]), Err(WireError::Truncated));
        assert_eq!(get_lenenc_uint(&[0xFC, 0x01]), Err(WireError::Truncated));
    }

    #[test]
    fn nul_str_round_trips() {
        let mut buf = Vec::new();
        put_nul_str(&mut buf, "mysql_native_password");
        let (bytes, consumed) = get_nul_str(&buf).unwrap();
        assert_eq!(bytes, b"mysql_native_password");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn nul_str_without_terminator_is_truncated() {
        assert_eq!(get_nul_str(b"abc"), Err(WireError::Truncated));
    }

    #[test]
    fn lenenc_bytes_round_trips() {
        let payload = vec![0x42u8; 300];
        let mut buf = Vec::new();
        put_lenenc_bytes(&mut buf, &payload);
        // 300 needs the 0xFC two-byte length form.
        assert_eq!(buf[0], 0xFC);
        let (bytes, consumed) = get_lenenc_bytes(&buf).unwrap();
        assert_eq!(bytes, &payload[..]);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn lenenc_bytes_truncated_payload() {
        let mut buf = Vec::new();
        put_lenenc_uint(&mut buf, 10);
        buf.extend_from_slice(&[0u8; 4]);
        assert_eq!(get_lenenc_bytes(&buf), Err(WireError::Truncated));
    }
}
