//! Order-preserving integer codec for persistent keys.
//!
//! Encodes a u64 as a one-byte length tag (the number of significant
//! big-endian bytes, 0..=8) followed by exactly those bytes. Because a
//! shorter encoding always begins with a smaller tag and equal-length
//! encodings compare big-endian, byte-lexicographic order of two encoded
//! values equals their numeric order. The encoding is canonical: a
//! non-zero payload never starts with a zero byte, and decode rejects
//! anything else as corrupt.
//!
//! Stored values use bincode; this codec is for keys only, where raw byte
//! comparison must match logical comparison.

use crate::error::CodecError;

/// Append the order-preserving encoding of `v` to `buf`.
pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    let n = 8 - (v.leading_zeros() / 8) as usize;
    buf.push(n as u8);
    buf.extend_from_slice(&v.to_be_bytes()[8 - n..]);
}

/// Encoded length of `v`, including the tag byte.
pub fn encoded_len_u64(v: u64) -> usize {
    1 + 8 - (v.leading_zeros() / 8) as usize
}

/// Decode one u64 from the front of `input`, returning the value and the
/// remaining bytes.
pub fn take_u64(input: &[u8]) -> Result<(u64, &[u8]), CodecError> {
    let (&tag, rest) = input
        .split_first()
        .ok_or(CodecError::Truncated { expected: 1, have: 0 })?;
    let n = tag as usize;
    if n > 8 {
        return Err(CodecError::Corrupt(format!("length tag {tag} out of range")));
    }
    if rest.len() < n {
        return Err(CodecError::Truncated { expected: n, have: rest.len() });
    }
    let mut bytes = [0u8; 8];
    bytes[8 - n..].copy_from_slice(&rest[..n]);
    if n > 0 && bytes[8 - n] == 0 {
        return Err(CodecError::Corrupt("non-canonical leading zero".into()));
    }
    Ok((u64::from_be_bytes(bytes), &rest[n..]))
}

/// Decode exactly one u64, rejecting trailing bytes.
pub fn decode_u64(input: &[u8]) -> Result<u64, CodecError> {
    let (v, rest) = take_u64(input)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(v: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u64(&mut buf, v);
        buf
    }

    #[test]
    fn zero_is_a_single_tag_byte() {
        assert_eq!(encode(0), vec![0]);
    }

    #[test]
    fn small_values_encode_compactly() {
        assert_eq!(encode(1), vec![1, 1]);
        assert_eq!(encode(0xFF), vec![1, 0xFF]);
        assert_eq!(encode(0x100), vec![2, 1, 0]);
    }

    #[test]
    fn max_value_uses_nine_bytes() {
        let e = encode(u64::MAX);
        assert_eq!(e.len(), 9);
        assert_eq!(e[0], 8);
    }

    #[test]
    fn round_trip_boundaries() {
        for v in [0, 1, 0xFF, 0x100, 0xFFFF, 0x1_0000, u64::MAX - 1, u64::MAX] {
            assert_eq!(decode_u64(&encode(v)).unwrap(), v);
        }
    }

    #[test]
    fn take_returns_remainder() {
        let mut buf = encode(7);
        buf.extend_from_slice(b"tail");
        let (v, rest) = take_u64(&buf).unwrap();
        assert_eq!(v, 7);
        assert_eq!(rest, b"tail");
    }

    #[test]
    fn rejects_oversized_tag() {
        assert!(matches!(take_u64(&[9, 0]), Err(CodecError::Corrupt(_))));
    }

    #[test]
    fn rejects_truncated_payload() {
        assert!(matches!(
            take_u64(&[4, 1, 2]),
            Err(CodecError::Truncated { expected: 4, have: 2 })
        ));
    }

    #[test]
    fn rejects_non_canonical_leading_zero() {
        assert!(matches!(take_u64(&[2, 0, 5]), Err(CodecError::Corrupt(_))));
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert!(matches!(decode_u64(&[1, 1, 1]), Err(CodecError::TrailingBytes)));
    }

    proptest! {
        #[test]
        fn round_trip(v in any::<u64>()) {
            prop_assert_eq!(decode_u64(&encode(v)).unwrap(), v);
        }

        #[test]
        fn byte_order_matches_numeric_order(a in any::<u64>(), b in any::<u64>()) {
            let (ea, eb) = (encode(a), encode(b));
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn encoded_len_is_consistent(v in any::<u64>()) {
            prop_assert_eq!(encode(v).len(), encoded_len_u64(v));
        }
    }
}
