//! Byte-level encoding helpers for the on-disk index image.
//!
//! Readers consume from a shrinking `&[u8]` cursor; a `None` from any
//! `take_*` function means the image ran out of bytes mid-field, which
//! the caller reports as corruption.

/// Append a u32 as a variable-length integer, 7 bits per byte.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a u64 as a variable-length integer.
pub fn put_varint_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Consume a varint u32 from the front of `input`.
pub fn take_varint(input: &mut &[u8]) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let (&byte, rest) = input.split_first()?;
        *input = rest;
        if shift >= 32 {
            return None;
        }
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}

/// Consume a varint u64 from the front of `input`.
pub fn take_varint_u64(input: &mut &[u8]) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let (&byte, rest) = input.split_first()?;
        *input = rest;
        if shift >= 64 {
            return None;
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
    }
}

pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn take_u16_le(input: &mut &[u8]) -> Option<u16> {
    let (head, rest) = input.split_at_checked(2)?;
    *input = rest;
    Some(u16::from_le_bytes(head.try_into().ok()?))
}

pub fn take_u32_le(input: &mut &[u8]) -> Option<u32> {
    let (head, rest) = input.split_at_checked(4)?;
    *input = rest;
    Some(u32::from_le_bytes(head.try_into().ok()?))
}

/// Consume exactly `len` bytes.
pub fn take_bytes<'a>(input: &mut &'a [u8], len: usize) -> Option<&'a [u8]> {
    let (head, rest) = input.split_at_checked(len)?;
    *input = rest;
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u32, 1, 127, 128, 16383, 16384, u32::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut cursor = buf.as_slice();
            assert_eq!(take_varint(&mut cursor), Some(value));
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_varint_u64_roundtrip() {
        for value in [0u64, 0x80, u32::MAX as u64 + 1, u64::MAX] {
            let mut buf = Vec::new();
            put_varint_u64(&mut buf, value);
            let mut cursor = buf.as_slice();
            assert_eq!(take_varint_u64(&mut cursor), Some(value));
        }
    }

    #[test]
    fn test_truncated_varint_is_none() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 1_000_000);
        buf.pop();
        let mut cursor = buf.as_slice();
        assert_eq!(take_varint(&mut cursor), None);
    }

    #[test]
    fn test_fixed_width_roundtrip() {
        let mut buf = Vec::new();
        put_u16_le(&mut buf, 0xBEEF);
        put_u32_le(&mut buf, 0xDEAD_BEEF);
        let mut cursor = buf.as_slice();
        assert_eq!(take_u16_le(&mut cursor), Some(0xBEEF));
        assert_eq!(take_u32_le(&mut cursor), Some(0xDEAD_BEEF));
        assert_eq!(take_u32_le(&mut cursor), None);
    }
}
