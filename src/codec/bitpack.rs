//! Bitpacking
//!
//! Packs each value as `value - min` in the minimum number of bits for the
//! observed range, LSB-first. Effective for integer columns with a bounded
//! range regardless of order.
//!
//! Frame: `bit_width: u8, num_values: u32 LE, min_value: i64 LE` (13 bytes),
//! then `num_values * bit_width` bits.

use crate::error::{Error, ErrorCode, Result};

/// Header size: width (1) + count (4) + min (8)
const HEADER_SIZE: usize = 13;

/// Encode an integer sequence
pub fn encode(values: &[i64]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let min = *values.iter().min().unwrap();
    let max = *values.iter().max().unwrap();
    let range = max.wrapping_sub(min) as u64;
    let width = bit_width(range);

    let data_bytes = (values.len() * width as usize + 7) / 8;
    let mut out = vec![0u8; HEADER_SIZE + data_bytes];
    out[0] = width;
    out[1..5].copy_from_slice(&(values.len() as u32).to_le_bytes());
    out[5..13].copy_from_slice(&min.to_le_bytes());

    let body = &mut out[HEADER_SIZE..];
    let mut bit_offset = 0usize;
    for &v in values {
        let delta = v.wrapping_sub(min) as u64;
        write_bits(body, bit_offset, delta, width);
        bit_offset += width as usize;
    }
    Ok(out)
}

/// Decode a bitpacked frame back to the original sequence
pub fn decode(data: &[u8]) -> Result<Vec<i64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < HEADER_SIZE {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            "bitpack frame shorter than header",
        ));
    }
    let width = data[0];
    if width == 0 || width > 64 {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            format!("bit width {} outside [1,64]", width),
        ));
    }
    let count = u32::from_le_bytes(data[1..5].try_into().unwrap()) as usize;
    let min = i64::from_le_bytes(data[5..13].try_into().unwrap());

    let needed = HEADER_SIZE + (count * width as usize + 7) / 8;
    if data.len() < needed {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            "bitpack frame body truncated",
        ));
    }

    let body = &data[HEADER_SIZE..];
    let mut out = Vec::with_capacity(count);
    let mut bit_offset = 0usize;
    for _ in 0..count {
        let delta = read_bits(body, bit_offset, width);
        out.push(min.wrapping_add(delta as i64));
        bit_offset += width as usize;
    }
    Ok(out)
}

/// Bits needed to represent values in [0, range], clamped to [1, 64]
pub fn bit_width(range: u64) -> u8 {
    if range == 0 {
        return 1;
    }
    (64 - range.leading_zeros()) as u8
}

/// Estimated compression ratio from the value range
pub fn estimate_ratio(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let min = *values.iter().min().unwrap();
    let max = *values.iter().max().unwrap();
    let width = bit_width(max.wrapping_sub(min) as u64);

    let original = values.len() * 8;
    let compressed = HEADER_SIZE + (values.len() * width as usize + 7) / 8;
    (compressed as f64 / original as f64).min(1.5)
}

fn write_bits(buffer: &mut [u8], bit_offset: usize, value: u64, width: u8) {
    for i in 0..width as usize {
        if (value >> i) & 1 == 1 {
            let pos = bit_offset + i;
            buffer[pos / 8] |= 1 << (pos % 8);
        }
    }
}

fn read_bits(buffer: &[u8], bit_offset: usize, width: u8) -> u64 {
    let mut value = 0u64;
    for i in 0..width as usize {
        let pos = bit_offset + i;
        let bit = (buffer[pos / 8] >> (pos % 8)) & 1;
        value |= (bit as u64) << i;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 1);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(7), 3);
        assert_eq!(bit_width(8), 4);
        assert_eq!(bit_width(15), 4);
        assert_eq!(bit_width(u64::MAX), 64);
    }

    #[test]
    fn test_roundtrip_small_range() {
        let values: Vec<i64> = (0..1024).map(|i| i % 16).collect();
        let encoded = encode(&values).unwrap();
        // 4 bits per value: 1024 * 4 / 8 = 512 bytes + header.
        assert_eq!(encoded.len(), HEADER_SIZE + 512);
        assert_eq!(encoded[0], 4);
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_roundtrip_negative_values() {
        let values = vec![-500i64, -400, -450, -300, -499];
        let encoded = encode(&values).unwrap();
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_roundtrip_full_width() {
        let values = vec![i64::MIN, i64::MAX, 0];
        let encoded = encode(&values).unwrap();
        assert_eq!(encoded[0], 64);
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_constant_column_single_bit() {
        let values = vec![9i64; 64];
        let encoded = encode(&values).unwrap();
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded.len(), HEADER_SIZE + 8);
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_invalid_width_rejected() {
        let values = vec![1i64, 2, 3];
        let mut encoded = encode(&values).unwrap();
        encoded[0] = 0;
        assert_eq!(decode(&encoded).unwrap_err().code(), ErrorCode::InvalidFrame);
        encoded[0] = 65;
        assert_eq!(decode(&encoded).unwrap_err().code(), ErrorCode::InvalidFrame);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let values: Vec<i64> = (0..100).collect();
        let encoded = encode(&values).unwrap();
        let err = decode(&encoded[..encoded.len() - 2]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFrame);
    }
}
