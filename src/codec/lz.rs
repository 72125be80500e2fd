//! General-purpose block codec
//!
//! Brotli-backed fallback for streams no specialized codec handles well.
//! The frame is self-describing. When compression would not shrink the
//! input, `encode` returns the input verbatim and the caller records the
//! page as uncompressed.

use brotli::enc::BrotliEncoderParams;

use crate::error::{Error, ErrorCode, Result};

/// Inputs below this size never shrink enough to pay for the frame
const MIN_INPUT_SIZE: usize = 100;

/// Sampling window for ratio estimation
const SAMPLE_BYTES: usize = 64 * 1024;

fn params() -> BrotliEncoderParams {
    let mut params = BrotliEncoderParams::default();
    params.quality = 5;
    params
}

/// Compress a byte stream; returns the input verbatim when compression
/// would not shrink it.
pub fn encode(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < MIN_INPUT_SIZE {
        return Ok(data.to_vec());
    }
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut reader = data;
    brotli::BrotliCompress(&mut reader, &mut out, &params())
        .map_err(|e| Error::with_message(ErrorCode::Io, e.to_string()))?;
    if out.len() >= data.len() {
        return Ok(data.to_vec());
    }
    Ok(out)
}

/// Decompress a frame produced by `encode`
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut reader = data;
    brotli::BrotliDecompress(&mut reader, &mut out)
        .map_err(|_| Error::with_message(ErrorCode::InvalidFrame, "corrupt lz frame"))?;
    Ok(out)
}

/// Estimated compression ratio from a sample of up to 64 KiB
pub fn estimate_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 1.0;
    }
    let sample = &data[..data.len().min(SAMPLE_BYTES)];
    if sample.len() < MIN_INPUT_SIZE {
        return 1.0;
    }
    match encode(sample) {
        Ok(out) => (out.len() as f64 / sample.len() as f64).clamp(0.01, 1.5),
        Err(_) => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_compressible() {
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(8192)
            .copied()
            .collect();
        let encoded = encode(&data).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_tiny_input_passthrough() {
        let data = b"short".to_vec();
        assert_eq!(encode(&data).unwrap(), data);
    }

    #[test]
    fn test_corrupt_frame_rejected() {
        let err = decode(&[0xFF, 0xFE, 0x00, 0x12, 0x34]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFrame);
    }

    #[test]
    fn test_estimate_ratio_on_text() {
        let data: Vec<u8> = b"aaaabbbbcccc".iter().cycle().take(16384).copied().collect();
        let ratio = estimate_ratio(&data);
        assert!(ratio < 0.5, "repetitive text should compress, got {}", ratio);
    }
}
