//! Run-length encoding
//!
//! Encodes a fixed-value-size byte stream as groups of
//! `(count: u32 LE, value: value_size bytes)`. Best for columns with long
//! runs of identical values; the break-even point is an average run of 1.4
//! for 8-byte values.

use crate::error::{Error, ErrorCode, Result};

/// Sampling window for ratio estimation
const SAMPLE_BYTES: usize = 4096;

/// Encode `data` as runs. `data.len()` must be a multiple of `value_size`.
pub fn encode(data: &[u8], value_size: usize) -> Result<Vec<u8>> {
    if value_size == 0 {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            "value size must be non-zero",
        ));
    }
    if data.len() % value_size != 0 {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            "data length is not a multiple of value size",
        ));
    }

    let num_values = data.len() / value_size;
    let mut out = Vec::new();

    let mut i = 0;
    while i < num_values {
        let current = &data[i * value_size..(i + 1) * value_size];
        let mut run = 1usize;
        while i + run < num_values {
            let next = &data[(i + run) * value_size..(i + run + 1) * value_size];
            if next != current {
                break;
            }
            run += 1;
        }
        out.extend_from_slice(&(run as u32).to_le_bytes());
        out.extend_from_slice(current);
        i += run;
    }

    Ok(out)
}

/// Decode a run stream back to the original byte stream
pub fn decode(data: &[u8], value_size: usize) -> Result<Vec<u8>> {
    if value_size == 0 {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            "value size must be non-zero",
        ));
    }

    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if pos + 4 + value_size > data.len() {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                "truncated run",
            ));
        }
        let count = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let value = &data[pos..pos + value_size];
        pos += value_size;
        for _ in 0..count {
            out.extend_from_slice(value);
        }
    }
    Ok(out)
}

/// Estimate the compression ratio from the first 4 KiB of the stream.
/// Returns 1.0 when RLE would not help.
pub fn estimate_ratio(data: &[u8], value_size: usize) -> f64 {
    if data.is_empty() || value_size == 0 {
        return 1.0;
    }
    let sample_len = data.len().min(SAMPLE_BYTES);
    let sample_values = sample_len / value_size;
    if sample_values < 2 {
        return 1.0;
    }

    // A run boundary sits wherever two consecutive values differ.
    let mut boundaries = 0usize;
    for i in 0..sample_values - 1 {
        let a = &data[i * value_size..(i + 1) * value_size];
        let b = &data[(i + 1) * value_size..(i + 2) * value_size];
        if a != b {
            boundaries += 1;
        }
    }

    let num_runs = boundaries + 1;
    let estimated = num_runs * (4 + value_size);
    let sample_bytes = sample_values * value_size;
    (estimated as f64 / sample_bytes as f64).min(1.5)
}
