//! Adaptive codec selection
//!
//! Chooses a codec from sampled statistics without scanning the whole
//! stream: integer streams race delta against bitpacking, binary streams
//! evaluate RLE, string sequences evaluate the dictionary. A candidate
//! wins only if its estimated ratio beats the minimum compression ratio;
//! otherwise the general-purpose codec takes over, and if even that does
//! not shrink the payload the page is stored uncompressed.

use crate::codec::{bitpack, delta, dict, lz, rle, Codec};

/// A codec pick with its estimated compression ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecChoice {
    pub codec: Codec,
    pub estimated_ratio: f64,
}

/// Minimum benefit required before a specialized codec is applied
/// (0.95 = at least 5% reduction)
pub const DEFAULT_MIN_COMPRESSION_RATIO: f64 = 0.95;

/// Select the best codec for an integer stream.
///
/// Delta and bitpacking are the specialized candidates; run-length
/// encoding also competes so constant columns collapse to a single run
/// instead of a packed page.
pub fn select_for_integers(values: &[i64], min_ratio: f64) -> CodecChoice {
    if values.is_empty() {
        return CodecChoice {
            codec: Codec::Uncompressed,
            estimated_ratio: 1.0,
        };
    }

    let mut best = CodecChoice {
        codec: Codec::Uncompressed,
        estimated_ratio: 1.0,
    };

    if delta::is_suitable(values) {
        let ratio = delta::estimate_ratio(values);
        if ratio < best.estimated_ratio {
            best = CodecChoice {
                codec: Codec::Delta,
                estimated_ratio: ratio,
            };
        }
    }

    let bp_ratio = bitpack::estimate_ratio(values);
    if bp_ratio < best.estimated_ratio {
        best = CodecChoice {
            codec: Codec::Bitpack,
            estimated_ratio: bp_ratio,
        };
    }

    let rle_ratio = rle_ratio_for_integers(values);
    if rle_ratio < best.estimated_ratio {
        best = CodecChoice {
            codec: Codec::Rle,
            estimated_ratio: rle_ratio,
        };
    }

    if best.estimated_ratio <= min_ratio {
        return best;
    }
    CodecChoice {
        codec: Codec::Lz,
        estimated_ratio: lz::estimate_ratio(&crate::codec::i64_to_bytes(values)),
    }
}

/// RLE estimate over 8-byte integer slots without materializing bytes
fn rle_ratio_for_integers(values: &[i64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let sample = &values[..values.len().min(512)];
    let runs = 1 + sample.windows(2).filter(|w| w[0] != w[1]).count();
    ((runs * 12) as f64 / (sample.len() * 8) as f64).min(1.5)
}

/// Select the best codec for a generic fixed-value-size binary stream
pub fn select_for_binary(data: &[u8], value_size: usize, min_ratio: f64) -> CodecChoice {
    if data.is_empty() || value_size == 0 {
        return CodecChoice {
            codec: Codec::Uncompressed,
            estimated_ratio: 1.0,
        };
    }

    let rle_ratio = rle::estimate_ratio(data, value_size);
    if rle_ratio <= min_ratio {
        return CodecChoice {
            codec: Codec::Rle,
            estimated_ratio: rle_ratio,
        };
    }
    CodecChoice {
        codec: Codec::Lz,
        estimated_ratio: lz::estimate_ratio(data),
    }
}

/// Select the best codec for a string sequence
pub fn select_for_strings(values: &[String], min_ratio: f64) -> CodecChoice {
    if values.is_empty() {
        return CodecChoice {
            codec: Codec::Uncompressed,
            estimated_ratio: 1.0,
        };
    }

    if dict::is_suitable(values) {
        let ratio = dict::estimate_ratio(values);
        if ratio <= min_ratio {
            return CodecChoice {
                codec: Codec::Dictionary,
                estimated_ratio: ratio,
            };
        }
    }

    let mut joined = Vec::new();
    for v in values.iter().take(1024) {
        joined.extend_from_slice(v.as_bytes());
    }
    CodecChoice {
        codec: Codec::Lz,
        estimated_ratio: lz::estimate_ratio(&joined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_binary_selects_rle() {
        let data: Vec<u8> = std::iter::repeat(42i32.to_le_bytes())
            .take(1000)
            .flatten()
            .collect();
        let choice = select_for_binary(&data, 4, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Rle);
        assert!(choice.estimated_ratio < 0.05);
    }

    #[test]
    fn test_bounded_integers_select_bitpack() {
        let values: Vec<i64> = (0..1024).map(|i| i % 16).collect();
        let choice = select_for_integers(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Bitpack);
    }

    #[test]
    fn test_sorted_wide_range_selects_delta() {
        // Sorted, small steps, wide absolute range: deltas fit one varint
        // byte while bitpacking still needs ~12 bits per value.
        let values: Vec<i64> = (0..1000).map(|i| 1_000_000_000 + i * 3).collect();
        let choice = select_for_integers(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Delta);
    }

    #[test]
    fn test_constant_integers_select_rle() {
        let values = vec![42i64; 1000];
        let choice = select_for_integers(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Rle);
        assert!(choice.estimated_ratio < 0.01);
    }

    #[test]
    fn test_categorical_strings_select_dictionary() {
        let values: Vec<String> = (0..500).map(|i| format!("tag{}", i % 4)).collect();
        let choice = select_for_strings(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Dictionary);
    }

    #[test]
    fn test_high_cardinality_strings_fall_back_to_lz() {
        let values: Vec<String> = (0..500).map(|i| format!("unique-{}", i)).collect();
        let choice = select_for_strings(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        assert_eq!(choice.codec, Codec::Lz);
    }

    #[test]
    fn test_selector_monotonicity() {
        // When two integer codecs both pass the gate, the smaller
        // estimate wins.
        let values: Vec<i64> = (0..1024).collect();
        let delta_ratio = crate::codec::delta::estimate_ratio(&values);
        let bitpack_ratio = crate::codec::bitpack::estimate_ratio(&values);
        let choice = select_for_integers(&values, DEFAULT_MIN_COMPRESSION_RATIO);
        let expected = if delta_ratio < bitpack_ratio {
            Codec::Delta
        } else {
            Codec::Bitpack
        };
        assert_eq!(choice.codec, expected);
    }
}
