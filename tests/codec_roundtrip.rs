//! Codec round-trip properties
//!
//! Every codec must reproduce its input bit-exactly for any input
//! satisfying its precondition, and the selector must never pick a codec
//! whose frame fails to decode back to the original stream.

use proptest::prelude::*;

use lyradb::codec::{self, bitpack, delta, dict, lz, rle, selector, Codec};

proptest! {
    #[test]
    fn rle_roundtrip_u32(values in prop::collection::vec(0u32..16, 0..2000)) {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let encoded = rle::encode(&raw, 4).unwrap();
        prop_assert_eq!(rle::decode(&encoded, 4).unwrap(), raw);
    }

    #[test]
    fn rle_roundtrip_arbitrary_width(
        values in prop::collection::vec(any::<u8>(), 0..512),
        width in 1usize..16,
    ) {
        // Truncate to a whole number of values.
        let len = (values.len() / width) * width;
        let raw = &values[..len];
        let encoded = rle::encode(raw, width).unwrap();
        prop_assert_eq!(rle::decode(&encoded, width).unwrap(), raw.to_vec());
    }

    #[test]
    fn delta_roundtrip(values in prop::collection::vec(any::<i64>(), 1..1500)) {
        let encoded = delta::encode(&values).unwrap();
        prop_assert_eq!(delta::decode(&encoded).unwrap(), values);
    }

    #[test]
    fn bitpack_roundtrip(values in prop::collection::vec(any::<i64>(), 1..1500)) {
        let encoded = bitpack::encode(&values).unwrap();
        prop_assert_eq!(bitpack::decode(&encoded).unwrap(), values);
    }

    #[test]
    fn bitpack_roundtrip_small_range(
        base in -1000i64..1000,
        values in prop::collection::vec(0i64..64, 1..2000),
    ) {
        let shifted: Vec<i64> = values.iter().map(|v| base + v).collect();
        let encoded = bitpack::encode(&shifted).unwrap();
        prop_assert_eq!(bitpack::decode(&encoded).unwrap(), shifted);
    }

    #[test]
    fn dict_roundtrip(values in prop::collection::vec("[a-z]{0,12}", 0..500)) {
        let encoded = dict::encode(&values).unwrap();
        prop_assert_eq!(dict::decode(&encoded).unwrap(), values);
    }

    #[test]
    fn lz_roundtrip(data in prop::collection::vec(any::<u8>(), 0..8192)) {
        let encoded = lz::encode(&data).unwrap();
        if encoded == data {
            // Stored verbatim; the caller records it uncompressed.
        } else {
            prop_assert_eq!(lz::decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn selected_codec_roundtrips(values in prop::collection::vec(-5000i64..5000, 1..1000)) {
        let choice = selector::select_for_integers(&values, selector::DEFAULT_MIN_COMPRESSION_RATIO);
        let raw = codec::i64_to_bytes(&values);
        let encoded = codec::encode(choice.codec, &raw, 8).unwrap();
        let decoded = codec::decode(choice.codec, &encoded, 8).unwrap();
        prop_assert_eq!(decoded, raw);
    }

    #[test]
    fn estimates_stay_in_declared_range(values in prop::collection::vec(any::<i64>(), 2..500)) {
        let ratios = [
            delta::estimate_ratio(&values),
            bitpack::estimate_ratio(&values),
        ];
        for ratio in ratios {
            prop_assert!(ratio > 0.0 && ratio <= 1.5, "ratio {} out of range", ratio);
        }
    }
}

#[test]
fn corrupted_frames_are_rejected_not_misdecoded() {
    let values: Vec<i64> = (0..256).collect();
    for codec_id in [Codec::Bitpack, Codec::Delta] {
        let raw = codec::i64_to_bytes(&values);
        let encoded = codec::encode(codec_id, &raw, 8).unwrap();

        // Truncations must never panic; they either error or, for a
        // self-delimiting frame, decode to something shorter.
        for cut in [1, encoded.len() / 2, encoded.len() - 1] {
            let _ = codec::decode(codec_id, &encoded[..cut], 8);
        }
    }
}
