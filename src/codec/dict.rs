//! Dictionary encoding
//!
//! Replaces each string with a u32 id into a dictionary sorted by frequency
//! descending, so the most common values get the smallest ids. Effective for
//! categorical columns; the selector gates on distinct/total <= 0.1.
//!
//! Frame: `num_entries: u32 LE`, then per entry `len: u16 LE, bytes`, then
//! `num_values: u32 LE`, then `num_values * u32 LE` ids.

use std::collections::HashMap;

use crate::error::{Error, ErrorCode, Result};

/// Cardinality gate: distinct/total must not exceed this
pub const CARDINALITY_THRESHOLD: f64 = 0.1;

/// Encode a string sequence
pub fn encode(values: &[String]) -> Result<Vec<u8>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let dict = build_dictionary(values);
    let mut ids: HashMap<&str, u32> = HashMap::with_capacity(dict.len());
    for (id, entry) in dict.iter().enumerate() {
        ids.insert(entry.as_str(), id as u32);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&(dict.len() as u32).to_le_bytes());
    for entry in &dict {
        if entry.len() > u16::MAX as usize {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                "dictionary entry longer than 64 KiB",
            ));
        }
        out.extend_from_slice(&(entry.len() as u16).to_le_bytes());
        out.extend_from_slice(entry.as_bytes());
    }
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        out.extend_from_slice(&ids[value.as_str()].to_le_bytes());
    }
    Ok(out)
}

/// Decode a dictionary frame back to the original sequence
pub fn decode(data: &[u8]) -> Result<Vec<String>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let frame_err = |msg: &str| Error::with_message(ErrorCode::InvalidFrame, msg.to_string());

    if data.len() < 4 {
        return Err(frame_err("dictionary frame shorter than header"));
    }
    let num_entries = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut pos = 4usize;

    let mut dict = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        if pos + 2 > data.len() {
            return Err(frame_err("truncated dictionary entry length"));
        }
        let len = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        if pos + len > data.len() {
            return Err(frame_err("truncated dictionary entry"));
        }
        let entry = String::from_utf8(data[pos..pos + len].to_vec())
            .map_err(|_| frame_err("non-UTF-8 dictionary entry"))?;
        pos += len;
        dict.push(entry);
    }

    if pos + 4 > data.len() {
        return Err(frame_err("truncated value count"));
    }
    let num_values = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
    pos += 4;
    if data.len() != pos + num_values * 4 {
        return Err(frame_err("dictionary frame body length mismatch"));
    }

    let mut out = Vec::with_capacity(num_values);
    for _ in 0..num_values {
        let id = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let entry = dict
            .get(id)
            .ok_or_else(|| frame_err("dictionary id out of range"))?;
        out.push(entry.clone());
    }
    Ok(out)
}

/// Fraction of distinct values in the sequence
pub fn cardinality(values: &[String]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let mut seen: HashMap<&str, ()> = HashMap::new();
    for v in values {
        seen.insert(v.as_str(), ());
    }
    seen.len() as f64 / values.len() as f64
}

/// True when the sequence is categorical enough for dictionary encoding
pub fn is_suitable(values: &[String]) -> bool {
    !values.is_empty() && cardinality(values) <= CARDINALITY_THRESHOLD
}

/// Estimated compression ratio against the raw concatenated strings
pub fn estimate_ratio(values: &[String]) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    let mut freq: HashMap<&str, u32> = HashMap::new();
    for v in values {
        *freq.entry(v.as_str()).or_insert(0) += 1;
    }
    let original: usize = values.iter().map(|v| v.len() + 4).sum();
    let dict_bytes: usize = 4 + freq.keys().map(|k| 2 + k.len()).sum::<usize>();
    let id_bytes = 4 + values.len() * 4;
    (((dict_bytes + id_bytes) as f64) / original as f64).clamp(0.01, 1.5)
}

/// Distinct values ordered by frequency descending; ties break on first
/// appearance so encoding is deterministic.
fn build_dictionary(values: &[String]) -> Vec<String> {
    let mut freq: HashMap<&str, (u32, usize)> = HashMap::new();
    for (i, v) in values.iter().enumerate() {
        let entry = freq.entry(v.as_str()).or_insert((0, i));
        entry.0 += 1;
    }
    let mut entries: Vec<(&str, u32, usize)> =
        freq.into_iter().map(|(k, (n, first))| (k, n, first)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    entries.into_iter().map(|(k, _, _)| k.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_roundtrip() {
        let values = strings(&["red", "blue", "red", "green", "red", "blue"]);
        let encoded = encode(&values).unwrap();
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_most_frequent_gets_smallest_id() {
        let values = strings(&["b", "a", "a", "a", "b", "c"]);
        let encoded = encode(&values).unwrap();
        // First dictionary entry is the most frequent value "a".
        let first_len = u16::from_le_bytes(encoded[4..6].try_into().unwrap()) as usize;
        assert_eq!(&encoded[6..6 + first_len], b"a");
    }

    #[test]
    fn test_empty_string_entry() {
        let values = strings(&["", "x", "", ""]);
        let encoded = encode(&values).unwrap();
        assert_eq!(decode(&encoded).unwrap(), values);
    }

    #[test]
    fn test_suitability_gate() {
        let categorical: Vec<String> =
            (0..200).map(|i| format!("cat{}", i % 5)).collect();
        assert!(is_suitable(&categorical));
        let unique: Vec<String> = (0..200).map(|i| format!("val{}", i)).collect();
        assert!(!is_suitable(&unique));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let values = strings(&["alpha", "beta", "alpha"]);
        let encoded = encode(&values).unwrap();
        for cut in [2, 5, encoded.len() - 1] {
            let err = decode(&encoded[..cut]).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidFrame);
        }
    }

    #[test]
    fn test_out_of_range_id_rejected() {
        let values = strings(&["a", "b"]);
        let mut encoded = encode(&values).unwrap();
        let last = encoded.len() - 4;
        encoded[last..].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(decode(&encoded).unwrap_err().code(), ErrorCode::InvalidFrame);
    }
}
