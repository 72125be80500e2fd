//! Column store
//!
//! Builds and reads per-column pages. The append path accumulates typed
//! values into an in-progress page; crossing the 64 KiB page bound finalizes
//! the page (codec selection, encode, CRC). Null values occupy a zeroed
//! slot and set a bit in the in-memory null bitmap; on disk, per-column
//! null counts travel in the statistics block.
//!
//! Page slot layout by type: integer-family values (including dates and
//! timestamps) serialize as 8-byte slots so the integer codecs apply
//! uniformly; floats keep their natural width; booleans are one byte;
//! strings are a u32 length prefix plus bytes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::codec::{self, selector, Codec, DEFAULT_MIN_COMPRESSION_RATIO};
use crate::error::{Error, ErrorCode, Result};
use crate::storage::format::{crc32, PageHeader, PAGE_SIZE};
use crate::types::{ColumnId, DataType, PageId, Value};
use crate::util::BitVec;

// ============================================================================
// Distinct-Count Sketch
// ============================================================================

/// Upper-bounded distinct counter: exact up to 1024 distinct values, then a
/// 64-register HyperLogLog-style sketch.
#[derive(Debug, Clone)]
pub struct DistinctSketch {
    exact: Option<HashSet<u64>>,
    registers: [u8; 64],
}

/// Exact tracking limit before switching to the sketch
const EXACT_LIMIT: usize = 1024;

impl Default for DistinctSketch {
    fn default() -> Self {
        DistinctSketch {
            exact: Some(HashSet::new()),
            registers: [0; 64],
        }
    }
}

impl DistinctSketch {
    pub fn insert(&mut self, value: &Value) {
        let mut hasher = DefaultHasher::new();
        match value {
            Value::Null => return,
            Value::Integer(i) => i.hash(&mut hasher),
            Value::Real(f) => f.to_bits().hash(&mut hasher),
            Value::Text(s) => s.hash(&mut hasher),
            Value::Boolean(b) => b.hash(&mut hasher),
        }
        let h = hasher.finish();

        let register = (h & 0x3F) as usize;
        let rank = ((h >> 6) | (1 << 57)).trailing_zeros() as u8 + 1;
        self.registers[register] = self.registers[register].max(rank);

        if let Some(exact) = &mut self.exact {
            exact.insert(h);
            if exact.len() > EXACT_LIMIT {
                self.exact = None;
            }
        }
    }

    /// Estimated number of distinct values
    pub fn estimate(&self) -> u64 {
        if let Some(exact) = &self.exact {
            return exact.len() as u64;
        }
        // Standard HLL estimator with m = 64 registers.
        let m = 64.0f64;
        let alpha = 0.709;
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        (alpha * m * m / sum) as u64
    }
}

// ============================================================================
// Column Statistics
// ============================================================================

/// Per-column statistics refreshed on each page finalize
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: u64,
    pub distinct: DistinctSketch,
}

impl ColumnStats {
    fn observe(&mut self, value: &Value) {
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        self.distinct.insert(value);
        let replace_min = match &self.min {
            None => true,
            Some(min) => crate::types::total_order(value, min) == std::cmp::Ordering::Less,
        };
        if replace_min {
            self.min = Some(value.clone());
        }
        let replace_max = match &self.max {
            None => true,
            Some(max) => crate::types::total_order(value, max) == std::cmp::Ordering::Greater,
        };
        if replace_max {
            self.max = Some(value.clone());
        }
    }

    /// Map min/max to the i64 fields of the on-disk statistics record
    pub fn min_as_i64(&self) -> i64 {
        self.min.as_ref().map(|v| v.to_i64()).unwrap_or(0)
    }

    pub fn max_as_i64(&self) -> i64 {
        self.max.as_ref().map(|v| v.to_i64()).unwrap_or(0)
    }
}

// ============================================================================
// Encoded Pages
// ============================================================================

/// One finalized page: header plus encoded body
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub header: PageHeader,
    pub body: Vec<u8>,
}

/// Slot width of a type inside a page body
fn slot_size(data_type: DataType) -> usize {
    if data_type.is_integer() {
        8
    } else {
        data_type.size_bytes()
    }
}

// ============================================================================
// Column Writer
// ============================================================================

/// Accumulates values for one column and emits encoded pages
pub struct ColumnWriter {
    column_id: ColumnId,
    data_type: DataType,
    pages: Vec<EncodedPage>,
    current: Vec<Value>,
    current_bytes: usize,
    next_page_id: PageId,
    nulls: BitVec,
    stats: ColumnStats,
    row_count: u64,
    min_ratio: f64,
}

impl ColumnWriter {
    pub fn new(column_id: ColumnId, data_type: DataType) -> Self {
        ColumnWriter {
            column_id,
            data_type,
            pages: Vec::new(),
            current: Vec::new(),
            current_bytes: 0,
            next_page_id: 0,
            nulls: BitVec::new(0),
            stats: ColumnStats::default(),
            row_count: 0,
            min_ratio: DEFAULT_MIN_COMPRESSION_RATIO,
        }
    }

    /// Append a typed value; the value must match the column type
    pub fn append_value(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return self.append_null();
        }
        if !type_accepts(self.data_type, value) {
            return Err(Error::with_message(
                ErrorCode::Type,
                format!("value {} does not fit column type {}", value, self.data_type),
            ));
        }
        self.push(value.clone())
    }

    /// Append a null: zeroed slot plus a set null bit
    pub fn append_null(&mut self) -> Result<()> {
        self.push(Value::Null)
    }

    fn push(&mut self, value: Value) -> Result<()> {
        self.current_bytes += match (&value, self.data_type) {
            (Value::Text(s), DataType::Text) => 4 + s.len(),
            _ => slot_size(self.data_type),
        };
        self.nulls.push(value.is_null());
        self.stats.observe(&value);
        self.current.push(value);
        self.row_count += 1;

        if self.current_bytes >= PAGE_SIZE {
            self.finalize_page()?;
        }
        Ok(())
    }

    /// Flush the in-progress page and return the full page list
    pub fn finalize(mut self) -> Result<FinalizedColumn> {
        if !self.current.is_empty() {
            self.finalize_page()?;
        }
        Ok(FinalizedColumn {
            column_id: self.column_id,
            data_type: self.data_type,
            pages: self.pages,
            nulls: self.nulls,
            stats: self.stats,
            row_count: self.row_count,
        })
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Encode the in-progress values as one page
    fn finalize_page(&mut self) -> Result<()> {
        let values = std::mem::take(&mut self.current);
        self.current_bytes = 0;
        if values.is_empty() {
            return Ok(());
        }

        let raw = serialize_slots(self.data_type, &values);
        let (codec, encoded) = self.encode_page(&values, &raw)?;

        let header = PageHeader::new(
            self.next_page_id,
            self.column_id,
            values.len() as u32,
            codec,
            raw.len() as u64,
            encoded.len() as u64,
            crc32(&encoded),
        );
        self.next_page_id += 1;
        self.pages.push(EncodedPage {
            header,
            body: encoded,
        });
        Ok(())
    }

    fn encode_page(&self, values: &[Value], raw: &[u8]) -> Result<(Codec, Vec<u8>)> {
        let choice = if self.data_type.is_integer() {
            let ints: Vec<i64> = values.iter().map(|v| v.to_i64()).collect();
            selector::select_for_integers(&ints, self.min_ratio)
        } else if self.data_type == DataType::Text {
            let strings: Vec<String> = values.iter().map(|v| v.to_text()).collect();
            selector::select_for_strings(&strings, self.min_ratio)
        } else {
            selector::select_for_binary(raw, slot_size(self.data_type), self.min_ratio)
        };

        let encoded = match choice.codec {
            Codec::Uncompressed => raw.to_vec(),
            Codec::Dictionary => {
                let strings: Vec<String> = values.iter().map(|v| v.to_text()).collect();
                codec::dict::encode(&strings)?
            }
            other => codec::encode(other, raw, slot_size(self.data_type))?,
        };

        // A codec that fails to shrink the payload is recorded as
        // uncompressed so decode never runs on a losing frame.
        if encoded.len() >= raw.len() && choice.codec != Codec::Uncompressed {
            return Ok((Codec::Uncompressed, raw.to_vec()));
        }
        Ok((choice.codec, encoded))
    }
}

/// Result of closing a column writer
#[derive(Debug, Clone)]
pub struct FinalizedColumn {
    pub column_id: ColumnId,
    pub data_type: DataType,
    pub pages: Vec<EncodedPage>,
    pub nulls: BitVec,
    pub stats: ColumnStats,
    pub row_count: u64,
}

impl FinalizedColumn {
    pub fn encoded_bytes(&self) -> u64 {
        self.pages.iter().map(|p| p.header.encoded_size).sum()
    }

    pub fn original_bytes(&self) -> u64 {
        self.pages.iter().map(|p| p.header.original_size).sum()
    }
}

// ============================================================================
// Page Decode
// ============================================================================

/// Decode one page back into values, verifying the body CRC first
pub fn decode_page(
    data_type: DataType,
    header: &PageHeader,
    body: &[u8],
) -> Result<Vec<Value>> {
    if crc32(body) != header.body_crc {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            format!("page {} body checksum mismatch", header.page_id),
        ));
    }

    let values = match header.codec {
        Codec::Dictionary => {
            let strings = codec::dict::decode(body)?;
            strings.into_iter().map(Value::Text).collect()
        }
        codec_id => {
            let raw = codec::decode(codec_id, body, slot_size(data_type))?;
            deserialize_slots(data_type, &raw, header.row_count as usize)?
        }
    };

    if values.len() != header.row_count as usize {
        return Err(Error::with_message(
            ErrorCode::InvalidFrame,
            format!(
                "page {} decoded {} values, header says {}",
                header.page_id,
                values.len(),
                header.row_count
            ),
        ));
    }
    Ok(values)
}

/// Serialize values into the page slot layout
fn serialize_slots(data_type: DataType, values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        match data_type {
            DataType::Text => {
                let s = match value {
                    Value::Null => "",
                    Value::Text(s) => s.as_str(),
                    _ => "",
                };
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            DataType::Float64 => out.extend_from_slice(&value.to_f64().to_le_bytes()),
            DataType::Float32 => out.extend_from_slice(&(value.to_f64() as f32).to_le_bytes()),
            DataType::Bool => out.push(match value {
                Value::Boolean(true) => 1,
                _ => 0,
            }),
            // Integer family: 8-byte slots.
            _ => out.extend_from_slice(&value.to_i64().to_le_bytes()),
        }
    }
    out
}

/// Parse the page slot layout back into values
fn deserialize_slots(data_type: DataType, raw: &[u8], count: usize) -> Result<Vec<Value>> {
    let frame_err = || Error::with_message(ErrorCode::InvalidFrame, "page body truncated");
    let mut out = Vec::with_capacity(count);
    let mut pos = 0usize;

    for _ in 0..count {
        match data_type {
            DataType::Text => {
                if pos + 4 > raw.len() {
                    return Err(frame_err());
                }
                let len = u32::from_le_bytes(raw[pos..pos + 4].try_into().unwrap()) as usize;
                pos += 4;
                if pos + len > raw.len() {
                    return Err(frame_err());
                }
                let s = String::from_utf8(raw[pos..pos + len].to_vec()).map_err(|_| {
                    Error::with_message(ErrorCode::InvalidFrame, "non-UTF-8 string slot")
                })?;
                pos += len;
                out.push(Value::Text(s));
            }
            DataType::Float64 => {
                if pos + 8 > raw.len() {
                    return Err(frame_err());
                }
                out.push(Value::Real(f64::from_le_bytes(
                    raw[pos..pos + 8].try_into().unwrap(),
                )));
                pos += 8;
            }
            DataType::Float32 => {
                if pos + 4 > raw.len() {
                    return Err(frame_err());
                }
                out.push(Value::Real(
                    f32::from_le_bytes(raw[pos..pos + 4].try_into().unwrap()) as f64,
                ));
                pos += 4;
            }
            DataType::Bool => {
                if pos + 1 > raw.len() {
                    return Err(frame_err());
                }
                out.push(Value::Boolean(raw[pos] != 0));
                pos += 1;
            }
            _ => {
                if pos + 8 > raw.len() {
                    return Err(frame_err());
                }
                out.push(Value::Integer(i64::from_le_bytes(
                    raw[pos..pos + 8].try_into().unwrap(),
                )));
                pos += 8;
            }
        }
    }
    Ok(out)
}

/// True when a value may be stored in a column of the given type
fn type_accepts(data_type: DataType, value: &Value) -> bool {
    match (data_type, value) {
        (_, Value::Null) => true,
        (t, Value::Integer(_)) if t.is_integer() => true,
        (DataType::Float32 | DataType::Float64, Value::Integer(_) | Value::Real(_)) => true,
        (DataType::Text, Value::Text(_)) => true,
        (DataType::Bool, Value::Boolean(_)) => true,
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================
