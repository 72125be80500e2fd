//! On-disk layout
//!
//! Binary layouts for page headers, `.lycol` column files, and `.lyta`
//! table manifests. All multi-byte integers are little-endian; strings are
//! UTF-8 without BOM. Every structural record carries a CRC-32 (reflected
//! polynomial 0xEDB88320) computed over the record excluding the CRC field
//! itself. Readers refuse unknown magic, unsupported versions, and
//! checksum mismatches.

use crate::codec::Codec;
use crate::error::{Error, ErrorCode, Result};
use crate::types::{ColumnId, PageId};

// ============================================================================
// Constants
// ============================================================================

/// Column file magic: "LYCO"
pub const LYCOL_MAGIC: u32 = 0x4F43_594C;
/// Column file format version
pub const LYCOL_VERSION: u32 = 1;
/// Table file magic: "LYTA"
pub const LYTA_MAGIC: u32 = 0x4154_594C;
/// Table file format version
pub const LYTA_VERSION: u32 = 1;
/// Page payload bound: the unit of compression, checksumming, and I/O
pub const PAGE_SIZE: usize = 64 * 1024;
/// Page header magic: "PGHA"
pub const PAGE_MAGIC: u32 = 0x5047_4841;
/// Serialized page header size
pub const PAGE_HEADER_SIZE: usize = 48;

/// CRC-32 with the reflected polynomial 0xEDB88320
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn frame_err(msg: impl Into<String>) -> Error {
    Error::with_message(ErrorCode::InvalidFrame, msg)
}

// ============================================================================
// Page Header
// ============================================================================

/// Fixed 48-byte header preceding every page body.
///
/// Layout: magic u32, page id u64, column id u32, row count u32, codec id
/// u8, 3 reserved bytes, ratio percent u32, original size u64, encoded
/// size u64, body CRC-32 u32.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub column_id: ColumnId,
    pub row_count: u32,
    pub codec: Codec,
    pub ratio_pct: u32,
    pub original_size: u64,
    pub encoded_size: u64,
    pub body_crc: u32,
}

impl PageHeader {
    pub fn new(
        page_id: PageId,
        column_id: ColumnId,
        row_count: u32,
        codec: Codec,
        original_size: u64,
        encoded_size: u64,
        body_crc: u32,
    ) -> Self {
        let ratio_pct = if original_size > 0 {
            ((encoded_size * 100) / original_size) as u32
        } else {
            100
        };
        PageHeader {
            page_id,
            column_id,
            row_count,
            codec,
            ratio_pct,
            original_size,
            encoded_size,
            body_crc,
        }
    }

    /// Achieved compression ratio (encoded / original)
    pub fn ratio(&self) -> f64 {
        if self.original_size > 0 {
            self.encoded_size as f64 / self.original_size as f64
        } else {
            1.0
        }
    }

    pub fn serialize(&self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.page_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.column_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.row_count.to_le_bytes());
        buf[20] = self.codec as u8;
        // buf[21..24] reserved
        buf[24..28].copy_from_slice(&self.ratio_pct.to_le_bytes());
        buf[28..36].copy_from_slice(&self.original_size.to_le_bytes());
        buf[36..44].copy_from_slice(&self.encoded_size.to_le_bytes());
        buf[44..48].copy_from_slice(&self.body_crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<PageHeader> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(frame_err("page header truncated"));
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != PAGE_MAGIC {
            return Err(frame_err(format!("bad page magic 0x{:08X}", magic)));
        }
        Ok(PageHeader {
            page_id: u64::from_le_bytes(data[4..12].try_into().unwrap()),
            column_id: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            row_count: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            codec: Codec::from_u8(data[20])?,
            ratio_pct: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            original_size: u64::from_le_bytes(data[28..36].try_into().unwrap()),
            encoded_size: u64::from_le_bytes(data[36..44].try_into().unwrap()),
            body_crc: u32::from_le_bytes(data[44..48].try_into().unwrap()),
        })
    }
}

// ============================================================================
// Column File Header
// ============================================================================

/// `.lycol` file header: magic, version, table name, row count, column
/// count for context, compression flag, header CRC.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFileHeader {
    pub table_name: String,
    pub row_count: u64,
    pub column_count: u32,
    pub compression_enabled: bool,
}

impl ColumnFileHeader {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(27 + self.table_name.len());
        buf.extend_from_slice(&LYCOL_MAGIC.to_le_bytes());
        buf.extend_from_slice(&LYCOL_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.table_name.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.table_name.as_bytes());
        buf.extend_from_slice(&self.row_count.to_le_bytes());
        buf.extend_from_slice(&self.column_count.to_le_bytes());
        buf.push(self.compression_enabled as u8);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Returns the header and the number of bytes consumed
    pub fn deserialize(data: &[u8]) -> Result<(ColumnFileHeader, usize)> {
        if data.len() < 10 {
            return Err(frame_err("column file header truncated"));
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != LYCOL_MAGIC {
            return Err(frame_err(format!("bad column file magic 0x{:08X}", magic)));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != LYCOL_VERSION {
            return Err(frame_err(format!("unsupported column file version {}", version)));
        }
        let name_len = u16::from_le_bytes(data[8..10].try_into().unwrap()) as usize;
        let end = 10 + name_len + 8 + 4 + 1;
        if data.len() < end + 4 {
            return Err(frame_err("column file header truncated"));
        }
        let table_name = String::from_utf8(data[10..10 + name_len].to_vec())
            .map_err(|_| frame_err("non-UTF-8 table name"))?;
        let mut pos = 10 + name_len;
        let row_count = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let column_count = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let compression_enabled = data[pos] != 0;
        pos += 1;

        let stored_crc = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        if crc32(&data[..pos]) != stored_crc {
            return Err(frame_err("column file header checksum mismatch"));
        }
        pos += 4;

        Ok((
            ColumnFileHeader {
                table_name,
                row_count,
                column_count,
                compression_enabled,
            },
            pos,
        ))
    }
}

// ============================================================================
// Page Index
// ============================================================================

/// One page index entry in the `.lycol` trailer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageIndexEntry {
    pub page_id: PageId,
    pub offset: u64,
    pub size: u64,
    pub codec: Codec,
    pub ratio: f64,
    pub crc: u32,
}

/// Serialized size of one page index entry
pub const PAGE_INDEX_ENTRY_SIZE: usize = 8 + 8 + 8 + 1 + 8 + 4;

impl PageIndexEntry {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_INDEX_ENTRY_SIZE);
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.push(self.codec as u8);
        buf.extend_from_slice(&self.ratio.to_le_bytes());
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<PageIndexEntry> {
        if data.len() < PAGE_INDEX_ENTRY_SIZE {
            return Err(frame_err("page index entry truncated"));
        }
        Ok(PageIndexEntry {
            page_id: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            size: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            codec: Codec::from_u8(data[24])?,
            ratio: f64::from_le_bytes(data[25..33].try_into().unwrap()),
            crc: u32::from_le_bytes(data[33..37].try_into().unwrap()),
        })
    }
}

/// Serialize the page index: count, entries, trailer CRC over all of it
pub fn serialize_page_index(entries: &[PageIndexEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + entries.len() * PAGE_INDEX_ENTRY_SIZE + 4);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.serialize());
    }
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Parse the page index from the tail section of a column file
pub fn deserialize_page_index(data: &[u8]) -> Result<Vec<PageIndexEntry>> {
    if data.len() < 8 {
        return Err(frame_err("page index truncated"));
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let body_len = 4 + count * PAGE_INDEX_ENTRY_SIZE;
    if data.len() < body_len + 4 {
        return Err(frame_err("page index truncated"));
    }
    let stored_crc = u32::from_le_bytes(data[body_len..body_len + 4].try_into().unwrap());
    if crc32(&data[..body_len]) != stored_crc {
        return Err(frame_err("page index checksum mismatch"));
    }

    let mut entries = Vec::with_capacity(count);
    let mut pos = 4;
    for _ in 0..count {
        entries.push(PageIndexEntry::deserialize(&data[pos..])?);
        pos += PAGE_INDEX_ENTRY_SIZE;
    }
    Ok(entries)
}

// ============================================================================
// Table File Header
// ============================================================================

/// `.lyta` file header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableFileHeader {
    pub row_count: u64,
    pub column_count: u32,
    pub schema_id: u32,
}

/// Serialized table file header size
pub const TABLE_HEADER_SIZE: usize = 4 + 4 + 8 + 4 + 4 + 4;

impl TableFileHeader {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TABLE_HEADER_SIZE);
        buf.extend_from_slice(&LYTA_MAGIC.to_le_bytes());
        buf.extend_from_slice(&LYTA_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.row_count.to_le_bytes());
        buf.extend_from_slice(&self.column_count.to_le_bytes());
        buf.extend_from_slice(&self.schema_id.to_le_bytes());
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<TableFileHeader> {
        if data.len() < TABLE_HEADER_SIZE {
            return Err(frame_err("table file header truncated"));
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != LYTA_MAGIC {
            return Err(frame_err(format!("bad table file magic 0x{:08X}", magic)));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != LYTA_VERSION {
            return Err(frame_err(format!("unsupported table file version {}", version)));
        }
        let stored_crc = u32::from_le_bytes(data[24..28].try_into().unwrap());
        if crc32(&data[..24]) != stored_crc {
            return Err(frame_err("table file header checksum mismatch"));
        }
        Ok(TableFileHeader {
            row_count: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            column_count: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            schema_id: u32::from_le_bytes(data[20..24].try_into().unwrap()),
        })
    }
}

// ============================================================================
// Table Column Metadata
// ============================================================================

/// Per-column record in the `.lyta` manifest (40 bytes)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableColumnMetadata {
    pub column_id: ColumnId,
    pub file_offset: u64,
    pub file_size: u64,
    pub codec: Codec,
    pub page_count: u32,
    pub ratio: f64,
    pub crc: u32,
}

/// Serialized size of one column metadata record
pub const COLUMN_METADATA_SIZE: usize = 4 + 8 + 8 + 1 + 3 + 4 + 8 + 4;

impl TableColumnMetadata {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(COLUMN_METADATA_SIZE);
        buf.extend_from_slice(&self.column_id.to_le_bytes());
        buf.extend_from_slice(&self.file_offset.to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.push(self.codec as u8);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.page_count.to_le_bytes());
        buf.extend_from_slice(&self.ratio.to_le_bytes());
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<TableColumnMetadata> {
        if data.len() < COLUMN_METADATA_SIZE {
            return Err(frame_err("column metadata truncated"));
        }
        Ok(TableColumnMetadata {
            column_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            file_offset: u64::from_le_bytes(data[4..12].try_into().unwrap()),
            file_size: u64::from_le_bytes(data[12..20].try_into().unwrap()),
            codec: Codec::from_u8(data[20])?,
            page_count: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            ratio: f64::from_le_bytes(data[28..36].try_into().unwrap()),
            crc: u32::from_le_bytes(data[36..40].try_into().unwrap()),
        })
    }
}

// ============================================================================
// Table Statistics
// ============================================================================

/// Per-column entry in the statistics block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColumnStatsRecord {
    pub column_id: ColumnId,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub ratio: f64,
    pub page_count: u32,
    pub null_count: u32,
    pub min_value: i64,
    pub max_value: i64,
    pub distinct_count: u32,
}

const COLUMN_STATS_SIZE: usize = 4 + 8 + 8 + 8 + 4 + 4 + 8 + 8 + 4;

/// Aggregated statistics block stored after the column metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableStatistics {
    pub total_rows: u64,
    pub total_columns: u32,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub overall_ratio: f64,
    pub timestamp_created: i64,
    pub table_name: String,
    pub table_version: u32,
    pub column_stats: Vec<ColumnStatsRecord>,
}

impl TableStatistics {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.column_stats.len() * COLUMN_STATS_SIZE);
        buf.extend_from_slice(&self.total_rows.to_le_bytes());
        buf.extend_from_slice(&self.total_columns.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_bytes.to_le_bytes());
        buf.extend_from_slice(&self.compressed_bytes.to_le_bytes());
        buf.extend_from_slice(&self.overall_ratio.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_created.to_le_bytes());
        buf.extend_from_slice(&(self.table_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.table_name.as_bytes());
        buf.extend_from_slice(&self.table_version.to_le_bytes());
        buf.extend_from_slice(&(self.column_stats.len() as u32).to_le_bytes());
        for stat in &self.column_stats {
            buf.extend_from_slice(&stat.column_id.to_le_bytes());
            buf.extend_from_slice(&stat.uncompressed_bytes.to_le_bytes());
            buf.extend_from_slice(&stat.compressed_bytes.to_le_bytes());
            buf.extend_from_slice(&stat.ratio.to_le_bytes());
            buf.extend_from_slice(&stat.page_count.to_le_bytes());
            buf.extend_from_slice(&stat.null_count.to_le_bytes());
            buf.extend_from_slice(&stat.min_value.to_le_bytes());
            buf.extend_from_slice(&stat.max_value.to_le_bytes());
            buf.extend_from_slice(&stat.distinct_count.to_le_bytes());
        }
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<TableStatistics> {
        if data.len() < 44 {
            return Err(frame_err("statistics block truncated"));
        }
        let mut pos = 0usize;
        let total_rows = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let total_columns = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let uncompressed_bytes = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let compressed_bytes = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let overall_ratio = f64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let timestamp_created = i64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let name_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if data.len() < pos + name_len + 8 {
            return Err(frame_err("statistics block truncated"));
        }
        let table_name = String::from_utf8(data[pos..pos + name_len].to_vec())
            .map_err(|_| frame_err("non-UTF-8 table name in statistics"))?;
        pos += name_len;
        let table_version = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let stats_count = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;

        if data.len() < pos + stats_count * COLUMN_STATS_SIZE + 4 {
            return Err(frame_err("statistics block truncated"));
        }
        let mut column_stats = Vec::with_capacity(stats_count);
        for _ in 0..stats_count {
            column_stats.push(ColumnStatsRecord {
                column_id: u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()),
                uncompressed_bytes: u64::from_le_bytes(data[pos + 4..pos + 12].try_into().unwrap()),
                compressed_bytes: u64::from_le_bytes(data[pos + 12..pos + 20].try_into().unwrap()),
                ratio: f64::from_le_bytes(data[pos + 20..pos + 28].try_into().unwrap()),
                page_count: u32::from_le_bytes(data[pos + 28..pos + 32].try_into().unwrap()),
                null_count: u32::from_le_bytes(data[pos + 32..pos + 36].try_into().unwrap()),
                min_value: i64::from_le_bytes(data[pos + 36..pos + 44].try_into().unwrap()),
                max_value: i64::from_le_bytes(data[pos + 44..pos + 52].try_into().unwrap()),
                distinct_count: u32::from_le_bytes(data[pos + 52..pos + 56].try_into().unwrap()),
            });
            pos += COLUMN_STATS_SIZE;
        }

        let stored_crc = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        if crc32(&data[..pos]) != stored_crc {
            return Err(frame_err("statistics block checksum mismatch"));
        }

        Ok(TableStatistics {
            total_rows,
            total_columns,
            uncompressed_bytes,
            compressed_bytes,
            overall_ratio,
            timestamp_created,
            table_name,
            table_version,
            column_stats,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
