//! Table manager
//!
//! Writes and reads the multi-file table layout: one `.lyta` manifest plus
//! one `.lycol` companion file per column, named `<table>_col<id>.lycol`.
//! The writer buffers encoded pages and commits everything at finalize;
//! durability is only promised on a clean finalize. The reader verifies
//! every checksum it crosses and refuses mismatched schemas.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::error::{Error, ErrorCode, Result};
use crate::schema::Schema;
use crate::storage::column::{decode_page, ColumnStats, EncodedPage};
use crate::storage::format::{
    crc32, deserialize_page_index, serialize_page_index, ColumnFileHeader, ColumnStatsRecord,
    PageHeader, PageIndexEntry, TableColumnMetadata, TableFileHeader, TableStatistics,
    COLUMN_METADATA_SIZE, PAGE_HEADER_SIZE, TABLE_HEADER_SIZE,
};
use crate::types::{ColumnId, Value};

// ============================================================================
// Path Helpers
// ============================================================================

/// Companion file path for one column
pub fn column_file_path(base_dir: &Path, table_name: &str, column_id: ColumnId) -> PathBuf {
    base_dir.join(format!("{}_col{}.lycol", table_name, column_id))
}

fn table_stem(filepath: &Path) -> String {
    filepath
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string())
}

// ============================================================================
// Table Writer
// ============================================================================

/// Pages plus statistics handed to the writer for one column
#[derive(Debug, Clone, Default)]
struct PendingColumn {
    pages: Vec<EncodedPage>,
    row_count: u64,
    codec: Codec,
    stats: Option<ColumnStats>,
}

/// Writes a complete multi-column table: companion `.lycol` files plus the
/// `.lyta` manifest.
pub struct TableWriter {
    filepath: PathBuf,
    base_dir: PathBuf,
    schema: Schema,
    table_name: String,
    columns: Vec<PendingColumn>,
    statistics: TableStatistics,
    finalized: bool,
}

impl TableWriter {
    pub fn new(filepath: impl Into<PathBuf>, schema: Schema, base_dir: impl Into<PathBuf>) -> Self {
        let filepath = filepath.into();
        let table_name = table_stem(&filepath);
        let columns = vec![PendingColumn::default(); schema.num_columns()];
        TableWriter {
            filepath,
            base_dir: base_dir.into(),
            schema,
            table_name,
            columns,
            statistics: TableStatistics::default(),
            finalized: false,
        }
    }

    /// Hand the writer every encoded page of one column
    pub fn write_column_pages(
        &mut self,
        column_id: ColumnId,
        pages: Vec<EncodedPage>,
        row_count: u64,
        codec: Codec,
    ) -> Result<()> {
        self.write_column_pages_with_stats(column_id, pages, row_count, codec, None)
    }

    /// Like `write_column_pages`, carrying column statistics into the
    /// manifest
    pub fn write_column_pages_with_stats(
        &mut self,
        column_id: ColumnId,
        pages: Vec<EncodedPage>,
        row_count: u64,
        codec: Codec,
        stats: Option<ColumnStats>,
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::with_message(
                ErrorCode::Internal,
                "table writer already finalized",
            ));
        }
        let slot = self
            .columns
            .get_mut(column_id as usize)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "column id out of range"))?;
        slot.pages = pages;
        slot.row_count = row_count;
        slot.codec = codec;
        slot.stats = stats;
        Ok(())
    }

    /// Close every column file, assemble the manifest, write the table
    /// file, and compute the final CRCs.
    pub fn finalize(&mut self) -> Result<TableStatistics> {
        if self.finalized {
            return Err(Error::with_message(
                ErrorCode::Internal,
                "table writer already finalized",
            ));
        }

        let row_count = self.columns.iter().map(|c| c.row_count).max().unwrap_or(0);
        let column_count = self.schema.num_columns() as u32;

        let mut metadata = Vec::with_capacity(self.columns.len());
        let mut column_stats = Vec::with_capacity(self.columns.len());
        let mut uncompressed_total = 0u64;
        let mut compressed_total = 0u64;

        for (idx, pending) in self.columns.iter().enumerate() {
            let column_id = idx as ColumnId;
            let path = column_file_path(&self.base_dir, &self.table_name, column_id);
            let file_bytes = write_column_file(
                &path,
                &self.table_name,
                pending.row_count,
                column_count,
                &pending.pages,
            )?;

            let original: u64 = pending.pages.iter().map(|p| p.header.original_size).sum();
            let encoded: u64 = pending.pages.iter().map(|p| p.header.encoded_size).sum();
            uncompressed_total += original;
            compressed_total += encoded;

            metadata.push(TableColumnMetadata {
                column_id,
                file_offset: 0,
                file_size: file_bytes.len() as u64,
                codec: pending.codec,
                page_count: pending.pages.len() as u32,
                ratio: if original > 0 {
                    encoded as f64 / original as f64
                } else {
                    1.0
                },
                crc: crc32(&file_bytes),
            });

            let stats = pending.stats.clone().unwrap_or_default();
            column_stats.push(ColumnStatsRecord {
                column_id,
                uncompressed_bytes: original,
                compressed_bytes: encoded,
                ratio: if original > 0 {
                    encoded as f64 / original as f64
                } else {
                    1.0
                },
                page_count: pending.pages.len() as u32,
                null_count: stats.null_count as u32,
                min_value: stats.min_as_i64(),
                max_value: stats.max_as_i64(),
                distinct_count: stats.distinct.estimate() as u32,
            });
        }

        self.statistics = TableStatistics {
            total_rows: row_count,
            total_columns: column_count,
            uncompressed_bytes: uncompressed_total,
            compressed_bytes: compressed_total,
            overall_ratio: if uncompressed_total > 0 {
                compressed_total as f64 / uncompressed_total as f64
            } else {
                1.0
            },
            timestamp_created: chrono::Utc::now().timestamp(),
            table_name: self.table_name.clone(),
            table_version: 1,
            column_stats,
        };

        let header = TableFileHeader {
            row_count,
            column_count,
            schema_id: self.schema.schema_id(),
        };

        let mut out = Vec::new();
        out.extend_from_slice(&header.serialize());
        for meta in &metadata {
            out.extend_from_slice(&meta.serialize());
        }
        out.extend_from_slice(&self.statistics.serialize());

        let mut file = fs::File::create(&self.filepath)?;
        file.write_all(&out)?;
        file.sync_all()?;

        self.finalized = true;
        Ok(self.statistics.clone())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn statistics(&self) -> &TableStatistics {
        &self.statistics
    }
}

/// Serialize and write one `.lycol` file; returns the file bytes for CRC
/// accounting in the manifest.
fn write_column_file(
    path: &Path,
    table_name: &str,
    row_count: u64,
    column_count: u32,
    pages: &[EncodedPage],
) -> Result<Vec<u8>> {
    let header = ColumnFileHeader {
        table_name: table_name.to_string(),
        row_count,
        column_count,
        compression_enabled: pages.iter().any(|p| p.header.codec != Codec::Uncompressed),
    };

    let mut out = header.serialize();
    let mut entries = Vec::with_capacity(pages.len());
    for page in pages {
        let offset = out.len() as u64;
        out.extend_from_slice(&page.header.serialize());
        out.extend_from_slice(&page.body);
        entries.push(PageIndexEntry {
            page_id: page.header.page_id,
            offset,
            size: (PAGE_HEADER_SIZE + page.body.len()) as u64,
            codec: page.header.codec,
            ratio: page.header.ratio(),
            crc: page.header.body_crc,
        });
    }
    out.extend_from_slice(&serialize_page_index(&entries));

    let mut file = fs::File::create(path)?;
    file.write_all(&out)?;
    file.sync_all()?;
    Ok(out)
}

// ============================================================================
// Table Reader
// ============================================================================

/// Reads the manifest and coordinates per-column page access
#[derive(Debug)]
pub struct TableReader {
    filepath: PathBuf,
    base_dir: PathBuf,
    table_name: String,
    schema: Schema,
    header: TableFileHeader,
    metadata: Vec<TableColumnMetadata>,
    statistics: TableStatistics,
}

impl TableReader {
    /// Open a table file, verifying checksums and the schema id.
    ///
    /// Catalog persistence is outside the engine; the caller supplies the
    /// schema and the reader refuses a mismatch.
    pub fn open(filepath: impl Into<PathBuf>, schema: Schema) -> Result<TableReader> {
        let filepath = filepath.into();
        let data = fs::read(&filepath)?;

        let header = TableFileHeader::deserialize(&data)?;
        if header.schema_id != schema.schema_id() {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                "schema id mismatch: table file does not match the supplied schema",
            ));
        }
        if header.column_count as usize != schema.num_columns() {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                "column count mismatch between manifest and schema",
            ));
        }

        let mut pos = TABLE_HEADER_SIZE;
        let mut metadata = Vec::with_capacity(header.column_count as usize);
        for _ in 0..header.column_count {
            metadata.push(TableColumnMetadata::deserialize(&data[pos..])?);
            pos += COLUMN_METADATA_SIZE;
        }
        let statistics = TableStatistics::deserialize(&data[pos..])?;

        let base_dir = filepath
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let table_name = table_stem(&filepath);

        Ok(TableReader {
            filepath,
            base_dir,
            table_name,
            schema,
            header,
            metadata,
            statistics,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn row_count(&self) -> u64 {
        self.header.row_count
    }

    pub fn column_count(&self) -> u32 {
        self.header.column_count
    }

    pub fn statistics(&self) -> &TableStatistics {
        &self.statistics
    }

    /// Read and frame-check all pages of one column
    pub fn read_column_pages(&self, column_id: ColumnId) -> Result<Vec<EncodedPage>> {
        let meta = self
            .metadata
            .get(column_id as usize)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "column id out of range"))?;

        let path = column_file_path(&self.base_dir, &self.table_name, column_id);
        let data = fs::read(&path)?;

        if crc32(&data) != meta.crc {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                format!("column file {} checksum mismatch", path.display()),
            ));
        }

        let (_, header_len) = ColumnFileHeader::deserialize(&data)?;
        let entries = deserialize_page_index(&data[data.len() - trailer_len(&data, header_len)?..])?;

        let mut pages = Vec::with_capacity(entries.len());
        for entry in &entries {
            let start = entry.offset as usize;
            let end = start + entry.size as usize;
            if end > data.len() {
                return Err(Error::with_message(
                    ErrorCode::InvalidFrame,
                    "page extends past end of column file",
                ));
            }
            let page_header = PageHeader::deserialize(&data[start..])?;
            let body = data[start + PAGE_HEADER_SIZE..end].to_vec();
            pages.push(EncodedPage {
                header: page_header,
                body,
            });
        }
        Ok(pages)
    }

    /// Decode one full column into values
    pub fn read_column(&self, column_id: ColumnId) -> Result<Vec<Value>> {
        let data_type = self
            .schema
            .column(column_id as usize)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "column id out of range"))?
            .data_type;

        let mut values = Vec::new();
        for page in self.read_column_pages(column_id)? {
            values.extend(decode_page(data_type, &page.header, &page.body)?);
        }
        Ok(values)
    }

    /// Materialize a row range across all columns
    pub fn read_rows(&self, start: u64, count: u64) -> Result<Vec<Vec<Value>>> {
        let end = (start + count).min(self.header.row_count);
        if start >= end {
            return Ok(Vec::new());
        }

        let mut columns = Vec::with_capacity(self.schema.num_columns());
        for idx in 0..self.schema.num_columns() {
            columns.push(self.read_column(idx as ColumnId)?);
        }

        let mut rows = Vec::with_capacity((end - start) as usize);
        for row in start..end {
            rows.push(
                columns
                    .iter()
                    .map(|col| col.get(row as usize).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
        Ok(rows)
    }

    /// Full scan with CRC verification of every page in every column
    pub fn validate(&self) -> Result<()> {
        for idx in 0..self.schema.num_columns() {
            let data_type = self.schema[idx].data_type;
            for page in self.read_column_pages(idx as ColumnId)? {
                decode_page(data_type, &page.header, &page.body)?;
            }
        }
        Ok(())
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }
}

/// Length of the page index trailer at the end of a column file
fn trailer_len(data: &[u8], header_len: usize) -> Result<usize> {
    // The page index is self-describing from the front, but it sits at the
    // tail; walk pages forward from the header to find where it starts.
    let mut pos = header_len;
    loop {
        if pos + 8 > data.len() {
            return Err(Error::with_message(
                ErrorCode::InvalidFrame,
                "column file truncated before page index",
            ));
        }
        // A page starts with the page magic; the index starts with a count.
        let magic = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        if magic != crate::storage::format::PAGE_MAGIC {
            return Ok(data.len() - pos);
        }
        let header = PageHeader::deserialize(&data[pos..])?;
        pos += PAGE_HEADER_SIZE + header.encoded_size as usize;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::storage::column::ColumnWriter;
    use crate::types::DataType;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::not_null("id", DataType::Int64),
            ColumnDef::new("name", DataType::Text),
        ])
        .unwrap()
    }

    fn write_sample(dir: &Path) -> PathBuf {
        let schema = sample_schema();
        let path = dir.join("people.lyta");
        let mut writer = TableWriter::new(&path, schema, dir);

        let mut ids = ColumnWriter::new(0, DataType::Int64);
        let mut names = ColumnWriter::new(1, DataType::Text);
        for i in 0..500i64 {
            ids.append_value(&Value::Integer(i)).unwrap();
            names
                .append_value(&Value::Text(format!("name{}", i % 7)))
                .unwrap();
        }
        let ids = ids.finalize().unwrap();
        let names = names.finalize().unwrap();

        let codec = ids.pages.first().map(|p| p.header.codec).unwrap();
        writer
            .write_column_pages_with_stats(0, ids.pages.clone(), ids.row_count, codec, Some(ids.stats.clone()))
            .unwrap();
        let codec = names.pages.first().map(|p| p.header.codec).unwrap();
        writer
            .write_column_pages_with_stats(1, names.pages.clone(), names.row_count, codec, Some(names.stats.clone()))
            .unwrap();
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let reader = TableReader::open(&path, sample_schema()).unwrap();
        assert_eq!(reader.row_count(), 500);
        assert_eq!(reader.column_count(), 2);

        let ids = reader.read_column(0).unwrap();
        assert_eq!(ids.len(), 500);
        assert_eq!(ids[499], Value::Integer(499));

        let rows = reader.read_rows(10, 3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], Value::Integer(10));
        assert_eq!(rows[0][1], Value::Text("name3".to_string()));

        reader.validate().unwrap();
    }

    #[test]
    fn test_statistics_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let reader = TableReader::open(&path, sample_schema()).unwrap();
        let stats = reader.statistics();
        assert_eq!(stats.total_rows, 500);
        assert_eq!(stats.total_columns, 2);
        assert_eq!(stats.column_stats.len(), 2);
        assert_eq!(stats.column_stats[0].min_value, 0);
        assert_eq!(stats.column_stats[0].max_value, 499);
        assert_eq!(stats.column_stats[1].distinct_count, 7);
        assert!(stats.timestamp_created > 0);
    }

    #[test]
    fn test_schema_mismatch_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let wrong = Schema::new(vec![
            ColumnDef::not_null("id", DataType::Int32),
            ColumnDef::new("name", DataType::Text),
        ])
        .unwrap();
        let err = TableReader::open(&path, wrong).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFrame);
    }

    #[test]
    fn test_single_byte_flip_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        // Corrupt one byte in the middle of a column file body.
        let col_path = column_file_path(dir.path(), "people", 0);
        let mut data = fs::read(&col_path).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0x01;
        fs::write(&col_path, &data).unwrap();

        let reader = TableReader::open(&path, sample_schema()).unwrap();
        assert!(reader.read_column(0).is_err());
    }

    #[test]
    fn test_unknown_magic_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.lyta");
        fs::write(&path, b"not a table file at all........").unwrap();
        let err = TableReader::open(&path, sample_schema()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFrame);
    }
}
