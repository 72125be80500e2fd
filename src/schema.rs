//! Table schema
//!
//! A schema is an ordered list of named, typed, optionally-nullable columns.
//! Column names are unique within a schema. The schema id is a CRC-32 over
//! the serialized definition and is stored in the table file header so a
//! reader can detect a manifest/companion-file mismatch.

use crate::error::{Error, ErrorCode, Result};
use crate::types::{ColumnId, DataType};

// ============================================================================
// Column Definition
// ============================================================================

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnDef {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnDef {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Ordered set of column definitions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        let mut schema = Schema::default();
        for col in columns {
            schema.add_column(col)?;
        }
        Ok(schema)
    }

    /// Append a column; duplicate names are a conflict
    pub fn add_column(&mut self, col: ColumnDef) -> Result<()> {
        if self.find_column(&col.name).is_some() {
            return Err(Error::with_message(
                ErrorCode::Conflict,
                format!("duplicate column name: {}", col.name),
            ));
        }
        self.columns.push(col);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    /// Look up a column by name (case-sensitive)
    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Stable schema id: CRC-32 over the serialized definition
    pub fn schema_id(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for col in &self.columns {
            hasher.update(col.name.as_bytes());
            hasher.update(&[col.data_type as u8, col.nullable as u8]);
        }
        hasher.finalize()
    }

    /// Serialize for the statistics block: per column, name (u16 len +
    /// bytes), type tag, nullable flag
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for col in &self.columns {
            out.extend_from_slice(&(col.name.len() as u16).to_le_bytes());
            out.extend_from_slice(col.name.as_bytes());
            out.push(col.data_type as u8);
            out.push(col.nullable as u8);
        }
        out
    }

    /// Inverse of `serialize`
    pub fn deserialize(data: &[u8]) -> Result<(Schema, usize)> {
        let frame_err = || Error::with_message(ErrorCode::InvalidFrame, "truncated schema block");
        let mut pos = 0usize;
        if data.len() < 4 {
            return Err(frame_err());
        }
        let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        pos += 4;

        let mut schema = Schema::default();
        for _ in 0..count {
            if pos + 2 > data.len() {
                return Err(frame_err());
            }
            let name_len = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            if pos + name_len + 2 > data.len() {
                return Err(frame_err());
            }
            let name = String::from_utf8(data[pos..pos + name_len].to_vec())
                .map_err(|_| Error::with_message(ErrorCode::InvalidFrame, "non-UTF-8 column name"))?;
            pos += name_len;
            let data_type = DataType::from_u8(data[pos])?;
            let nullable = data[pos + 1] != 0;
            pos += 2;
            schema.add_column(ColumnDef {
                name,
                data_type,
                nullable,
            })?;
        }
        Ok((schema, pos))
    }
}

impl std::ops::Index<usize> for Schema {
    type Output = ColumnDef;

    fn index(&self, idx: usize) -> &ColumnDef {
        &self.columns[idx]
    }
}

/// Column id assigned by declaration position
pub fn column_id_for(idx: usize) -> ColumnId {
    idx as ColumnId
}

// ============================================================================
// Tests
// ============================================================================
