//! # Table Schema and Binary Codec
//!
//! A table's schema is a column list persisted as a compact binary blob on
//! page 1 of its `.ibd` file. The core never interprets column type strings;
//! they ride through serialization untouched for the SQL layer to consume.
//!
//! ## Schema Binary Format
//!
//! ```text
//! +--------------------+
//! | num_columns   (2B) |
//! | table_name_len(2B) |
//! | table_name         |  variable length
//! | column_1           |
//! | column_2           |
//! | ...                |
//! +--------------------+
//!
//! Column:
//! +--------------------+
//! | name_len      (2B) |
//! | name               |  variable length
//! | type_len      (2B) |
//! | type               |  variable length, e.g. "INT", "VARCHAR(255)"
//! | flags         (1B) |
//! +--------------------+
//! ```
//!
//! Flag bits: bit 0 PRIMARY_KEY, bit 1 UNIQUE, bit 2 NOT_NULL,
//! bit 3 AUTO_INCREMENT. All integers little-endian.
//!
//! Deserialization is fully bounds-checked; any truncation, overrun, or
//! trailing garbage yields an invalid-schema error rather than a partial
//! schema.

use eyre::Result;

use crate::errors::invalid_schema;

pub const COL_FLAG_PRIMARY_KEY: u8 = 1 << 0;
pub const COL_FLAG_UNIQUE: u8 = 1 << 1;
pub const COL_FLAG_NOT_NULL: u8 = 1 << 2;
pub const COL_FLAG_AUTO_INCREMENT: u8 = 1 << 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    pub auto_increment: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            primary_key: false,
            unique: false,
            not_null: false,
            auto_increment: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.primary_key {
            flags |= COL_FLAG_PRIMARY_KEY;
        }
        if self.unique {
            flags |= COL_FLAG_UNIQUE;
        }
        if self.not_null {
            flags |= COL_FLAG_NOT_NULL;
        }
        if self.auto_increment {
            flags |= COL_FLAG_AUTO_INCREMENT;
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.columns.len() > u16::MAX as usize {
            return Err(invalid_schema(format!(
                "too many columns: {}",
                self.columns.len()
            )));
        }
        if self.table_name.len() > u16::MAX as usize {
            return Err(invalid_schema("table name exceeds u16 length"));
        }

        let mut out = Vec::with_capacity(16 + self.table_name.len() + 32 * self.columns.len());
        out.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.table_name.len() as u16).to_le_bytes());
        out.extend_from_slice(self.table_name.as_bytes());

        for col in &self.columns {
            if col.name.len() > u16::MAX as usize || col.data_type.len() > u16::MAX as usize {
                return Err(invalid_schema(format!(
                    "column '{}' name or type exceeds u16 length",
                    col.name
                )));
            }
            out.extend_from_slice(&(col.name.len() as u16).to_le_bytes());
            out.extend_from_slice(col.name.as_bytes());
            out.extend_from_slice(&(col.data_type.len() as u16).to_le_bytes());
            out.extend_from_slice(col.data_type.as_bytes());
            out.push(col.flags());
        }

        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let num_columns = cursor.read_u16("column count")?;
        let name_len = cursor.read_u16("table name length")? as usize;
        let table_name = cursor.read_str(name_len, "table name")?;

        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let col_name_len = cursor.read_u16("column name length")? as usize;
            let name = cursor.read_str(col_name_len, "column name")?;
            let type_len = cursor.read_u16("type length")? as usize;
            let data_type = cursor.read_str(type_len, "type string")?;
            let flags = cursor.read_u8("column flags")?;

            columns.push(ColumnDef {
                name,
                data_type,
                primary_key: flags & COL_FLAG_PRIMARY_KEY != 0,
                unique: flags & COL_FLAG_UNIQUE != 0,
                not_null: flags & COL_FLAG_NOT_NULL != 0,
                auto_increment: flags & COL_FLAG_AUTO_INCREMENT != 0,
            });
        }

        if !cursor.at_end() {
            return Err(invalid_schema(format!(
                "{} trailing bytes after last column",
                cursor.remaining()
            )));
        }

        Ok(Self {
            table_name,
            columns,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(invalid_schema(format!(
                "truncated while reading {what}: need {n} bytes at offset {}, have {}",
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_str(&mut self, len: usize, what: &str) -> Result<String> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| invalid_schema(format!("{what} is not valid utf-8")))
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
