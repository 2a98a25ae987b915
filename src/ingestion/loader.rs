use super::types::Record;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;

/// A sequential reader over the bulk dataset.
pub trait RecordSource {
    /// The next record, or `None` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;
}

/// CSV-backed record source.
///
/// The column named by `key_field` becomes the record key; every other column
/// is carried as an opaque field.
pub struct CsvSource {
    reader: csv::Reader<File>,
    headers: csv::StringRecord,
    key_index: usize,
}

impl CsvSource {
    pub fn open(path: &Path, key_field: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open dataset {}", path.display()))?;
        let headers = reader.headers()?.clone();
        let key_index = headers
            .iter()
            .position(|header| header == key_field)
            .ok_or_else(|| {
                anyhow!(
                    "key column `{}` not found in {}",
                    key_field,
                    path.display()
                )
            })?;

        Ok(Self {
            reader,
            headers,
            key_index,
        })
    }
}

impl RecordSource for CsvSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        let mut row = csv::StringRecord::new();
        if !self.reader.read_record(&mut row)? {
            return Ok(None);
        }

        let key = row
            .get(self.key_index)
            .unwrap_or_default()
            .to_string();
        let fields = self
            .headers
            .iter()
            .zip(row.iter())
            .enumerate()
            .filter(|(index, _)| *index != self.key_index)
            .map(|(_, (header, value))| (header.to_string(), value.to_string()))
            .collect();

        Ok(Some(Record { key, fields }))
    }
}
