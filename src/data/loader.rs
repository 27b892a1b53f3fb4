// ============================================================
// Layer 4 — CSV Chunk Loader
// ============================================================
// Streams a CSV file (plain or gzip) as fixed-size chunks of
// labelled rows, so a multi-gigabyte dataset is processed in
// bounded memory: only one chunk is ever materialised.
//
// Layout expected:
//   id,click,hour,C1,banner_pos,site_id,...
//   1000009418151094273,0,14102100,1005,0,1fbe01fe,...
//
//   - the header row names the columns
//   - `click` is the label and must be present (schema error
//     otherwise), with values 0 or 1
//   - every other column is kept as a raw string; the usual
//     NA spellings (empty, NaN, null, None, ...) become None
//
// Gzip is detected from the magic bytes, not the file name.
//
// The stream is sequential only. Reaching chunk N means
// reading chunks 0..N (see ChunkSource::skip_chunks).
//
// Reference: csv crate documentation, flate2 crate documentation

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

use crate::domain::error::CtrError;
use crate::domain::row::{Chunk, Row, LABEL_COLUMN};
use crate::domain::traits::ChunkSource;

/// Raw cell spellings treated as missing values.
pub const MISSING_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "<NA>", "#N/A",
];

pub fn is_missing(raw: &str) -> bool {
    MISSING_MARKERS.contains(&raw)
}

/// Parse a label cell into {0, 1}. Accepts integral floats ("1.0").
pub fn parse_label(raw: &str, row_number: u64) -> Result<u8, CtrError> {
    let trimmed = raw.trim();
    let value = trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        });

    match value {
        Some(0) => Ok(0),
        Some(1) => Ok(1),
        _ => Err(CtrError::schema(format!(
            "row {row_number}: label '{raw}' in column '{LABEL_COLUMN}' is not 0 or 1"
        ))),
    }
}

pub struct CsvChunkReader {
    reader: csv::Reader<Box<dyn Read>>,
    /// Feature columns in file order, label excluded
    columns: Arc<[String]>,
    /// Record positions of `columns`
    field_positions: Vec<usize>,
    label_position: usize,
    chunk_size: usize,
    record: csv::StringRecord,
    rows_read: u64,
    chunks_read: u64,
}

impl CsvChunkReader {
    /// Open a CSV file, gzip-compressed or not.
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open data file '{}'", path.display()))?;

        let mut buffered = BufReader::new(file);
        let is_gzip = buffered
            .fill_buf()
            .with_context(|| format!("Cannot read data file '{}'", path.display()))?
            .starts_with(&[0x1f, 0x8b]);

        let inner: Box<dyn Read> = if is_gzip {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };

        tracing::debug!("Opened '{}' (gzip={})", path.display(), is_gzip);
        Self::from_boxed(inner, chunk_size)
    }

    /// Stream chunks from any reader (used by tests and stdin).
    pub fn from_reader<R: Read + 'static>(reader: R, chunk_size: usize) -> Result<Self> {
        Self::from_boxed(Box::new(reader), chunk_size)
    }

    fn from_boxed(inner: Box<dyn Read>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CtrError::config("chunk_size must be at least 1").into());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(inner);

        let headers = reader.headers().context("Cannot read CSV header")?.clone();

        let label_position = headers
            .iter()
            .position(|h| h == LABEL_COLUMN)
            .ok_or_else(|| {
                CtrError::schema(format!(
                    "required label column '{LABEL_COLUMN}' not found in header [{}]",
                    headers.iter().collect::<Vec<_>>().join(", ")
                ))
            })?;

        let (field_positions, columns): (Vec<usize>, Vec<String>) = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != label_position)
            .map(|(i, h)| (i, h.to_string()))
            .unzip();

        Ok(Self {
            reader,
            columns: columns.into(),
            field_positions,
            label_position,
            chunk_size,
            record: csv::StringRecord::new(),
            rows_read: 0,
            chunks_read: 0,
        })
    }

    pub fn columns(&self) -> &Arc<[String]> {
        &self.columns
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Data rows consumed so far (header excluded).
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    /// Read up to `n` rows. None once the stream is exhausted.
    pub fn read_rows(&mut self, n: usize) -> Result<Option<Chunk>> {
        let mut rows = Vec::with_capacity(n.min(1 << 16));

        while rows.len() < n {
            let more = self
                .reader
                .read_record(&mut self.record)
                .with_context(|| format!("Malformed CSV near data row {}", self.rows_read + 1))?;
            if !more {
                break;
            }
            self.rows_read += 1;

            let label = parse_label(&self.record[self.label_position], self.rows_read)?;
            let values = self
                .field_positions
                .iter()
                .map(|&p| {
                    let raw = &self.record[p];
                    (!is_missing(raw)).then(|| raw.to_string())
                })
                .collect();

            rows.push(Row::new(label, values));
        }

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Chunk::new(self.columns.clone(), rows)))
    }
}

impl ChunkSource for CsvChunkReader {
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let chunk = self.read_rows(self.chunk_size)?;
        if chunk.is_some() {
            self.chunks_read += 1;
        }
        Ok(chunk)
    }
}
