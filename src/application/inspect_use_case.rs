// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Quick sanity check of a raw dataset before training: reads
// the first N rows and reports shape, columns, click
// distribution and the highest-cardinality feature columns.
//
// A file without the label column fails here with a schema
// error, the same way a training run would.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use rayon::prelude::*;

use crate::data::loader::CsvChunkReader;
use crate::domain::row::{ID_COLUMN, LABEL_COLUMN};

pub const DEFAULT_INSPECT_ROWS: usize = 200_000;
pub const TOP_COLUMNS: usize = 15;

#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub data_path: PathBuf,
    pub nrows:     usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetProfile {
    pub rows: usize,
    /// Every column in file order, label included
    pub columns: Vec<String>,
    /// (label, count), most frequent first
    pub label_counts: Vec<(u8, usize)>,
    /// (column, distinct non-missing values), highest first
    pub top_cardinality: Vec<(String, usize)>,
}

impl std::fmt::Display for DatasetProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "shape: ({}, {})", self.rows, self.columns.len())?;
        writeln!(f, "columns: {:?}", self.columns)?;
        writeln!(f, "\n{LABEL_COLUMN} distribution:")?;
        for (label, count) in &self.label_counts {
            writeln!(f, "{label:<4} {count}")?;
        }
        writeln!(f, "\nTop unique columns (first {TOP_COLUMNS}):")?;
        let width = self.top_cardinality.iter().map(|(c, _)| c.len()).max().unwrap_or(0);
        for (column, n) in &self.top_cardinality {
            writeln!(f, "{column:<width$} {n}")?;
        }
        Ok(())
    }
}

pub struct InspectUseCase {
    config: InspectConfig,
}

impl InspectUseCase {
    pub fn new(config: InspectConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<DatasetProfile> {
        let n = self.config.nrows.max(1);
        let mut reader = CsvChunkReader::open(&self.config.data_path, n)?;
        let feature_columns = reader.columns().clone();

        let mut columns: Vec<String> = feature_columns.to_vec();
        // Report the label where the file has it: after the id column
        let label_at = columns.iter().position(|c| c == ID_COLUMN).map_or(0, |i| i + 1);
        columns.insert(label_at, LABEL_COLUMN.to_string());

        let Some(chunk) = reader.read_rows(n)? else {
            return Ok(DatasetProfile {
                rows: 0,
                columns,
                label_counts: Vec::new(),
                top_cardinality: Vec::new(),
            });
        };

        let positives = chunk.rows.iter().filter(|r| r.label == 1).count();
        let mut label_counts = vec![(0u8, chunk.len() - positives), (1u8, positives)];
        label_counts.retain(|(_, c)| *c > 0);
        label_counts.sort_by(|a, b| b.1.cmp(&a.1));

        let mut top_cardinality: Vec<(String, usize)> = feature_columns
            .par_iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != ID_COLUMN)
            .map(|(i, name)| {
                let distinct: HashSet<&str> = chunk
                    .rows
                    .iter()
                    .filter_map(|r| r.values[i].as_deref())
                    .collect();
                (name.clone(), distinct.len())
            })
            .collect();
        top_cardinality.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_cardinality.truncate(TOP_COLUMNS);

        tracing::info!("Inspected {} rows of '{}'", chunk.len(), self.config.data_path.display());
        Ok(DatasetProfile {
            rows: chunk.len(),
            columns,
            label_counts,
            top_cardinality,
        })
    }
}
