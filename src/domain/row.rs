// ============================================================
// Layer 3 — Row and Chunk Domain Types
// ============================================================
// A Row is one labelled impression: a click label in {0, 1}
// plus the raw categorical values of every other column.
//
// Values are aligned with the owning chunk's column list, so a
// row never repeats field names. A value of None means the
// source cell was missing (empty, NaN, null, ...).
//
// A Chunk is the unit of work of the streaming trainer: a
// contiguous batch of rows sharing one column schema.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Row identifier column, never tokenised
pub const ID_COLUMN: &str = "id";

/// Label column, never tokenised
pub const LABEL_COLUMN: &str = "click";

/// The two classes every model declares on its first fit
pub const CLASSES: [u8; 2] = [0, 1];

/// One labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// 1 = click, 0 = no click
    pub label: u8,

    /// Raw values aligned with `Chunk::columns`
    pub values: Vec<Option<String>>,
}

impl Row {
    pub fn new(label: u8, values: Vec<Option<String>>) -> Self {
        Self { label, values }
    }
}

/// A contiguous batch of rows read in one step from the stream.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Column names (label column excluded), shared by every chunk of a stream
    pub columns: Arc<[String]>,

    /// Rows in stream order
    pub rows: Vec<Row>,
}

impl Chunk {
    pub fn new(columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Labels in row order
    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }

    /// Index of a named column, if present
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_follow_row_order() {
        let cols: Arc<[String]> = vec!["site_id".to_string()].into();
        let chunk = Chunk::new(
            cols,
            vec![
                Row::new(1, vec![Some("s1".into())]),
                Row::new(0, vec![None]),
            ],
        );
        assert_eq!(chunk.labels(), vec![1, 0]);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.column_index("site_id"), Some(0));
        assert_eq!(chunk.column_index("app_id"), None);
    }
}
