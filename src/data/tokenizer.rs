// ============================================================
// Layer 4 — Feature Tokenizer
// ============================================================
// Turns one row of raw categorical values into a SET of opaque
// string tokens, the input of feature hashing.
//
// Token shapes:
//   base  → "site_id=1fbe01fe"
//   cross → "cross:site_id=1fbe01fe|app_id=ecad2386"
//
// Rules:
//   - the id and label columns are never tokenised
//   - a missing value produces no token, base or cross,
//     for that row only
//   - a cross pair naming a column the schema lacks is
//     dropped once, at construction, without error
//   - '|' and '=' inside a value are escaped to %7C / %3D so
//     a value can never impersonate a separator ('%' itself
//     is not escaped, so a literal "%3D" in the data reads the
//     same as an escaped '=')
//
// Column positions are resolved once per schema, so tokenising
// a row is a single pass over its values.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::domain::features::CrossPair;
use crate::domain::row::{Chunk, ID_COLUMN, LABEL_COLUMN};

/// The token set of one row. Ordered, so equal sets compare and
/// iterate identically regardless of input column order.
pub type TokenSet = BTreeSet<String>;

/// Escape the two token separators inside a raw value.
pub fn escape_token_part(value: &str) -> String {
    value.replace('|', "%7C").replace('=', "%3D")
}

pub fn base_token(field: &str, value: &str) -> String {
    format!("{field}={}", escape_token_part(value))
}

pub fn cross_token(field_a: &str, value_a: &str, field_b: &str, value_b: &str) -> String {
    format!(
        "cross:{field_a}={}|{field_b}={}",
        escape_token_part(value_a),
        escape_token_part(value_b)
    )
}

/// A cross pair whose two columns both exist in the schema.
#[derive(Debug, Clone)]
struct ActiveCross {
    a: String,
    a_idx: usize,
    b: String,
    b_idx: usize,
}

/// Tokenizer bound to one column schema.
#[derive(Debug, Clone)]
pub struct FeatureTokenizer {
    /// (column index, column name) of every tokenised field
    base: Vec<(usize, String)>,
    crosses: Vec<ActiveCross>,
}

impl FeatureTokenizer {
    /// Resolve column positions for `columns`. Cross pairs are only
    /// consulted when `use_cross` is set.
    pub fn new(columns: &[String], use_cross: bool, cross_pairs: &[CrossPair]) -> Self {
        let base: Vec<(usize, String)> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() != ID_COLUMN && c.as_str() != LABEL_COLUMN)
            .map(|(i, c)| (i, c.clone()))
            .collect();

        let position = |name: &str| base.iter().find(|(_, c)| c == name).map(|(i, _)| *i);

        let crosses = if use_cross {
            cross_pairs
                .iter()
                .filter_map(|p| {
                    let a_idx = position(&p.a)?;
                    let b_idx = position(&p.b)?;
                    Some(ActiveCross { a: p.a.clone(), a_idx, b: p.b.clone(), b_idx })
                })
                .collect()
        } else {
            Vec::new()
        };

        Self { base, crosses }
    }

    /// Tokenizer for the schema of `chunk`.
    pub fn for_chunk(chunk: &Chunk, use_cross: bool, cross_pairs: &[CrossPair]) -> Self {
        Self::new(&chunk.columns, use_cross, cross_pairs)
    }

    /// How many declared cross pairs survived schema gating.
    pub fn active_cross_pairs(&self) -> usize {
        self.crosses.len()
    }

    /// Token set of one row. `values` is aligned with the schema columns.
    pub fn tokenize(&self, values: &[Option<String>]) -> TokenSet {
        let get = |i: usize| values.get(i).and_then(|v| v.as_deref());

        let mut tokens = TokenSet::new();

        for (idx, field) in &self.base {
            if let Some(v) = get(*idx) {
                tokens.insert(base_token(field, v));
            }
        }

        for c in &self.crosses {
            if let (Some(va), Some(vb)) = (get(c.a_idx), get(c.b_idx)) {
                tokens.insert(cross_token(&c.a, va, &c.b, vb));
            }
        }

        tokens
    }

    pub fn tokenize_chunk(&self, chunk: &Chunk) -> Vec<TokenSet> {
        chunk.rows.iter().map(|r| self.tokenize(&r.values)).collect()
    }
}

/// Stringify one JSON request value. `null` is the only missing value.
fn json_value_to_raw(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Tokenise a serving request `{field: value}` with the same rules as
/// a training row whose schema is the request's keys.
pub fn tokenize_map(
    features: &Map<String, Value>,
    use_cross: bool,
    cross_pairs: &[CrossPair],
) -> TokenSet {
    let columns: Vec<String> = features.keys().cloned().collect();
    let values: Vec<Option<String>> = features.values().map(json_value_to_raw).collect();
    FeatureTokenizer::new(&columns, use_cross, cross_pairs).tokenize(&values)
}
