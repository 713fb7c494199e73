use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result envelope handed back to clients. A single-row, single-column
/// result additionally collapses to a scalar value.
#[derive(Debug, Clone, Serialize)]
pub struct ShapedResult {
    pub kind: &'static str,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

pub fn shape(columns: &[String], rows: &[BTreeMap<String, Value>]) -> ShapedResult {
    if rows.len() == 1 && columns.len() == 1 {
        let value = rows[0].get(&columns[0]).cloned().unwrap_or(Value::Null);
        return ShapedResult {
            kind: "scalar",
            columns: columns.to_vec(),
            rows: rows.to_vec(),
            value: Some(value),
        };
    }

    ShapedResult {
        kind: "table",
        columns: columns.to_vec(),
        rows: rows.to_vec(),
        value: None,
    }
}
