//! Result-set merging
//!
//! During a resharding window a query is answered by both the current and
//! the former ring. The two payloads are combined by statement id: rows of
//! the first series are aligned positionally and a null value column on
//! one side is filled from the other. When both sides carry non-null
//! values the current ring wins. Rows unique to one side are not added;
//! shard-redundant reads are assumed to share a time base.

use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical result-set payload shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub results: Vec<StatementResult>,
}

/// One statement's sub-result inside a multi-statement response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Series>,
}

/// One series of a statement result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Merge two result-set payloads. Either side may be empty, in which case
/// the other is returned verbatim.
pub fn merge(current: &[u8], former: &[u8]) -> Result<Vec<u8>> {
    if current.is_empty() {
        return Ok(former.to_vec());
    }
    if former.is_empty() {
        return Ok(current.to_vec());
    }

    let mut left: ResultSet = serde_json::from_slice(current)?;
    let right: ResultSet = serde_json::from_slice(former)?;

    for r1 in &mut left.results {
        for r2 in &right.results {
            if r1.statement_id != r2.statement_id {
                continue;
            }
            if r1.series.is_empty() || r2.series.is_empty() {
                r1.series.extend(r2.series.iter().cloned());
            } else {
                merge_rows(&mut r1.series[0].values, &r2.series[0].values);
            }
        }
    }

    Ok(serde_json::to_vec(&left)?)
}

/// Positional null-fill over aligned rows sharing the key column
fn merge_rows(left: &mut [Vec<Value>], right: &[Vec<Value>]) {
    if left.len() != right.len() {
        return;
    }

    for (lv, rv) in left.iter_mut().zip(right) {
        if lv.first() != rv.first() {
            continue;
        }
        if lv.len() > 1 && rv.len() > 1 && lv[1].is_null() && !rv[1].is_null() {
            lv[1] = rv[1].clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_set(values: Value) -> Vec<u8> {
        json!({
            "results": [{
                "statement_id": 0,
                "series": [{
                    "name": "cpu_load_short",
                    "columns": ["time", "value"],
                    "values": values,
                }],
            }],
        })
        .to_string()
        .into_bytes()
    }

    fn merged_values(payload: &[u8]) -> Vec<Vec<Value>> {
        let decoded: ResultSet = serde_json::from_slice(payload).unwrap();
        decoded.results[0].series[0].values.clone()
    }

    #[test]
    fn test_empty_sides_pass_through() {
        let a = result_set(json!([["t1", 1.0]]));
        assert_eq!(merge(&a, b"").unwrap(), a);
        assert_eq!(merge(b"", &a).unwrap(), a);
        assert_eq!(merge(b"", b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_null_fill_both_directions() {
        let current = result_set(json!([["t1", null], ["t2", 0.55]]));
        let former = result_set(json!([["t1", 2], ["t2", null]]));

        let merged = merge(&current, &former).unwrap();
        assert_eq!(
            merged_values(&merged),
            vec![
                vec![json!("t1"), json!(2)],
                vec![json!("t2"), json!(0.55)]
            ]
        );
    }

    #[test]
    fn test_left_side_wins_on_conflict() {
        let current = result_set(json!([["t1", 0.55], ["t2", 0.64]]));
        let former = result_set(json!([["t1", 0.58], ["t2", null]]));

        let merged = merge(&current, &former).unwrap();
        assert_eq!(
            merged_values(&merged),
            vec![
                vec![json!("t1"), json!(0.55)],
                vec![json!("t2"), json!(0.64)]
            ]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = result_set(json!([["t1", null], ["t2", 0.55], ["t3", 0.64]]));
        let merged = merge(&a, &a).unwrap();
        assert_eq!(merged_values(&merged), merged_values(&a));
    }

    #[test]
    fn test_statement_without_series_takes_other_side() {
        let with_series = result_set(json!([["t1", 1.0]]));
        let bare = json!({"results": [{"statement_id": 0}]})
            .to_string()
            .into_bytes();

        let merged = merge(&with_series, &bare).unwrap();
        assert_eq!(merged_values(&merged), vec![vec![json!("t1"), json!(1.0)]]);

        // the bare side inherits the series wholesale
        let merged = merge(&bare, &with_series).unwrap();
        assert_eq!(merged_values(&merged), vec![vec![json!("t1"), json!(1.0)]]);
    }

    #[test]
    fn test_statement_ids_pair_results() {
        let left = json!({
            "results": [
                {"statement_id": 0, "series": [{"name": "cpu", "columns": ["time", "value"], "values": [["t1", null]]}]},
                {"statement_id": 1, "series": [{"name": "mem", "columns": ["time", "value"], "values": [["t1", 7]]}]},
            ],
        })
        .to_string()
        .into_bytes();
        let right = json!({
            "results": [
                {"statement_id": 1, "series": [{"name": "mem", "columns": ["time", "value"], "values": [["t1", null]]}]},
                {"statement_id": 0, "series": [{"name": "cpu", "columns": ["time", "value"], "values": [["t1", 3]]}]},
            ],
        })
        .to_string()
        .into_bytes();

        let decoded: ResultSet = serde_json::from_slice(&merge(&left, &right).unwrap()).unwrap();
        assert_eq!(decoded.results[0].series[0].values, vec![vec![json!("t1"), json!(3)]]);
        assert_eq!(decoded.results[1].series[0].values, vec![vec![json!("t1"), json!(7)]]);
    }

    #[test]
    fn test_misaligned_row_counts_keep_left() {
        let current = result_set(json!([["t1", null], ["t2", 1.0]]));
        let former = result_set(json!([["t1", 9.0]]));

        let merged = merge(&current, &former).unwrap();
        assert_eq!(
            merged_values(&merged),
            vec![vec![json!("t1"), Value::Null], vec![json!("t2"), json!(1.0)]]
        );
    }

    #[test]
    fn test_mismatched_key_column_is_not_filled() {
        let current = result_set(json!([["t1", null]]));
        let former = result_set(json!([["t9", 5.0]]));

        let merged = merge(&current, &former).unwrap();
        assert_eq!(merged_values(&merged), vec![vec![json!("t1"), Value::Null]]);
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(merge(b"not json", b"{\"results\":[]}").is_err());
        assert!(merge(b"{\"results\":[]}", b"not json").is_err());
    }
}
