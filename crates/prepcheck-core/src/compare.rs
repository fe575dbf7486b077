use crate::model::{ExpectedState, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MismatchKind {
    RowCount { expected: usize, observed: usize },
    Values,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mismatch {
    pub step: usize,
    pub kind: MismatchKind,
    pub expected: Vec<Row>,
    pub observed: Vec<Row>,
}

impl Mismatch {
    pub fn message(&self) -> String {
        match &self.kind {
            MismatchKind::RowCount { expected, observed } => format!(
                "row count mismatch at step {}: expected {} row(s), observed {}",
                self.step, expected, observed
            ),
            MismatchKind::Values => format!(
                "value mismatch at step {}: expected {}, observed {}",
                self.step,
                render_rows(&self.expected),
                render_rows(&self.observed)
            ),
        }
    }
}

/// Checks observed rows against a checkpoint.
///
/// Observed rows are projected onto the columns the expected rows mention, so
/// a `SELECT *` checkpoint only has to spell out the columns it cares about.
/// Comparison is multiset-based unless `expected.ordered` is set.
pub fn compare(step: usize, expected: &ExpectedState, observed: &[Row]) -> Result<(), Mismatch> {
    if expected.rows.len() != observed.len() {
        return Err(Mismatch {
            step,
            kind: MismatchKind::RowCount {
                expected: expected.rows.len(),
                observed: observed.len(),
            },
            expected: expected.rows.clone(),
            observed: observed.to_vec(),
        });
    }

    let columns: BTreeSet<&str> = expected
        .rows
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();
    let mut projected: Vec<Row> = observed.iter().map(|r| project(r, &columns)).collect();
    let mut wanted = expected.rows.clone();

    if !expected.ordered {
        projected.sort();
        wanted.sort();
    }

    if projected == wanted {
        Ok(())
    } else {
        Err(Mismatch {
            step,
            kind: MismatchKind::Values,
            expected: expected.rows.clone(),
            observed: observed.to_vec(),
        })
    }
}

fn project(row: &Row, columns: &BTreeSet<&str>) -> Row {
    row.iter()
        .filter(|(k, _)| columns.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn render_rows(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "{}".into();
    }
    let parts: Vec<String> = rows
        .iter()
        .map(|r| {
            let cells: Vec<String> = r.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    format!("{{{}}}", parts.join(", "))
}
