//! The cache-boundary scenario.
//!
//! The same `INSERT ... SELECT` template is bound twice with different values
//! (V0 during the update pass, V1 = V0 + suffix during the delete pass). A
//! client that wrongly reuses the first binding makes the delete pass match
//! nothing, which the final checkpoint catches.

use crate::model::{row, ExpectedState, Row, Scenario, ScenarioState, ScenarioStep, Value};
use serde::{Deserialize, Serialize};

pub const CANONICAL_TITLE: &str = "MySQL and JSON";
pub const CANONICAL_SUFFIX: &str = ": A Practical Programming Guide";

/// Declared width of the text column, in characters.
pub const TEXT_COLUMN_CHARS: usize = 255;

/// Binary collation so the engine compares texts the way the expected rows
/// are derived: byte for byte, case and accents significant.
pub const TEXT_COLLATION: &str = "utf8mb4_bin";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRow {
    pub key: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_staging_table")]
    pub staging_table: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_text_column")]
    pub text_column: String,
    /// Storage engine clause for the base table; `None` omits it.
    #[serde(default = "default_engine")]
    pub engine: Option<String>,
    #[serde(default = "default_seed")]
    pub seed: Vec<SeedRow>,
    #[serde(default = "default_filter_value")]
    pub filter_value: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_table() -> String {
    "Book".into()
}
fn default_staging_table() -> String {
    "ht_Book".into()
}
fn default_key_column() -> String {
    "id".into()
}
fn default_text_column() -> String {
    "title".into()
}
fn default_engine() -> Option<String> {
    Some("InnoDB".into())
}
fn default_seed() -> Vec<SeedRow> {
    vec![SeedRow {
        key: 1,
        text: CANONICAL_TITLE.into(),
    }]
}
fn default_filter_value() -> String {
    CANONICAL_TITLE.into()
}
fn default_suffix() -> String {
    CANONICAL_SUFFIX.into()
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            staging_table: default_staging_table(),
            key_column: default_key_column(),
            text_column: default_text_column(),
            engine: default_engine(),
            seed: default_seed(),
            filter_value: default_filter_value(),
            suffix: default_suffix(),
        }
    }
}

impl ScenarioConfig {
    /// The value the delete pass filters on.
    pub fn updated_value(&self) -> String {
        format!("{}{}", self.filter_value, self.suffix)
    }

    pub fn identifiers(&self) -> [(&'static str, &str); 4] {
        [
            ("table", self.table.as_str()),
            ("staging_table", self.staging_table.as_str()),
            ("key_column", self.key_column.as_str()),
            ("text_column", self.text_column.as_str()),
        ]
    }
}

/// How a staging pass changes the base table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AppendSuffix(String),
    Delete,
}

/// One staging pass: collect keys whose text equals `filter` into the
/// staging table, mutate the base table by key, drop the staging table.
#[derive(Debug, Clone)]
pub struct StagingPass<'a> {
    pub cfg: &'a ScenarioConfig,
    pub label: &'static str,
    pub filter: String,
    pub mutation: Mutation,
}

impl StagingPass<'_> {
    pub fn steps(&self) -> Vec<ScenarioStep> {
        let c = self.cfg;
        let (t, s, k, x) = (&c.table, &c.staging_table, &c.key_column, &c.text_column);

        let mutate = match &self.mutation {
            Mutation::AppendSuffix(suffix) => ScenarioStep::new(
                format!("{}: append suffix to staged rows", self.label),
                format!("UPDATE {t} SET {x}=CONCAT({x}, ?) WHERE ({k}) IN (SELECT {k} FROM {s})"),
            )
            .bind(suffix.as_str()),
            Mutation::Delete => ScenarioStep::new(
                format!("{}: delete staged rows", self.label),
                format!("DELETE FROM {t} WHERE ({k}) IN (SELECT {k} FROM {s})"),
            ),
        };

        vec![
            ScenarioStep::new(
                format!("{}: create staging table", self.label),
                format!("CREATE TEMPORARY TABLE IF NOT EXISTS {s} ({k} INTEGER NOT NULL)"),
            ),
            ScenarioStep::new(
                format!("{}: stage keys where {} = {:?}", self.label, x, self.filter),
                staging_insert_sql(c),
            )
            .bind(self.filter.as_str()),
            mutate,
            ScenarioStep::new(
                format!("{}: drop staging table", self.label),
                format!("DROP TEMPORARY TABLE {s}"),
            ),
        ]
    }
}

/// Identical text for both passes; only the binding differs.
pub fn staging_insert_sql(c: &ScenarioConfig) -> String {
    let (t, s, k, x) = (&c.table, &c.staging_table, &c.key_column, &c.text_column);
    format!(
        "INSERT INTO {s} SELECT sub.{k} FROM (SELECT {k}, {x} FROM {t} UNION ALL SELECT {k}, {x} FROM {t}) sub WHERE sub.{x} = ?"
    )
}

pub fn cache_boundary(cfg: &ScenarioConfig) -> Scenario {
    let (t, k, x) = (&cfg.table, &cfg.key_column, &cfg.text_column);
    let updated = cfg.updated_value();
    let mut steps = Vec::new();

    steps.push(ScenarioStep::new("setup: drop base table", format!("DROP TABLE IF EXISTS {t}")));
    let engine = cfg
        .engine
        .as_deref()
        .map(|e| format!(" ENGINE = {}", e))
        .unwrap_or_default();
    steps.push(
        ScenarioStep::new(
            "setup: create base table",
            format!(
                "CREATE TABLE {t} ({k} INTEGER NOT NULL, {x} VARCHAR({TEXT_COLUMN_CHARS}) COLLATE {TEXT_COLLATION}, PRIMARY KEY ({k})){engine}"
            ),
        )
        .enters(ScenarioState::Created),
    );

    for seed in &cfg.seed {
        steps.push(
            ScenarioStep::new(
                format!("seed: insert {}={}", k, seed.key),
                format!("INSERT INTO {t} ({k}, {x}) VALUES (?, ?)"),
            )
            .bind(seed.key)
            .bind(seed.text.as_str()),
        );
    }
    mark_last(&mut steps, ScenarioState::Seeded);

    steps.extend(
        StagingPass {
            cfg,
            label: "update",
            filter: cfg.filter_value.clone(),
            mutation: Mutation::AppendSuffix(cfg.suffix.clone()),
        }
        .steps(),
    );
    mark_last(&mut steps, ScenarioState::Updated);

    let after_update = expected_after_update(cfg);
    steps.push(
        ScenarioStep::new("verify: rows after update", format!("SELECT * FROM {t}"))
            .expect(ExpectedState::rows(to_rows(cfg, &after_update)))
            .enters(ScenarioState::VerifiedUpdate),
    );

    steps.extend(
        StagingPass {
            cfg,
            label: "delete",
            filter: updated.clone(),
            mutation: Mutation::Delete,
        }
        .steps(),
    );
    mark_last(&mut steps, ScenarioState::Deleted);

    let after_delete: Vec<SeedRow> = after_update.into_iter().filter(|r| r.text != updated).collect();
    steps.push(
        ScenarioStep::new("verify: rows after delete", format!("SELECT * FROM {t}"))
            .expect(ExpectedState::rows(to_rows(cfg, &after_delete)))
            .enters(ScenarioState::VerifiedDelete),
    );

    Scenario {
        name: "cache_boundary".into(),
        steps,
    }
}

// With no seed rows there is no insert step, so Seeded rides on table creation.
fn mark_last(steps: &mut [ScenarioStep], state: ScenarioState) {
    if let Some(last) = steps.last_mut() {
        last.enters = Some(state);
    }
}

fn expected_after_update(cfg: &ScenarioConfig) -> Vec<SeedRow> {
    cfg.seed
        .iter()
        .map(|r| {
            let text = if r.text == cfg.filter_value {
                format!("{}{}", r.text, cfg.suffix)
            } else {
                r.text.clone()
            };
            SeedRow { key: r.key, text }
        })
        .collect()
}

fn to_rows(cfg: &ScenarioConfig, rows: &[SeedRow]) -> Vec<Row> {
    rows.iter()
        .map(|r| {
            row([
                (cfg.key_column.clone(), Value::Int(r.key)),
                (cfg.text_column.clone(), Value::Text(r.text.clone())),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoints(s: &Scenario) -> Vec<&ExpectedState> {
        s.steps.iter().filter_map(|st| st.checkpoint.as_ref()).collect()
    }

    #[test]
    fn test_canonical_expectations() {
        let s = cache_boundary(&ScenarioConfig::default());
        let cps = checkpoints(&s);
        assert_eq!(cps.len(), 2);
        assert_eq!(
            cps[0].rows,
            vec![row([
                ("id", Value::Int(1)),
                ("title", Value::text("MySQL and JSON: A Practical Programming Guide"))
            ])]
        );
        assert_eq!(cps[1].row_count(), 0);
    }

    #[test]
    fn test_setup_drops_before_create() {
        let s = cache_boundary(&ScenarioConfig::default());
        assert_eq!(s.steps[0].sql, "DROP TABLE IF EXISTS Book");
        assert_eq!(
            s.steps[1].sql,
            "CREATE TABLE Book (id INTEGER NOT NULL, title VARCHAR(255) COLLATE utf8mb4_bin, PRIMARY KEY (id)) ENGINE = InnoDB"
        );
    }

    #[test]
    fn test_case_variants_of_the_filter_are_left_alone() {
        let cfg = ScenarioConfig {
            seed: vec![
                SeedRow {
                    key: 1,
                    text: CANONICAL_TITLE.into(),
                },
                SeedRow {
                    key: 2,
                    text: "mysql and json".into(),
                },
            ],
            ..Default::default()
        };
        let s = cache_boundary(&cfg);
        assert!(s.steps[1].sql.contains("title VARCHAR(255) COLLATE utf8mb4_bin"));

        let cps = checkpoints(&s);
        assert_eq!(
            cps[0].rows,
            vec![
                row([("id", Value::Int(1)), ("title", Value::text(cfg.updated_value()))]),
                row([("id", Value::Int(2)), ("title", Value::text("mysql and json"))]),
            ]
        );
        assert_eq!(
            cps[1].rows,
            vec![row([("id", Value::Int(2)), ("title", Value::text("mysql and json"))])]
        );
    }

    #[test]
    fn test_both_passes_share_the_staging_template() {
        let cfg = ScenarioConfig::default();
        let s = cache_boundary(&cfg);
        let staged: Vec<&ScenarioStep> = s
            .steps
            .iter()
            .filter(|st| st.sql == staging_insert_sql(&cfg))
            .collect();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].params, vec![Value::text("MySQL and JSON")]);
        assert_eq!(
            staged[1].params,
            vec![Value::text("MySQL and JSON: A Practical Programming Guide")]
        );
    }

    #[test]
    fn test_states_move_forward() {
        let s = cache_boundary(&ScenarioConfig::default());
        let states: Vec<ScenarioState> = s.steps.iter().filter_map(|st| st.enters).collect();
        assert_eq!(
            states,
            vec![
                ScenarioState::Created,
                ScenarioState::Seeded,
                ScenarioState::Updated,
                ScenarioState::VerifiedUpdate,
                ScenarioState::Deleted,
                ScenarioState::VerifiedDelete,
            ]
        );
    }

    #[test]
    fn test_zero_row_boundary() {
        let cfg = ScenarioConfig {
            seed: vec![],
            ..Default::default()
        };
        let s = cache_boundary(&cfg);
        assert!(checkpoints(&s).iter().all(|cp| cp.row_count() == 0));
        // Created and Seeded collapse onto the create step.
        assert_eq!(s.steps[1].enters, Some(ScenarioState::Seeded));
    }

    #[test]
    fn test_multi_row_boundary_only_updates_match() {
        let cfg = ScenarioConfig {
            seed: vec![
                SeedRow {
                    key: 1,
                    text: CANONICAL_TITLE.into(),
                },
                SeedRow {
                    key: 2,
                    text: "High Performance MySQL".into(),
                },
            ],
            ..Default::default()
        };
        let s = cache_boundary(&cfg);
        let cps = checkpoints(&s);
        assert!(cps[0].rows.contains(&row([
            ("id", Value::Int(2)),
            ("title", Value::text("High Performance MySQL"))
        ])));
        assert_eq!(
            cps[1].rows,
            vec![row([
                ("id", Value::Int(2)),
                ("title", Value::text("High Performance MySQL"))
            ])]
        );
    }
}
