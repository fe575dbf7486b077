pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  suite TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  config_json TEXT
);

CREATE TABLE IF NOT EXISTS results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  target TEXT NOT NULL,
  policy TEXT NOT NULL,
  status TEXT NOT NULL,
  state_reached TEXT,
  failure_kind TEXT,
  failing_step INTEGER,
  duration_ms INTEGER,
  result_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS divergences (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  target TEXT NOT NULL,
  divergence_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id);
CREATE INDEX IF NOT EXISTS idx_results_target_policy ON results(target, policy);
"#;
