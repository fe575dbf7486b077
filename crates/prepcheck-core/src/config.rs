use crate::errors::ConfigError;
use crate::model::{CachePolicy, EngineTarget};
use crate::scenario::{ScenarioConfig, TEXT_COLUMN_CHARS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default = "default_suite")]
    pub suite: String,
    #[serde(default = "default_targets")]
    pub targets: Vec<EngineTarget>,
    #[serde(default = "CachePolicy::standard_pair")]
    pub policies: Vec<CachePolicy>,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: Settings,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

fn default_suite() -> String {
    "stmt_cache".into()
}

/// The two builds the cache bug was first bisected between.
pub fn default_targets() -> Vec<EngineTarget> {
    vec![EngineTarget::mysql("8.0.29"), EngineTarget::mysql("8.0.28")]
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            suite: default_suite(),
            targets: default_targets(),
            policies: CachePolicy::standard_pair(),
            settings: Settings::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reuse_instances: Option<bool>,
}

fn is_default_settings(s: &Settings) -> bool {
    s == &Settings::default()
}

impl Settings {
    pub fn parallel(&self) -> usize {
        self.parallel.unwrap_or(2).max(1)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_seconds.unwrap_or(300))
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_seconds.unwrap_or(30))
    }

    pub fn reuse_instances(&self) -> bool {
        self.reuse_instances.unwrap_or(false)
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<HarnessConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict).map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<HarnessConfig, ConfigError> {
    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    let cfg: HarnessConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // YAML anchors conventionally live under `x-` or `_` keys.
    let mut unknown: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    unknown.sort();
    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!("unknown fields detected in strict mode: {:?}", unknown)));
        }
        tracing::warn!(event = "prepcheck.config.ignored_fields", fields = ?unknown, "ignored unknown config fields");
    }

    if cfg.version != 0 && cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: 0, {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    validate(&cfg)?;
    Ok(cfg)
}

pub fn validate(cfg: &HarnessConfig) -> Result<(), ConfigError> {
    if cfg.targets.is_empty() {
        return Err(ConfigError("config has no targets".into()));
    }
    if cfg.policies.is_empty() {
        return Err(ConfigError("config has no cache policies".into()));
    }

    let mut seen = HashSet::new();
    for t in &cfg.targets {
        if t.image.trim().is_empty() || t.version.trim().is_empty() {
            return Err(ConfigError(format!("target '{}' needs an image and a version", t)));
        }
        if !seen.insert(t.image_ref()) {
            return Err(ConfigError(format!("duplicate target '{}'", t)));
        }
    }

    let mut seen = HashSet::new();
    for p in &cfg.policies {
        if !seen.insert(p.clone()) {
            return Err(ConfigError(format!("duplicate cache policy ({})", p)));
        }
    }

    for (field, ident) in cfg.scenario.identifiers() {
        if !is_identifier(ident) {
            return Err(ConfigError(format!(
                "scenario.{} must be a plain SQL identifier, got '{}'",
                field, ident
            )));
        }
    }
    if cfg.scenario.table.eq_ignore_ascii_case(&cfg.scenario.staging_table) {
        return Err(ConfigError("scenario.staging_table must differ from scenario.table".into()));
    }
    if cfg.scenario.key_column.eq_ignore_ascii_case(&cfg.scenario.text_column) {
        return Err(ConfigError("scenario.key_column must differ from scenario.text_column".into()));
    }
    if let Some(engine) = &cfg.scenario.engine {
        if !is_identifier(engine) {
            return Err(ConfigError(format!("scenario.engine must be a plain identifier, got '{}'", engine)));
        }
    }

    let mut keys = HashSet::new();
    for r in &cfg.scenario.seed {
        if !keys.insert(r.key) {
            return Err(ConfigError(format!("scenario.seed has duplicate key {}", r.key)));
        }
        check_text("scenario.seed text", &r.text)?;
    }
    check_text("scenario.filter_value", &cfg.scenario.filter_value)?;
    check_text("scenario.filter_value + scenario.suffix", &cfg.scenario.updated_value())?;
    Ok(())
}

// The binary collation still pads, so trailing spaces would match on the
// server but not in the expected rows.
fn check_text(field: &str, text: &str) -> Result<(), ConfigError> {
    if text.chars().count() > TEXT_COLUMN_CHARS {
        return Err(ConfigError(format!(
            "{} exceeds {} characters: '{}'",
            field, TEXT_COLUMN_CHARS, text
        )));
    }
    if text.ends_with(' ') {
        return Err(ConfigError(format!("{} must not end with a space: '{}'", field, text)));
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
suite: stmt_cache
targets:
  - { registry: docker.io, image: mysql, version: "8.0.29" }
  - { registry: docker.io, image: mysql, version: "8.0.28" }
policies:
  - { mode: enabled, use_server_prepared_statements: true, prepared_statement_cache_size_limit: 2048 }
  - { mode: disabled, use_server_prepared_statements: true, prepared_statement_cache_size_limit: 2048 }
settings:
  parallel: 2
  provision_timeout_seconds: 300
  statement_timeout_seconds: 30
  reuse_instances: false
scenario:
  table: Book
  staging_table: ht_Book
  key_column: id
  text_column: title
  engine: InnoDB
  seed:
    - { key: 1, text: "MySQL and JSON" }
  filter_value: "MySQL and JSON"
  suffix: ": A Practical Programming Guide"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_matches_defaults() {
        let cfg = parse_config(SAMPLE_CONFIG, true).unwrap();
        let mut expected = HarnessConfig::default();
        expected.settings = Settings {
            parallel: Some(2),
            provision_timeout_seconds: Some(300),
            statement_timeout_seconds: Some(30),
            reuse_instances: Some(false),
        };
        assert_eq!(cfg, expected);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("suite: tiny\n", true).unwrap();
        assert_eq!(cfg.targets, default_targets());
        assert_eq!(cfg.policies, CachePolicy::standard_pair());
        assert_eq!(cfg.scenario, ScenarioConfig::default());
        assert_eq!(cfg.settings.parallel(), 2);
    }

    #[test]
    fn test_rejects_injected_identifier() {
        let err = parse_config("scenario:\n  table: \"Book; DROP DATABASE x\"\n", false).unwrap_err();
        assert!(err.0.contains("scenario.table"));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let err = parse_config("configVersion: 7\n", false).unwrap_err();
        assert!(err.0.contains("unsupported config version 7"));
    }

    #[test]
    fn test_rejects_duplicate_seed_keys() {
        let raw = "scenario:\n  seed:\n    - { key: 1, text: a }\n    - { key: 1, text: b }\n";
        assert!(parse_config(raw, false).is_err());
    }

    #[test]
    fn test_rejects_texts_the_column_cannot_hold_exactly() {
        let padded = "scenario:\n  seed:\n    - { key: 1, text: \"MySQL and JSON \" }\n";
        let err = parse_config(padded, false).unwrap_err();
        assert!(err.0.contains("must not end with a space"));

        let long = format!("scenario:\n  filter_value: \"{}\"\n", "x".repeat(240));
        let err = parse_config(&long, false).unwrap_err();
        assert!(err.0.contains("scenario.filter_value + scenario.suffix exceeds 255"));
    }

    #[test]
    fn test_unknown_fields_strict_vs_lenient() {
        let raw = "suite: x\nfuture_field: 1\nx-anchor: &a 3\n";
        assert!(parse_config(raw, false).is_ok());
        let err = parse_config(raw, true).unwrap_err();
        assert!(err.0.contains("future_field"));
        assert!(!err.0.contains("x-anchor"));
    }
}
