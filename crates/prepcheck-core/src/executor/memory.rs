//! In-process stand-in for a MySQL instance.
//!
//! Understands the statement shapes the cache-boundary scenario emits and
//! nothing more. Temporary tables live in the session, base tables in the
//! shared instance, primary keys are enforced. [`MemoryFaults`] can make a
//! session misbehave the way a broken statement cache does.

use super::{Connector, Session};
use crate::model::{ConnectionOptions, EngineTarget, Observation, Row, Value};
use crate::provision::{ConnectionParams, Provisioner};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryFaults {
    /// A cached `INSERT ... SELECT` keeps executing with its first binding.
    pub stale_plan_reuse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    StalePlanReuse,
}

impl FromStr for Fault {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stale-plan-reuse" => Ok(Fault::StalePlanReuse),
            other => Err(format!("unknown fault '{}' (known: stale-plan-reuse)", other)),
        }
    }
}

impl MemoryFaults {
    pub fn with(mut self, fault: Fault) -> Self {
        match fault {
            Fault::StalePlanReuse => self.stale_plan_reuse = true,
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    primary_key: Option<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Table>,
}

struct Instance {
    image: String,
    faults: MemoryFaults,
    db: Mutex<Database>,
}

impl Instance {
    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| anyhow!("memory instance lock poisoned"))
    }
}

/// Provisions in-memory instances and connects to them.
pub struct MemoryBackend {
    reuse: bool,
    faults: MemoryFaults,
    target_faults: HashMap<String, MemoryFaults>,
    instances: Mutex<HashMap<String, Arc<Instance>>>,
    next_id: AtomicU64,
    open_sessions: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new(reuse: bool) -> Self {
        Self {
            reuse,
            faults: MemoryFaults::default(),
            target_faults: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Faults for every target without its own entry.
    pub fn with_faults(mut self, faults: MemoryFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_target_faults(mut self, target: &EngineTarget, faults: MemoryFaults) -> Self {
        self.target_faults.insert(target.image_ref(), faults);
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Current contents of a base table, if the instance and table exist.
    pub fn snapshot(&self, params: &ConnectionParams, table: &str) -> Option<Vec<Row>> {
        let instance = self.instance(&params.instance_id).ok()?;
        let db = instance.lock().ok()?;
        db.tables.get(&table.to_ascii_lowercase()).map(|t| t.rows.clone())
    }

    fn instances(&self) -> anyhow::Result<MutexGuard<'_, HashMap<String, Arc<Instance>>>> {
        self.instances
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }

    fn instance(&self, id: &str) -> anyhow::Result<Arc<Instance>> {
        self.instances()?
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: no memory instance '{}'", id))
    }

    fn params(&self, id: &str) -> ConnectionParams {
        ConnectionParams {
            host: "memory".into(),
            port: 3306,
            user: "root".into(),
            password: None,
            database: Some("test".into()),
            reuse: self.reuse,
            instance_id: id.to_string(),
        }
    }
}

#[async_trait]
impl Provisioner for MemoryBackend {
    async fn provision(&self, target: &EngineTarget) -> anyhow::Result<ConnectionParams> {
        let image = target.image_ref();
        let mut instances = self.instances()?;

        if self.reuse {
            if let Some(id) = instances
                .iter()
                .find(|(_, i)| i.image == image)
                .map(|(id, _)| id.clone())
            {
                return Ok(self.params(&id));
            }
        }

        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let faults = self.target_faults.get(&image).copied().unwrap_or(self.faults);
        instances.insert(
            id.clone(),
            Arc::new(Instance {
                image,
                faults,
                db: Mutex::new(Database::default()),
            }),
        );
        Ok(self.params(&id))
    }

    async fn release(&self, params: &ConnectionParams) -> anyhow::Result<()> {
        if params.reuse {
            return Ok(());
        }
        self.instances()?
            .remove(&params.instance_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown memory instance '{}'", params.instance_id))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(
        &self,
        params: &ConnectionParams,
        options: &ConnectionOptions,
    ) -> anyhow::Result<Box<dyn Session>> {
        let instance = self.instance(&params.instance_id)?;
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            instance,
            options: *options,
            temp: HashMap::new(),
            first_bindings: HashMap::new(),
            open_sessions: self.open_sessions.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct MemorySession {
    instance: Arc<Instance>,
    options: ConnectionOptions,
    temp: HashMap<String, Table>,
    // Keyed by statement text; only filled for statements the options cache.
    first_bindings: HashMap<String, Vec<Value>>,
    open_sessions: Arc<AtomicUsize>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> anyhow::Result<Observation> {
        let stmt = parse(sql)?;
        let placeholders = placeholder_count(sql);
        if placeholders != params.len() {
            bail!(
                "Incorrect arguments to mysqld_stmt_execute: expected {} parameter(s), got {}",
                placeholders,
                params.len()
            );
        }

        let mut bound = params.to_vec();
        if self.options.caches(sql) {
            let first = self
                .first_bindings
                .entry(sql.to_string())
                .or_insert_with(|| params.to_vec());
            if self.instance.faults.stale_plan_reuse && matches!(stmt, Statement::InsertUnionSelect { .. }) {
                bound = first.clone();
            }
        }

        let instance = self.instance.clone();
        let mut db = instance.lock()?;
        apply(&mut self.temp, &mut db, stmt, &bound)
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Param,
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    DropTable {
        name: String,
        temporary: bool,
        if_exists: bool,
    },
    CreateTable {
        name: String,
        temporary: bool,
        if_not_exists: bool,
        columns: Vec<String>,
        primary_key: Option<String>,
    },
    InsertValues {
        table: String,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    InsertUnionSelect {
        target: String,
        sources: [(Vec<String>, String); 2],
        projected: String,
        filter_column: String,
        filter: Operand,
    },
    UpdateConcat {
        table: String,
        column: String,
        source_column: String,
        suffix: Operand,
        key: String,
        staging: String,
        staging_key: String,
    },
    DeleteIn {
        table: String,
        key: String,
        staging: String,
        staging_key: String,
    },
    Select {
        table: String,
        columns: Option<Vec<String>>,
    },
}

struct Patterns {
    drop: Regex,
    create: Regex,
    primary_key: Regex,
    insert_values: Regex,
    insert_union: Regex,
    update_concat: Regex,
    delete_in: Regex,
    select: Regex,
}

const OPERAND: &str = r"\?|'(?:[^']|'')*'|-?\d+|NULL";

fn patterns() -> anyhow::Result<&'static Patterns> {
    static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(build_patterns)
        .as_ref()
        .map_err(|e| anyhow!("invalid statement pattern: {}", e))
}

fn build_patterns() -> Result<Patterns, regex::Error> {
    let re = |p: &str| Regex::new(&format!("(?is)^{}$", p));
    Ok(Patterns {
        drop: re(r"DROP\s+(TEMPORARY\s+)?TABLE\s+(IF\s+EXISTS\s+)?(\w+)")?,
        create: re(
            r"CREATE\s+(TEMPORARY\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)\s*\((.*)\)(?:\s*ENGINE\s*=\s*\w+)?",
        )?,
        primary_key: re(r"PRIMARY\s+KEY\s*\(\s*(\w+)\s*\)")?,
        insert_values: re(r"INSERT\s+INTO\s+(\w+)\s*\(([^)]*)\)\s*VALUES\s*\((.*)\)")?,
        insert_union: re(&format!(
            r"INSERT\s+INTO\s+(\w+)\s+SELECT\s+(\w+)\.(\w+)\s+FROM\s+\(\s*SELECT\s+([\w\s,]+?)\s+FROM\s+(\w+)\s+UNION\s+ALL\s+SELECT\s+([\w\s,]+?)\s+FROM\s+(\w+)\s*\)\s*(?:AS\s+)?(\w+)\s+WHERE\s+(\w+)\.(\w+)\s*=\s*({})",
            OPERAND
        ))?,
        update_concat: re(&format!(
            r"UPDATE\s+(\w+)\s+SET\s+(\w+)\s*=\s*CONCAT\(\s*(\w+)\s*,\s*({})\s*\)\s+WHERE\s+\(?\s*(\w+)\s*\)?\s+IN\s+\(\s*SELECT\s+(\w+)\s+FROM\s+(\w+)\s*\)",
            OPERAND
        ))?,
        delete_in: re(
            r"DELETE\s+FROM\s+(\w+)\s+WHERE\s+\(?\s*(\w+)\s*\)?\s+IN\s+\(\s*SELECT\s+(\w+)\s+FROM\s+(\w+)\s*\)",
        )?,
        select: re(r"SELECT\s+(\*|[\w\s,]+?)\s+FROM\s+(\w+)")?,
    })
}

fn parse(sql: &str) -> anyhow::Result<Statement> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let p = patterns()?;

    if let Some(c) = p.drop.captures(sql) {
        return Ok(Statement::DropTable {
            name: c[3].to_string(),
            temporary: c.get(1).is_some(),
            if_exists: c.get(2).is_some(),
        });
    }
    if let Some(c) = p.create.captures(sql) {
        let mut columns = Vec::new();
        let mut primary_key = None;
        for def in split_top_level(&c[4]) {
            if let Some(pk) = p.primary_key.captures(&def) {
                primary_key = Some(pk[1].to_string());
                continue;
            }
            let name = def
                .split_whitespace()
                .next()
                .ok_or_else(|| anyhow!("You have an error in your SQL syntax near '{}'", &c[4]))?;
            if def.to_ascii_uppercase().contains("PRIMARY KEY") {
                primary_key = Some(name.to_string());
            }
            columns.push(name.to_string());
        }
        if let Some(pk) = &primary_key {
            if !columns.iter().any(|col| col.eq_ignore_ascii_case(pk)) {
                bail!("Key column '{}' doesn't exist in table", pk);
            }
        }
        return Ok(Statement::CreateTable {
            name: c[3].to_string(),
            temporary: c.get(1).is_some(),
            if_not_exists: c.get(2).is_some(),
            columns,
            primary_key,
        });
    }
    if let Some(c) = p.insert_union.captures(sql) {
        let (outer_alias, where_alias, alias) = (&c[2], &c[9], &c[8]);
        if !outer_alias.eq_ignore_ascii_case(alias) || !where_alias.eq_ignore_ascii_case(alias) {
            bail!("Unknown table alias in derived table reference");
        }
        return Ok(Statement::InsertUnionSelect {
            target: c[1].to_string(),
            sources: [
                (column_list(&c[4]), c[5].to_string()),
                (column_list(&c[6]), c[7].to_string()),
            ],
            projected: c[3].to_string(),
            filter_column: c[10].to_string(),
            filter: operand(&c[11])?,
        });
    }
    if let Some(c) = p.insert_values.captures(sql) {
        return Ok(Statement::InsertValues {
            table: c[1].to_string(),
            columns: column_list(&c[2]),
            values: split_top_level(&c[3])
                .iter()
                .map(|v| operand(v))
                .collect::<anyhow::Result<_>>()?,
        });
    }
    if let Some(c) = p.update_concat.captures(sql) {
        return Ok(Statement::UpdateConcat {
            table: c[1].to_string(),
            column: c[2].to_string(),
            source_column: c[3].to_string(),
            suffix: operand(&c[4])?,
            key: c[5].to_string(),
            staging_key: c[6].to_string(),
            staging: c[7].to_string(),
        });
    }
    if let Some(c) = p.delete_in.captures(sql) {
        return Ok(Statement::DeleteIn {
            table: c[1].to_string(),
            key: c[2].to_string(),
            staging_key: c[3].to_string(),
            staging: c[4].to_string(),
        });
    }
    if let Some(c) = p.select.captures(sql) {
        let columns = if c[1].trim() == "*" {
            None
        } else {
            Some(column_list(&c[1]))
        };
        return Ok(Statement::Select {
            table: c[2].to_string(),
            columns,
        });
    }
    bail!("memory engine does not support statement: {}", sql)
}

fn column_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn operand(s: &str) -> anyhow::Result<Operand> {
    let s = s.trim();
    if s == "?" {
        return Ok(Operand::Param);
    }
    if s.eq_ignore_ascii_case("NULL") {
        return Ok(Operand::Literal(Value::Null));
    }
    if let Some(inner) = s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Ok(Operand::Literal(Value::Text(inner.replace("''", "'"))));
    }
    s.parse::<i64>()
        .map(|i| Operand::Literal(Value::Int(i)))
        .map_err(|_| anyhow!("unsupported literal '{}'", s))
}

/// Splits on commas outside parentheses and quotes.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in s.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quote && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn placeholder_count(sql: &str) -> usize {
    let mut in_quote = false;
    sql.chars()
        .filter(|c| {
            if *c == '\'' {
                in_quote = !in_quote;
            }
            *c == '?' && !in_quote
        })
        .count()
}

fn resolve(op: &Operand, binds: &mut std::slice::Iter<'_, Value>) -> anyhow::Result<Value> {
    match op {
        Operand::Literal(v) => Ok(v.clone()),
        Operand::Param => binds
            .next()
            .cloned()
            .ok_or_else(|| anyhow!("missing bound parameter")),
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn lookup<'a>(temp: &'a HashMap<String, Table>, db: &'a Database, name: &str) -> anyhow::Result<&'a Table> {
    let k = key(name);
    temp.get(&k)
        .or_else(|| db.tables.get(&k))
        .ok_or_else(|| anyhow!("Table '{}' doesn't exist", name))
}

fn lookup_mut<'a>(
    temp: &'a mut HashMap<String, Table>,
    db: &'a mut Database,
    name: &str,
) -> anyhow::Result<&'a mut Table> {
    let k = key(name);
    if let Some(t) = temp.get_mut(&k) {
        return Ok(t);
    }
    db.tables
        .get_mut(&k)
        .ok_or_else(|| anyhow!("Table '{}' doesn't exist", name))
}

fn column<'a>(table: &'a Table, name: &str) -> anyhow::Result<&'a str> {
    table
        .columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(name))
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Unknown column '{}' in 'field list'", name))
}

fn key_set(table: &Table, name: &str) -> anyhow::Result<HashSet<Value>> {
    let col = column(table, name)?;
    Ok(table
        .rows
        .iter()
        .filter_map(|r| r.get(col).cloned())
        .filter(|v| *v != Value::Null)
        .collect())
}

fn insert_row(table: &mut Table, mut row: Row) -> anyhow::Result<()> {
    for c in &table.columns {
        row.entry(c.clone()).or_insert(Value::Null);
    }
    if let Some(pk) = &table.primary_key {
        let pk = column(table, pk)?.to_string();
        let value = row.get(&pk).cloned().unwrap_or(Value::Null);
        if value == Value::Null {
            bail!("Column '{}' cannot be null", pk);
        }
        if table.rows.iter().any(|r| r.get(&pk) == Some(&value)) {
            bail!("Duplicate entry '{}' for key 'PRIMARY'", value);
        }
    }
    table.rows.push(row);
    Ok(())
}

fn apply(
    temp: &mut HashMap<String, Table>,
    db: &mut Database,
    stmt: Statement,
    params: &[Value],
) -> anyhow::Result<Observation> {
    let mut binds = params.iter();

    match stmt {
        Statement::DropTable {
            name,
            temporary,
            if_exists,
        } => {
            let k = key(&name);
            // A plain DROP TABLE removes a shadowing temporary table first.
            let removed = temp.remove(&k).is_some() || (!temporary && db.tables.remove(&k).is_some());
            if !removed && !if_exists {
                bail!("Unknown table '{}'", name);
            }
            Ok(Observation::default())
        }
        Statement::CreateTable {
            name,
            temporary,
            if_not_exists,
            columns,
            primary_key,
        } => {
            let k = key(&name);
            let scope = if temporary { temp } else { &mut db.tables };
            if scope.contains_key(&k) {
                if if_not_exists {
                    return Ok(Observation::default());
                }
                bail!("Table '{}' already exists", name);
            }
            scope.insert(
                k,
                Table {
                    columns,
                    primary_key,
                    rows: vec![],
                },
            );
            Ok(Observation::default())
        }
        Statement::InsertValues {
            table,
            columns,
            values,
        } => {
            if columns.len() != values.len() {
                bail!("Column count doesn't match value count at row 1");
            }
            let t = lookup_mut(temp, db, &table)?;
            let mut row = Row::new();
            for (c, op) in columns.iter().zip(values.iter()) {
                let col = column(t, c)?.to_string();
                row.insert(col, resolve(op, &mut binds)?);
            }
            insert_row(t, row)?;
            Ok(Observation {
                rows: vec![],
                affected_rows: 1,
            })
        }
        Statement::InsertUnionSelect {
            target,
            sources,
            projected,
            filter_column,
            filter,
        } => {
            let filter = resolve(&filter, &mut binds)?;
            let mut derived: Vec<Row> = Vec::new();
            let mut names: Vec<String> = Vec::new();
            for (i, (cols, source)) in sources.iter().enumerate() {
                let t = lookup(temp, db, source)?;
                let resolved = cols
                    .iter()
                    .map(|c| column(t, c).map(str::to_string))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                if i == 0 {
                    names = resolved.clone();
                } else if resolved.len() != names.len() {
                    bail!("The used SELECT statements have a different number of columns");
                }
                // UNION takes its column names from the first SELECT.
                for r in &t.rows {
                    derived.push(
                        names
                            .iter()
                            .zip(resolved.iter())
                            .map(|(n, c)| (n.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                            .collect(),
                    );
                }
            }
            let find = |name: &str| {
                names
                    .iter()
                    .find(|n| n.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| anyhow!("Unknown column '{}' in 'where clause'", name))
            };
            let (filter_col, projected_col) = (find(&filter_column)?, find(&projected)?);
            let picked: Vec<Value> = derived
                .iter()
                .filter(|r| r.get(&filter_col) == Some(&filter) && filter != Value::Null)
                .filter_map(|r| r.get(&projected_col).cloned())
                .collect();

            let t = lookup_mut(temp, db, &target)?;
            let into = t
                .columns
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("Table '{}' has no columns", target))?;
            let inserted = picked.len() as u64;
            for v in picked {
                let mut row = Row::new();
                row.insert(into.clone(), v);
                insert_row(t, row)?;
            }
            Ok(Observation {
                rows: vec![],
                affected_rows: inserted,
            })
        }
        Statement::UpdateConcat {
            table,
            column: target_col,
            source_column,
            suffix,
            key: key_col,
            staging,
            staging_key,
        } => {
            let suffix = resolve(&suffix, &mut binds)?;
            let keys = key_set(lookup(temp, db, &staging)?, &staging_key)?;
            let t = lookup_mut(temp, db, &table)?;
            let (target_col, source_col, key_col) = (
                column(t, &target_col)?.to_string(),
                column(t, &source_column)?.to_string(),
                column(t, &key_col)?.to_string(),
            );
            let mut changed = 0;
            for r in t.rows.iter_mut() {
                if !r.get(&key_col).is_some_and(|k| keys.contains(k)) {
                    continue;
                }
                let next = concat(r.get(&source_col).unwrap_or(&Value::Null), &suffix);
                if r.get(&target_col) != Some(&next) {
                    r.insert(target_col.clone(), next);
                    changed += 1;
                }
            }
            Ok(Observation {
                rows: vec![],
                affected_rows: changed,
            })
        }
        Statement::DeleteIn {
            table,
            key: key_col,
            staging,
            staging_key,
        } => {
            let keys = key_set(lookup(temp, db, &staging)?, &staging_key)?;
            let t = lookup_mut(temp, db, &table)?;
            let key_col = column(t, &key_col)?.to_string();
            let before = t.rows.len();
            t.rows
                .retain(|r| !r.get(&key_col).is_some_and(|k| keys.contains(k)));
            Ok(Observation {
                rows: vec![],
                affected_rows: (before - t.rows.len()) as u64,
            })
        }
        Statement::Select { table, columns } => {
            let t = lookup(temp, db, &table)?;
            let cols = match columns {
                None => t.columns.clone(),
                Some(list) => list
                    .iter()
                    .map(|c| column(t, c).map(str::to_string))
                    .collect::<anyhow::Result<_>>()?,
            };
            let rows = t
                .rows
                .iter()
                .map(|r| {
                    cols.iter()
                        .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();
            Ok(Observation { rows, affected_rows: 0 })
        }
    }
}

fn concat(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (a, b) => Value::Text(format!("{}{}", plain(a), plain(b))),
    }
}

fn plain(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Text(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{row, CachePolicy};
    use crate::scenario::{cache_boundary, ScenarioConfig};

    async fn open(backend: &MemoryBackend, policy: &CachePolicy) -> (ConnectionParams, Box<dyn Session>) {
        let params = backend.provision(&EngineTarget::mysql("8.0.29")).await.unwrap();
        let session = backend.connect(&params, &policy.connection_options()).await.unwrap();
        (params, session)
    }

    async fn run_all(session: &mut Box<dyn Session>, cfg: &ScenarioConfig) -> Vec<Observation> {
        let mut out = Vec::new();
        for step in cache_boundary(cfg).steps {
            out.push(session.execute(&step.sql, &step.params).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_canonical_scenario_leaves_table_empty() {
        let backend = MemoryBackend::new(false);
        let (params, mut session) = open(&backend, &CachePolicy::enabled()).await;
        let obs = run_all(&mut session, &ScenarioConfig::default()).await;

        let selects: Vec<&Observation> = obs.iter().filter(|o| !o.rows.is_empty()).collect();
        assert_eq!(
            selects[0].rows,
            vec![row([
                ("id", Value::Int(1)),
                ("title", Value::text("MySQL and JSON: A Practical Programming Guide"))
            ])]
        );
        assert_eq!(backend.snapshot(&params, "Book"), Some(vec![]));
    }

    #[tokio::test]
    async fn test_self_union_stages_duplicate_keys() {
        let backend = MemoryBackend::new(false);
        let (_params, mut s) = open(&backend, &CachePolicy::disabled()).await;
        let cfg = ScenarioConfig::default();
        let steps = cache_boundary(&cfg).steps;
        // drop, create, seed, create staging, stage
        for step in &steps[..4] {
            s.execute(&step.sql, &step.params).await.unwrap();
        }
        let staged = s.execute(&steps[4].sql, &steps[4].params).await.unwrap();
        assert_eq!(staged.affected_rows, 2);
        let rows = s.execute("SELECT id FROM ht_Book", &[]).await.unwrap().rows;
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_plan_reuse_only_with_cache() {
        for (policy, remaining) in [(CachePolicy::enabled(), 1), (CachePolicy::disabled(), 0)] {
            let backend = MemoryBackend::new(false).with_faults(MemoryFaults::default().with(Fault::StalePlanReuse));
            let (params, mut session) = open(&backend, &policy).await;
            run_all(&mut session, &ScenarioConfig::default()).await;
            assert_eq!(backend.snapshot(&params, "Book").unwrap().len(), remaining);
        }
    }

    #[tokio::test]
    async fn test_temporary_tables_are_session_scoped() {
        let backend = MemoryBackend::new(false);
        let policy = CachePolicy::disabled();
        let (params, mut a) = open(&backend, &policy).await;
        let mut b = backend.connect(&params, &policy.connection_options()).await.unwrap();

        a.execute("CREATE TEMPORARY TABLE IF NOT EXISTS ht_Book (id INTEGER NOT NULL)", &[])
            .await
            .unwrap();
        assert!(a.execute("SELECT * FROM ht_Book", &[]).await.is_ok());
        let err = b.execute("SELECT * FROM ht_Book", &[]).await.unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
        assert_eq!(backend.open_sessions(), 2);
        drop(b);
        assert_eq!(backend.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_primary_key_enforced() {
        let backend = MemoryBackend::new(false);
        let (_p, mut s) = open(&backend, &CachePolicy::enabled()).await;
        s.execute("CREATE TABLE Book (id INTEGER NOT NULL, title VARCHAR(255), PRIMARY KEY (id))", &[])
            .await
            .unwrap();
        let insert = "INSERT INTO Book (id, title) VALUES (?, ?)";
        s.execute(insert, &[Value::Int(1), Value::text("a")]).await.unwrap();
        let err = s
            .execute(insert, &[Value::Int(1), Value::text("b")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate entry '1'"));
    }

    #[tokio::test]
    async fn test_errors_for_bad_statements() {
        let backend = MemoryBackend::new(false);
        let (_p, mut s) = open(&backend, &CachePolicy::enabled()).await;
        assert!(s.execute("DROP TEMPORARY TABLE ht_Book", &[]).await.is_err());
        assert!(s.execute("DROP TABLE IF EXISTS Book", &[]).await.is_ok());
        assert!(s.execute("SELECT ?", &[]).await.is_err());
        assert!(s.execute("DROP TABLE IF EXISTS Book", &[Value::Int(1)]).await.is_err());
        assert!(s.execute("TRUNCATE Book", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_reuse_returns_same_instance() {
        let backend = MemoryBackend::new(true);
        let t = EngineTarget::mysql("8.0.28");
        let a = backend.provision(&t).await.unwrap();
        let b = backend.provision(&t).await.unwrap();
        assert_eq!(a.instance_id, b.instance_id);
        backend.release(&a).await.unwrap();
        assert_eq!(backend.instance_count(), 1);

        let fresh = MemoryBackend::new(false);
        let a = fresh.provision(&t).await.unwrap();
        let b = fresh.provision(&t).await.unwrap();
        assert_ne!(a.instance_id, b.instance_id);
        fresh.release(&a).await.unwrap();
        assert_eq!(fresh.instance_count(), 1);
        assert!(fresh.connect(&a, &CachePolicy::enabled().connection_options()).await.is_err());
    }

    #[test]
    fn test_split_top_level_respects_parens_and_quotes() {
        let parts = split_top_level("id INTEGER NOT NULL, title VARCHAR(255), PRIMARY KEY (id)");
        assert_eq!(parts, vec!["id INTEGER NOT NULL", "title VARCHAR(255)", "PRIMARY KEY (id)"]);
        let parts = split_top_level("1, 'a, b', ?");
        assert_eq!(parts, vec!["1", "'a, b'", "?"]);
    }
}
