use super::{Connector, Session};
use crate::model::{ConnectionOptions, Observation, Row, Value};
use crate::provision::ConnectionParams;
use anyhow::Context;
use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params};

/// Statement cache entries the driver keeps when caching is on.
const STMT_CACHE_ENTRIES: usize = 32;

pub struct MysqlConnector;

/// Driver options for one session. The driver's statement cache is only
/// sized when the policy both prepares on the server and caches.
pub fn opts_for(params: &ConnectionParams, options: &ConnectionOptions) -> OptsBuilder {
    let cache_size = if options.use_server_prepared_statements && options.cache_prepared_statements {
        STMT_CACHE_ENTRIES
    } else {
        0
    };
    OptsBuilder::default()
        .ip_or_hostname(params.host.clone())
        .tcp_port(params.port)
        .user(Some(params.user.clone()))
        .pass(params.password.clone())
        .db_name(params.database.clone())
        .stmt_cache_size(cache_size)
}

/// Statements the cache does not keep are closed right after execution.
pub fn closes_after_exec(options: &ConnectionOptions, sql: &str) -> bool {
    !options.caches(sql)
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        options: &ConnectionOptions,
    ) -> anyhow::Result<Box<dyn Session>> {
        let conn = Conn::new(opts_for(params, options))
            .await
            .with_context(|| format!("failed to connect to mysql at {}", params.address()))?;

        Ok(Box::new(MysqlSession {
            conn,
            options: *options,
        }))
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

pub struct MysqlSession {
    conn: Conn,
    options: ConnectionOptions,
}

#[async_trait]
impl Session for MysqlSession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> anyhow::Result<Observation> {
        let rows: Vec<mysql_async::Row> = if self.options.use_server_prepared_statements {
            let stmt = self.conn.prep(sql).await?;
            let result: mysql_async::Result<Vec<mysql_async::Row>> =
                self.conn.exec(&stmt, to_params(params)).await;
            // Close before surfacing the result so an expected failure does
            // not leave the statement open on the server.
            if closes_after_exec(&self.options, sql) {
                self.conn.close(stmt).await?;
            }
            result?
        } else {
            let text = interpolate(sql, params)?;
            self.conn.query(text).await?
        };

        Ok(Observation {
            affected_rows: self.conn.affected_rows(),
            rows: rows.iter().map(convert_row).collect(),
        })
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}

fn to_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|v| match v {
                Value::Null => mysql_async::Value::NULL,
                Value::Int(i) => mysql_async::Value::Int(*i),
                Value::Text(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
            })
            .collect(),
    )
}

fn convert_row(row: &mysql_async::Row) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let value = row
                .as_ref(i)
                .map(|v| convert_value(v, col.column_type()))
                .unwrap_or(Value::Null);
            (col.name_str().into_owned(), value)
        })
        .collect()
}

// The text protocol hands integers back as bytes; normalise on column type so
// both protocols produce comparable rows.
fn convert_value(v: &mysql_async::Value, ty: ColumnType) -> Value {
    use mysql_async::Value as V;
    match v {
        V::NULL => Value::Null,
        V::Int(i) => Value::Int(*i),
        V::UInt(u) => i64::try_from(*u)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(u.to_string())),
        V::Bytes(b) => {
            let s = String::from_utf8_lossy(b).into_owned();
            if is_integer_column(ty) {
                s.parse::<i64>().map(Value::Int).unwrap_or(Value::Text(s))
            } else {
                Value::Text(s)
            }
        }
        V::Float(f) => Value::Text(f.to_string()),
        V::Double(d) => Value::Text(d.to_string()),
        other => Value::Text(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

fn is_integer_column(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONGLONG
    )
}

/// Client-side parameter substitution for the text protocol.
///
/// Placeholders inside quoted literals and backtick identifiers are left
/// alone. Values are rendered by the driver with backslash escaping, the
/// server's default `sql_mode`.
pub fn interpolate(sql: &str, params: &[Value]) -> anyhow::Result<String> {
    let values = match to_params(params) {
        Params::Positional(values) => values,
        _ => Vec::new(),
    };
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = values.iter();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' && q != '`' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    let v = next
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("statement has more placeholders than bound parameters"))?;
                    out.push_str(&v.as_sql(false));
                }
                _ => out.push(c),
            },
        }
    }

    if next.next().is_some() {
        anyhow::bail!("statement has fewer placeholders than bound parameters");
    }
    Ok(out)
}
