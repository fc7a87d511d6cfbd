//! PostgreSQL gateway over the blocking `postgres` client.
//!
//! Every call is a blocking round trip on one connection; the recursive
//! export/import walks are plain call-stack recursion, so there is no pool
//! and no runtime. A one-entry prepared-statement cache avoids re-preparing
//! an identical statement issued back-to-back, which the walks do constantly
//! (one statement shape per table level).

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls, Statement};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::core::identifier::quote_ident;
use crate::core::Value;
use crate::error::{ExchangeError, Result};

use super::{display_params, Gateway, SqlRow};

/// Gateway implementation for one PostgreSQL connection.
pub struct PgGateway {
    client: Client,
    last_sql: String,
    last_stmt: Option<Statement>,
}

impl PgGateway {
    /// Connect using the database section of the configuration and apply the
    /// configured schema search path.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut pg = postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let mut client = pg.connect(NoTls)?;

        if !config.search_path.is_empty() {
            let schemas = config
                .search_path
                .split(',')
                .map(|s| quote_ident(s.trim()))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            client.batch_execute(&format!("set search_path to {}", schemas))?;
        }

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client,
            last_sql: String::new(),
            last_stmt: None,
        })
    }

    fn prepare_cached(&mut self, sql: &str) -> std::result::Result<Statement, postgres::Error> {
        if let Some(stmt) = &self.last_stmt {
            if self.last_sql == sql {
                return Ok(stmt.clone());
            }
        }
        let stmt = self.client.prepare(sql)?;
        self.last_sql = sql.to_string();
        self.last_stmt = Some(stmt.clone());
        Ok(stmt)
    }

    fn control(&mut self, statement: &str) -> Result<()> {
        debug!(statement, "transaction control");
        self.client
            .batch_execute(statement)
            .map_err(|e| ExchangeError::db(e.to_string(), statement, ""))
    }
}

impl Gateway for PgGateway {
    fn execute(&mut self, sql: &str, params: &[(&str, Value)]) -> Result<Vec<SqlRow>> {
        let (translated, names) = translate_named(sql);
        debug!(statement = %translated, "execute");

        let wrap = |e: postgres::Error| {
            ExchangeError::db(e.to_string(), sql.to_string(), display_params(params))
        };

        let mut values: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(names.len());
        for name in &names {
            let value = params
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    ExchangeError::db(
                        format!("no value supplied for parameter :{}", name),
                        sql.to_string(),
                        display_params(params),
                    )
                })?;
            values.push(value);
        }

        let stmt = self.prepare_cached(&translated).map_err(wrap)?;
        let rows = self.client.query(&stmt, &values).map_err(wrap)?;
        rows.iter().map(|row| decode_row(row).map_err(wrap)).collect()
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.control("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.control("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.control("ROLLBACK")
    }
}

/// Translate `:name` placeholders to `$n`, collecting names in first-use
/// order. Repeated names reuse the same positional index. Text inside single
/// quotes and `::type` casts pass through untouched.
fn translate_named(sql: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            i += 1;
            continue;
        }
        if !in_string && c == ':' {
            if i + 1 < chars.len() && chars[i + 1] == ':' {
                out.push_str("::");
                i += 2;
                continue;
            }
            if i + 1 < chars.len() && (chars[i + 1].is_alphanumeric() || chars[i + 1] == '_') {
                let mut j = i + 1;
                let mut name = String::new();
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    name.push(chars[j]);
                    j += 1;
                }
                let index = match names.iter().position(|n| *n == name) {
                    Some(p) => p,
                    None => {
                        names.push(name);
                        names.len() - 1
                    }
                };
                out.push('$');
                out.push_str(&(index + 1).to_string());
                i = j;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    (out, names)
}

/// Decode a driver row into the ordered column→value mapping, preserving the
/// select-list column order.
fn decode_row(row: &postgres::Row) -> std::result::Result<SqlRow, postgres::Error> {
    let mut out = SqlRow::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.map(Value::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?.map(|v| Value::Int(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?.map(|v| Value::Int(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(Value::Int)
        } else if *ty == Type::OID {
            row.try_get::<_, Option<u32>>(i)?.map(|v| Value::Int(v as i64))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?.map(|v| Value::Float(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.map(Value::Float)
        } else if *ty == Type::NUMERIC {
            row.try_get::<_, Option<Decimal>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(Value::Bytes)
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<Uuid>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(i)?
                .map(|v| Value::Text(v.to_rfc3339()))
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<NaiveDate>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else if *ty == Type::TIME {
            row.try_get::<_, Option<NaiveTime>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(i)?
                .map(|v| Value::Text(v.to_string()))
        } else {
            // Anything else comes back through its textual form.
            row.try_get::<_, Option<String>>(i)?.map(Value::Text)
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

type ToSqlResult = std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>>;

fn unsupported(value: &Value, ty: &Type) -> ToSqlResult {
    Err(format!("cannot bind {:?} to a column of type {}", value, ty).into())
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> ToSqlResult {
        let is_text = *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME;
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if is_text {
                    b.to_string().to_sql(ty, out)
                } else {
                    unsupported(self, ty)
                }
            }
            Value::Int(v) => {
                if *ty == Type::INT2 {
                    (*v as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*v as i32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::OID {
                    (*v as u32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*v).to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if is_text {
                    v.to_string().to_sql(ty, out)
                } else {
                    unsupported(self, ty)
                }
            }
            Value::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::try_from(*v)?.to_sql(ty, out)
                } else if is_text {
                    v.to_string().to_sql(ty, out)
                } else {
                    unsupported(self, ty)
                }
            }
            Value::Text(s) => {
                // Dates, UUIDs and decimals travel as text in the data files
                // and are parsed back into their wire form on bind.
                if is_text {
                    s.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (!self.is_false_like()).to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    s.trim().parse::<i16>()?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    s.trim().parse::<i32>()?.to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    s.trim().parse::<i64>()?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    s.trim().parse::<f32>()?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    s.trim().parse::<f64>()?.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    s.trim().parse::<Decimal>()?.to_sql(ty, out)
                } else if *ty == Type::UUID {
                    Uuid::parse_str(s.trim())?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    DateTime::<FixedOffset>::parse_from_rfc3339(s)?.to_sql(ty, out)
                } else if *ty == Type::DATE {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
                } else if *ty == Type::TIME {
                    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                } else {
                    unsupported(self, ty)
                }
            }
            Value::Bytes(b) => {
                if *ty == Type::BYTEA {
                    (&b[..]).to_sql(ty, out)
                } else {
                    unsupported(self, ty)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
