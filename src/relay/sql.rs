//! Parameterized SQL over a local SQLite database.
//!
//! Named `:param` placeholders are rewritten to positional `?` in order of
//! appearance. A keyword denylist rejects destructive statements before
//! anything reaches the database; it supplements, never replaces, a
//! least-privilege database account.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::protocol::{ExecuteSqlRequest, SqlResponse};

/// Statements rejected as whole words
const BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "TRUNCATE", "ALTER", "CREATE", "EXEC", "EXECUTE", "ATTACH", "DETACH",
];

/// Extended/system procedure prefixes
const BLOCKED_PREFIXES: &[&str] = &["XP_", "SP_"];

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Blocked operation: \"{0}\" is not allowed")]
    Blocked(String),

    #[error("Field \"query\" is required")]
    EmptyQuery,

    #[error("No value supplied for parameter :{0}")]
    MissingParam(String),

    #[error("Parameter :{0} must be a scalar")]
    UnsupportedParam(String),

    #[error("Database connection is unavailable")]
    Poisoned,

    #[error("SQL error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Return the first denylisted word in `query`, if any
pub fn blocked_keyword(query: &str) -> Option<String> {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_uppercase)
        .find(|word| {
            BLOCKED_KEYWORDS.contains(&word.as_str())
                || BLOCKED_PREFIXES.iter().any(|prefix| word.starts_with(prefix))
        })
}

/// Rewrite `:name` placeholders to `?`, returning names in order.
///
/// Placeholders inside quoted literals and `::` casts are left alone.
pub fn rewrite_named_params(query: &str) -> (String, Vec<String>) {
    let mut sql = String::with_capacity(query.len());
    let mut names = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = query.chars().peekable();
    let mut previous: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                sql.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                sql.push(c);
            }
            None if c == ':'
                && previous != Some(':')
                && chars
                    .peek()
                    .map_or(false, |next| next.is_ascii_alphabetic() || *next == '_') =>
            {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                sql.push('?');
                names.push(name);
                previous = Some('?');
                continue;
            }
            None => sql.push(c),
        }
        previous = Some(c);
    }

    (sql, names)
}

fn bind_value(name: &str, value: &Value) -> Result<SqlValue, SqlError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(SqlError::UnsupportedParam(name.to_string()))
        }
    })
}

fn is_temporal(decl: &str) -> bool {
    decl.contains("DATE") || decl.contains("TIME")
}

fn is_decimal(decl: &str) -> bool {
    ["REAL", "FLOA", "DOUB", "DEC", "NUMERIC"]
        .iter()
        .any(|marker| decl.contains(marker))
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Normalize a stored date/time string to ISO-8601
fn iso_temporal(text: &str) -> String {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return parsed.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        }
    }
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => text.to_string(),
    }
}

/// Convert a column value into JSON, guided by its declared type
fn json_value(value: ValueRef<'_>, decl: Option<&str>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match decl {
            Some(d) if is_decimal(d) => float_value(i as f64),
            _ => Value::from(i),
        },
        ValueRef::Real(f) => float_value(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match decl {
                Some(d) if is_temporal(d) => Value::String(iso_temporal(&text)),
                Some(d) if is_decimal(d) => match text.parse::<f64>() {
                    Ok(f) => float_value(f),
                    Err(_) => Value::String(text.into_owned()),
                },
                _ => Value::String(text.into_owned()),
            }
        }
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    }
}

/// Explicitly constructed handle to the agent's database
#[derive(Clone)]
pub struct SqlGateway {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqlGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlGateway").finish_non_exhaustive()
    }
}

impl SqlGateway {
    pub fn open(path: &Path) -> Result<Self, SqlError> {
        info!(path = %path.display(), "Opening SQL database");
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, SqlError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run one statement. Blocking; call from a blocking-capable thread.
    pub fn execute(&self, request: &ExecuteSqlRequest) -> Result<SqlResponse, SqlError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SqlError::EmptyQuery);
        }

        if let Some(keyword) = blocked_keyword(query) {
            warn!(target: "security", %keyword, "Blocked SQL statement");
            return Err(SqlError::Blocked(keyword));
        }

        let (sql, names) = rewrite_named_params(query);
        let values = names
            .iter()
            .map(|name| {
                let value = request
                    .params
                    .get(name)
                    .ok_or_else(|| SqlError::MissingParam(name.clone()))?;
                bind_value(name, value)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(sql = %sql, params = values.len(), "Executing SQL");

        let conn = self.conn.lock().map_err(|_| SqlError::Poisoned)?;
        let mut stmt = conn.prepare(&sql)?;

        if stmt.column_count() == 0 {
            let affected_rows = stmt.execute(params_from_iter(values))?;
            info!(affected_rows, "SQL modified rows");
            return Ok(SqlResponse::Modify {
                success: true,
                affected_rows,
            });
        }

        let columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_ascii_uppercase)))
            .collect();

        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(values))?;
        while let Some(row) = cursor.next()? {
            let mut record = Map::new();
            for (index, (name, decl)) in columns.iter().enumerate() {
                record.insert(name.clone(), json_value(row.get_ref(index)?, decl.as_deref()));
            }
            rows.push(record);
        }

        info!(row_count = rows.len(), "SQL returned rows");
        Ok(SqlResponse::Select {
            success: true,
            columns: columns.into_iter().map(|(name, _)| name).collect(),
            row_count: rows.len(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(query: &str, params: Value) -> ExecuteSqlRequest {
        ExecuteSqlRequest {
            query: query.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn gateway() -> SqlGateway {
        let gateway = SqlGateway::open_in_memory().unwrap();
        {
            let conn = gateway.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE orders (
                    id INTEGER PRIMARY KEY,
                    code TEXT,
                    amount DECIMAL(10,2),
                    created DATETIME,
                    payload BLOB
                 );
                 INSERT INTO orders VALUES (1, 'Q1234567', '12.50', '2026-03-09 07:05:01', x'CAFE');
                 INSERT INTO orders VALUES (2, 'R7654321', 3, NULL, NULL);",
            )
            .unwrap();
        }
        gateway
    }

    #[test]
    fn test_denylist_whole_words() {
        assert_eq!(blocked_keyword("drop table orders"), Some("DROP".to_string()));
        assert_eq!(blocked_keyword("EXEC xp_cmdshell 'dir'"), Some("EXEC".to_string()));
        assert_eq!(blocked_keyword("select * from t; exec\tsp_who"), Some("EXEC".to_string()));
        assert_eq!(blocked_keyword("SELECT sp_helpdb"), Some("SP_HELPDB".to_string()));
        assert_eq!(blocked_keyword("ATTACH DATABASE 'x' AS y"), Some("ATTACH".to_string()));

        // Substrings of ordinary identifiers are fine
        assert_eq!(blocked_keyword("SELECT created, dropped_at FROM orders"), None);
    }

    #[test]
    fn test_rewrite_in_order_of_appearance() {
        let (sql, names) =
            rewrite_named_params("SELECT * FROM t WHERE b = :beta AND a = :alpha AND c = ':gamma' AND d::text = :beta");

        assert_eq!(
            sql,
            "SELECT * FROM t WHERE b = ? AND a = ? AND c = ':gamma' AND d::text = ?"
        );
        assert_eq!(names, vec!["beta", "alpha", "beta"]);
    }

    #[test]
    fn test_select_converts_types() {
        let response = gateway()
            .execute(&request(
                "SELECT id, amount, created, payload FROM orders WHERE code = :code",
                json!({"code": "Q1234567"}),
            ))
            .unwrap();

        match response {
            SqlResponse::Select {
                columns,
                rows,
                row_count,
                ..
            } => {
                assert_eq!(columns, vec!["id", "amount", "created", "payload"]);
                assert_eq!(row_count, 1);
                assert_eq!(rows[0]["id"], json!(1));
                assert_eq!(rows[0]["amount"], json!(12.5));
                assert_eq!(rows[0]["created"], json!("2026-03-09T07:05:01"));
                assert_eq!(rows[0]["payload"], json!("cafe"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_modify_reports_affected_rows() {
        let gateway = gateway();
        let response = gateway
            .execute(&request(
                "UPDATE orders SET amount = :amount WHERE id >= :min",
                json!({"amount": 1.25, "min": 1}),
            ))
            .unwrap();

        assert_eq!(
            response,
            SqlResponse::Modify {
                success: true,
                affected_rows: 2
            }
        );
    }

    #[test]
    fn test_missing_param_is_rejected() {
        let err = gateway()
            .execute(&request("SELECT * FROM orders WHERE id = :id", json!({})))
            .unwrap_err();
        assert!(matches!(err, SqlError::MissingParam(name) if name == "id"));
    }

    #[test]
    fn test_blocked_never_reaches_database() {
        let gateway = gateway();
        let err = gateway
            .execute(&request("DROP TABLE orders", json!({})))
            .unwrap_err();
        assert!(matches!(err, SqlError::Blocked(_)));

        // Table still exists
        assert!(gateway
            .execute(&request("SELECT COUNT(*) AS n FROM orders", json!({})))
            .is_ok());
    }
}
