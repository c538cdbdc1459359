//! SQL cell execution (§4.4): `{name}` template substitution against a
//! configured connection. This is a literal-substitution query builder,
//! **not** a parameterized query — a deliberate, documented limitation
//! (§9 Open Questions: upgrade to driver-level parameter binding once the
//! variable set is constrained to JSON-serializable scalars).

use super::ExecutionOutcome;
use crate::cell::Output;
use async_trait::async_trait;
use sqlx::any::AnyPool;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashMap;

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Abstraction over "a thing that can run a SQL string and hand back a
/// table". Production code uses `SqlxConnector`; tests use a fake that
/// never touches a live database.
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryResult, String>;
}

pub struct SqlxConnector {
    pool: AnyPool,
}

impl SqlxConnector {
    pub async fn connect(connection_string: &str) -> Result<Self, String> {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect(connection_string)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlConnector for SqlxConnector {
    async fn query(&self, sql: &str) -> Result<QueryResult, String> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut out_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut out_row = Vec::with_capacity(row.columns().len());
            for (i, col) in row.columns().iter().enumerate() {
                out_row.push(any_value_to_json(row, i, col.type_info().name()));
            }
            out_rows.push(out_row);
        }

        Ok(QueryResult {
            columns,
            rows: out_rows,
        })
    }
}

fn any_value_to_json(row: &sqlx::any::AnyRow, index: usize, type_name: &str) -> serde_json::Value {
    let raw = row.try_get_raw(index);
    let Ok(raw) = raw else {
        return serde_json::Value::Null;
    };
    if raw.is_null() {
        return serde_json::Value::Null;
    }
    match type_name.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "BOOLEAN" | "BOOL" => row
            .try_get::<bool, _>(index)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Returns the `{name}` references in source order (unlike the extractor's
/// sorted set), so the "first missing variable" error is deterministic and
/// matches the order a user would read the query.
fn ordered_template_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = source[i + 1..].find('}') {
                let candidate = &source[i + 1..i + 1 + end];
                if is_identifier(candidate) {
                    names.push(candidate.to_string());
                }
                i += end + 2;
                continue;
            }
        }
        i += 1;
    }
    names
}

/// Matches spec §4.1's literal `/\{(\w+)\}/`: `\w` is alphanumeric-or-`_`
/// with no restriction on the first character, so a digit-leading name like
/// `{1x}` still counts as a read.
fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

pub async fn execute_sql(
    source: &str,
    connection_string: Option<&str>,
    connector: Option<&dyn SqlConnector>,
    namespace: &HashMap<String, String>,
) -> ExecutionOutcome {
    if connection_string.is_none() {
        return ("".to_string(), Vec::new(), Some("no database configured".to_string()));
    }

    let names = ordered_template_names(source);
    for name in &names {
        if !namespace.contains_key(name) {
            return (
                "".to_string(),
                Vec::new(),
                Some(format!("variable '{name}' not defined")),
            );
        }
    }

    let mut substituted = String::with_capacity(source.len());
    let mut rest = source;
    'outer: while let Some(brace) = rest.find('{') {
        if let Some(end) = rest[brace + 1..].find('}') {
            let candidate = &rest[brace + 1..brace + 1 + end];
            if is_identifier(candidate) {
                substituted.push_str(&rest[..brace]);
                substituted.push_str(namespace.get(candidate).map(String::as_str).unwrap_or(""));
                rest = &rest[brace + end + 2..];
                continue 'outer;
            }
        }
        substituted.push_str(&rest[..=brace]);
        rest = &rest[brace + 1..];
    }
    substituted.push_str(rest);

    let Some(connector) = connector else {
        return (
            "".to_string(),
            Vec::new(),
            Some("no database configured".to_string()),
        );
    };

    match connector.query(&substituted).await {
        Ok(result) if result.rows.is_empty() => (
            "query returned no rows".to_string(),
            Vec::new(),
            None,
        ),
        Ok(result) => {
            let output = Output::structured(
                "application/json",
                serde_json::json!({
                    "type": "table",
                    "columns": result.columns,
                    "rows": result.rows,
                }),
            );
            ("".to_string(), vec![output], None)
        }
        Err(e) => ("".to_string(), Vec::new(), Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeConnector {
        response: Result<QueryResult, String>,
    }

    #[async_trait]
    impl SqlConnector for FakeConnector {
        async fn query(&self, _sql: &str) -> Result<QueryResult, String> {
            match &self.response {
                Ok(r) => Ok(QueryResult {
                    columns: r.columns.clone(),
                    rows: r.rows.clone(),
                }),
                Err(e) => Err(e.clone()),
            }
        }
    }

    #[tokio::test]
    async fn no_connection_string_errors_without_querying() {
        let namespace = HashMap::new();
        let (_, outputs, error) =
            execute_sql("SELECT 1", None, None, &namespace).await;
        assert!(outputs.is_empty());
        assert_eq!(error.as_deref(), Some("no database configured"));
    }

    #[tokio::test]
    async fn missing_variable_errors_before_connecting() {
        let namespace = HashMap::new();
        let connector = FakeConnector {
            response: Ok(QueryResult {
                columns: vec![],
                rows: vec![],
            }),
        };
        let (_, _, error) = execute_sql(
            "SELECT * FROM u WHERE id = {user_id}",
            Some("postgres://fake"),
            Some(&connector),
            &namespace,
        )
        .await;
        assert_eq!(error.as_deref(), Some("variable 'user_id' not defined"));
    }

    #[tokio::test]
    async fn substitutes_and_wraps_table_output() {
        let mut namespace = HashMap::new();
        namespace.insert("user_id".to_string(), "42".to_string());
        let connector = FakeConnector {
            response: Ok(QueryResult {
                columns: vec!["id".to_string()],
                rows: vec![vec![serde_json::json!(42)]],
            }),
        };
        let (stdout, outputs, error) = execute_sql(
            "SELECT * FROM u WHERE id = {user_id}",
            Some("postgres://fake"),
            Some(&connector),
            &namespace,
        )
        .await;
        assert!(error.is_none());
        assert_eq!(stdout, "");
        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn empty_result_set_is_a_stdout_note() {
        let namespace = HashMap::new();
        let connector = FakeConnector {
            response: Ok(QueryResult {
                columns: vec![],
                rows: vec![],
            }),
        };
        let (stdout, outputs, error) =
            execute_sql("SELECT * FROM t", Some("postgres://fake"), Some(&connector), &namespace)
                .await;
        assert!(error.is_none());
        assert!(outputs.is_empty());
        assert!(!stdout.is_empty());
    }

    #[tokio::test]
    async fn digit_leading_variable_is_substituted() {
        let mut namespace = HashMap::new();
        namespace.insert("1x".to_string(), "7".to_string());
        let connector = FakeConnector {
            response: Ok(QueryResult {
                columns: vec!["id".to_string()],
                rows: vec![vec![serde_json::json!(7)]],
            }),
        };
        let (_, _, error) = execute_sql(
            "SELECT * FROM u WHERE id = {1x}",
            Some("postgres://fake"),
            Some(&connector),
            &namespace,
        )
        .await;
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn driver_error_surfaces_as_execution_error() {
        let namespace = HashMap::new();
        let connector = FakeConnector {
            response: Err("syntax error at or near \"FORM\"".to_string()),
        };
        let (_, _, error) =
            execute_sql("SELECT * FORM t", Some("postgres://fake"), Some(&connector), &namespace)
                .await;
        assert!(error.unwrap().contains("syntax error"));
    }
}
