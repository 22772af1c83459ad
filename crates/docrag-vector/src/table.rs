//! LanceDB connection helpers and SQL predicate building for chunk fetches.

use lancedb::{connect, Connection};

use docrag_core::error::{Error, Result};
use docrag_core::types::{FetchQuery, MetaValue, FILENAME_KEY};

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::storage)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::storage)?;
    Ok(names.iter().any(|n| n == name))
}

/// Single-quoted SQL string literal.
pub fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Predicate covering the pushed-down part of `query`: namespace, a string
/// `filename` filter and the time window. Remaining filter keys are matched
/// in-process against the decoded metadata.
pub fn fetch_predicate(query: &FetchQuery) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(ns) = &query.namespace {
        clauses.push(format!("namespace = {}", sql_str(ns.as_str())));
    }
    if let Some(MetaValue::String(filename)) = query.filter.get(FILENAME_KEY) {
        clauses.push(format!("filename = {}", sql_str(filename)));
    }
    if let Some(range) = query.time_range {
        let mut bounds = Vec::new();
        if let Some(start) = range.start() { bounds.push(format!("created_at_ms >= {}", start.timestamp_millis())); }
        if let Some(end) = range.end() { bounds.push(format!("created_at_ms <= {}", end.timestamp_millis())); }
        if !bounds.is_empty() {
            clauses.push(format!("(created_at_ms IS NULL OR ({}))", bounds.join(" AND ")));
        }
    }
    if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}
