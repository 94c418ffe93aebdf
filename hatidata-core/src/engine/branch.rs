//! Data branches: copy-on-write isolated schemas over main
//!
//! A fresh branch contains only views of main's base tables, so unchanged
//! tables cost nothing. Writing inside the branch materializes the
//! affected table as a real table in the branch schema (the executing SQL
//! performs the copy); merge then replaces exactly those tables in main.
//! Branch existence is determined solely by schema presence in the
//! catalog.

use super::{query_on, LocalEngine};
use crate::backend::JsonRow;
use crate::error::{Error, Result};
use crate::types::{utc_now_iso, BranchInfo, BranchStatus, MergeResult, MergeStrategy};
use duckdb::Connection;
use uuid::Uuid;

/// Reject anything that is not a generated branch ID: exactly 12
/// lowercase hex characters. Branch IDs end up inside identifiers, so
/// this is the injection boundary.
pub(crate) fn validate_branch_id(branch_id: &str) -> Result<()> {
    let valid = branch_id.len() == 12
        && branch_id
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(Error::BadArgument(format!(
            "invalid branch id: {:?} (expected 12 hex characters)",
            branch_id
        )))
    }
}

/// Double-quote an identifier sourced from the catalog.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Split a SQL script into statements, honoring quoted strings and
/// identifiers. Good enough for the branch script surface; parameterized
/// statements never pass through here.
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for c in sql.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            ';' if !in_single && !in_double => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Table name a `CREATE TABLE` statement would create, if any.
///
/// Understands `CREATE [OR REPLACE] TABLE [IF NOT EXISTS] <name>` with an
/// optionally quoted, optionally schema-qualified name. Returns the raw
/// name token with any inline column list stripped.
fn create_table_target(stmt: &str) -> Option<String> {
    let mut tokens = stmt.split_whitespace();
    if !tokens.next()?.eq_ignore_ascii_case("CREATE") {
        return None;
    }
    let mut tok = tokens.next()?;
    if tok.eq_ignore_ascii_case("OR") {
        if !tokens.next()?.eq_ignore_ascii_case("REPLACE") {
            return None;
        }
        tok = tokens.next()?;
    }
    if !tok.eq_ignore_ascii_case("TABLE") {
        return None;
    }
    let mut name = tokens.next()?;
    if name.eq_ignore_ascii_case("IF") {
        if !tokens.next()?.eq_ignore_ascii_case("NOT") {
            return None;
        }
        if !tokens.next()?.eq_ignore_ascii_case("EXISTS") {
            return None;
        }
        name = tokens.next()?;
    }
    let name = name.split('(').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// The branch table a statement materializes, if it creates a table that
/// would land in the branch schema (unqualified, or qualified with it).
pub(crate) fn materialization_target(stmt: &str, schema_name: &str) -> Option<String> {
    let raw = create_table_target(stmt)?;
    match raw.split_once('.') {
        None => Some(raw.trim_matches('"').to_string()),
        Some((schema, table)) if schema.trim_matches('"') == schema_name => {
            Some(table.trim_matches('"').to_string())
        }
        Some(_) => None,
    }
}

pub(crate) fn returns_rows(stmt: &str) -> bool {
    let head = stmt
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "PRAGMA")
}

fn schema_exists(conn: &Connection, schema: &str) -> Result<bool> {
    let rows = query_on(
        conn,
        "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
        &[schema.into()],
    )?;
    Ok(!rows.is_empty())
}

fn base_tables(conn: &Connection, schema: &str) -> Result<Vec<String>> {
    let rows = query_on(
        conn,
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        &[schema.into()],
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|r| r.get("table_name").and_then(|v| v.as_str().map(str::to_string)))
        .collect())
}

/// Copy-on-write materialization: a fresh branch shadows every main
/// table with a passthrough view, so a `CREATE TABLE` aimed at one of
/// those names replaces the view with a real table. The view is dropped
/// just before the create runs; the search path then resolves source
/// references like `FROM t` against main.
fn drop_shadowing_view(conn: &Connection, schema_name: &str, stmt: &str) -> Result<()> {
    let Some(table) = materialization_target(stmt, schema_name) else {
        return Ok(());
    };
    let views = query_on(
        conn,
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_name = $2 AND table_type = 'VIEW'",
        &[schema_name.into(), table.as_str().into()],
    )?;
    if !views.is_empty() {
        conn.execute_batch(&format!(
            "DROP VIEW {}.{}",
            quote_ident(schema_name),
            quote_ident(&table)
        ))?;
    }
    Ok(())
}

/// Restores the connection's search path when dropped, so branch-scoped
/// execution cannot leak its path on any exit.
struct SearchPathGuard<'a> {
    conn: &'a Connection,
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute_batch("RESET search_path") {
            tracing::warn!(error = %e, "Failed to restore search_path");
        }
    }
}

impl LocalEngine {
    /// Create a branch schema with views over every base table in main.
    ///
    /// `ttl_seconds` is informational only: the engine never schedules
    /// expiry; the host owns branch lifetime.
    pub fn branch_create(
        &self,
        name: Option<&str>,
        description: Option<&str>,
        ttl_seconds: i64,
    ) -> Result<BranchInfo> {
        let branch_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let schema_name = format!("branch_{}", branch_id);

        let conn = self.conn();
        conn.execute_batch(&format!("CREATE SCHEMA {}", quote_ident(&schema_name)))?;

        let tables = base_tables(&conn, "main")?;
        for table in &tables {
            let qt = quote_ident(table);
            conn.execute_batch(&format!(
                "CREATE VIEW {}.{} AS SELECT * FROM main.{}",
                quote_ident(&schema_name),
                qt,
                qt
            ))?;
        }

        tracing::info!(branch_id = %branch_id, tables = tables.len(), "Created branch");

        Ok(BranchInfo {
            name: name.unwrap_or(&schema_name).to_string(),
            description: description.unwrap_or_default().to_string(),
            table_count: tables.len(),
            ttl_seconds,
            created_at: utc_now_iso(),
            branch_id,
            schema_name,
        })
    }

    /// Execute SQL with the branch schema shadowing main.
    ///
    /// Multi-statement scripts run to completion; rows come back only
    /// from a trailing query statement. The search path is restored on
    /// every exit path, including errors.
    pub fn branch_query(&self, branch_id: &str, sql: &str) -> Result<Vec<JsonRow>> {
        validate_branch_id(branch_id)?;
        let schema_name = format!("branch_{}", branch_id);

        let conn = self.conn();
        if !schema_exists(&conn, &schema_name)? {
            return Err(Error::NotFound(format!("branch {}", branch_id)));
        }

        conn.execute_batch(&format!("SET search_path = '{},main'", schema_name))?;
        let _guard = SearchPathGuard { conn: &conn };

        let statements = split_statements(sql);
        let Some((last, head)) = statements.split_last() else {
            return Ok(Vec::new());
        };
        for stmt in head {
            drop_shadowing_view(&conn, &schema_name, stmt)?;
            conn.execute_batch(stmt)?;
        }
        if returns_rows(last) {
            query_on(&conn, last, &[])
        } else {
            drop_shadowing_view(&conn, &schema_name, last)?;
            conn.execute_batch(last)?;
            Ok(Vec::new())
        }
    }

    /// Merge a branch back into main and drop the branch schema.
    ///
    /// Only base tables in the branch schema are considered: views are
    /// unmodified passthroughs and carry nothing to merge. Strategy
    /// `branch_wins` replaces each counterpart in main; `main_wins`
    /// keeps main untouched. The branch schema is dropped either way.
    pub fn branch_merge(&self, branch_id: &str, strategy: MergeStrategy) -> Result<MergeResult> {
        validate_branch_id(branch_id)?;
        let schema_name = format!("branch_{}", branch_id);

        let conn = self.conn();
        if !schema_exists(&conn, &schema_name)? {
            return Err(Error::NotFound(format!("branch {}", branch_id)));
        }

        let tables = base_tables(&conn, &schema_name)?;
        let mut merged = 0;
        if strategy == MergeStrategy::BranchWins {
            for table in &tables {
                let qt = quote_ident(table);
                conn.execute_batch(&format!("DROP TABLE IF EXISTS main.{}", qt))?;
                conn.execute_batch(&format!(
                    "CREATE TABLE main.{} AS SELECT * FROM {}.{}",
                    qt,
                    quote_ident(&schema_name),
                    qt
                ))?;
                merged += 1;
            }
        }

        conn.execute_batch(&format!("DROP SCHEMA {} CASCADE", quote_ident(&schema_name)))?;
        tracing::info!(branch_id = %branch_id, merged, strategy = strategy.as_str(), "Merged branch");

        Ok(MergeResult {
            branch_id: branch_id.to_string(),
            strategy: strategy.as_str().to_string(),
            merged,
            status: "completed".to_string(),
        })
    }

    /// Drop a branch schema entirely. Returns true iff it existed.
    pub fn branch_discard(&self, branch_id: &str) -> Result<bool> {
        validate_branch_id(branch_id)?;
        let schema_name = format!("branch_{}", branch_id);

        let conn = self.conn();
        if !schema_exists(&conn, &schema_name)? {
            return Ok(false);
        }
        conn.execute_batch(&format!("DROP SCHEMA {} CASCADE", quote_ident(&schema_name)))?;
        tracing::info!(branch_id = %branch_id, "Discarded branch");
        Ok(true)
    }

    /// List branch schemas with per-branch materialization counts.
    pub fn branch_list(&self) -> Result<Vec<BranchStatus>> {
        let conn = self.conn();
        let rows = query_on(
            &conn,
            "SELECT schema_name FROM information_schema.schemata \
             WHERE schema_name LIKE 'branch%' ORDER BY schema_name",
            &[],
        )?;

        let mut branches = Vec::new();
        for row in rows {
            let Some(schema_name) = row.get("schema_name").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(branch_id) = schema_name.strip_prefix("branch_") else {
                continue;
            };

            let counts = query_on(
                &conn,
                "SELECT table_type, COUNT(*) AS cnt FROM information_schema.tables \
                 WHERE table_schema = $1 GROUP BY table_type",
                &[schema_name.into()],
            )?;
            let mut tables = 0;
            let mut views = 0;
            for c in counts {
                let cnt = c.get("cnt").and_then(|v| v.as_i64()).unwrap_or(0);
                match c.get("table_type").and_then(|v| v.as_str()) {
                    Some("VIEW") => views += cnt,
                    _ => tables += cnt,
                }
            }

            branches.push(BranchStatus {
                branch_id: branch_id.to_string(),
                schema_name: schema_name.to_string(),
                materialized_tables: tables,
                views,
                status: "active".to_string(),
            });
        }
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqlBackend;

    fn engine_with_table() -> LocalEngine {
        let engine = LocalEngine::open_in_memory().unwrap();
        {
            let conn = engine.conn();
            conn.execute_batch(
                "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);",
            )
            .unwrap();
        }
        engine
    }

    #[test]
    fn branch_id_validation() {
        assert!(validate_branch_id("0123456789ab").is_ok());
        assert!(validate_branch_id("0123456789AB").is_err());
        assert!(validate_branch_id("0123456789a").is_err());
        assert!(validate_branch_id("0123456789ab; DROP").is_err());
        assert!(validate_branch_id("").is_err());
    }

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn materialization_target_parses_create_table_forms() {
        let schema = "branch_abcdefabcdef";
        assert_eq!(
            materialization_target("CREATE TABLE t AS SELECT * FROM main.t", schema),
            Some("t".to_string())
        );
        assert_eq!(
            materialization_target("create table if not exists \"t\"(id INTEGER)", schema),
            Some("t".to_string())
        );
        assert_eq!(
            materialization_target("CREATE OR REPLACE TABLE branch_abcdefabcdef.t AS SELECT 1", schema),
            Some("t".to_string())
        );
        // Creations aimed elsewhere are left alone.
        assert_eq!(
            materialization_target("CREATE TABLE main.t AS SELECT 1", schema),
            None
        );
        assert_eq!(materialization_target("CREATE VIEW v AS SELECT 1", schema), None);
        assert_eq!(materialization_target("INSERT INTO t VALUES (1)", schema), None);
    }

    #[test]
    fn split_statements_honors_quotes() {
        let parts = split_statements("SELECT 'a;b'; INSERT INTO t VALUES (1);");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], "SELECT 'a;b'");

        assert!(split_statements("  ;;  ").is_empty());
        assert_eq!(split_statements("SELECT 1").len(), 1);
    }

    #[test]
    fn new_branch_sees_main_content() {
        let engine = engine_with_table();
        let info = engine.branch_create(None, None, 3600).unwrap();
        assert_eq!(info.table_count, 1);
        assert_eq!(info.schema_name, format!("branch_{}", info.branch_id));

        let rows = engine
            .branch_query(&info.branch_id, "SELECT count(*) AS c FROM t")
            .unwrap();
        assert_eq!(rows[0]["c"], serde_json::json!(2));
    }

    #[test]
    fn branch_writes_are_isolated_until_merge() {
        let engine = engine_with_table();
        let info = engine.branch_create(Some("exp"), Some("trial"), 60).unwrap();
        assert_eq!(info.name, "exp");
        assert_eq!(info.description, "trial");

        engine
            .branch_query(
                &info.branch_id,
                "CREATE TABLE t AS SELECT * FROM main.t; INSERT INTO t VALUES (3);",
            )
            .unwrap();

        let branch_count = engine
            .branch_query(&info.branch_id, "SELECT count(*) AS c FROM t")
            .unwrap();
        assert_eq!(branch_count[0]["c"], serde_json::json!(3));

        let main_count = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
        assert_eq!(main_count[0]["c"], serde_json::json!(2));

        let result = engine
            .branch_merge(&info.branch_id, MergeStrategy::BranchWins)
            .unwrap();
        assert_eq!(result.merged, 1);
        assert_eq!(result.status, "completed");

        let main_count = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
        assert_eq!(main_count[0]["c"], serde_json::json!(3));

        // Branch schema is gone.
        assert!(engine.branch_list().unwrap().is_empty());
        assert!(matches!(
            engine.branch_query(&info.branch_id, "SELECT 1"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn main_wins_merge_keeps_main_and_drops_branch() {
        let engine = engine_with_table();
        let info = engine.branch_create(None, None, 3600).unwrap();
        engine
            .branch_query(
                &info.branch_id,
                "CREATE TABLE t AS SELECT * FROM main.t; DELETE FROM t;",
            )
            .unwrap();

        let result = engine
            .branch_merge(&info.branch_id, MergeStrategy::MainWins)
            .unwrap();
        assert_eq!(result.merged, 0);

        let main_count = engine.query("SELECT count(*) AS c FROM main.t", &[]).unwrap();
        assert_eq!(main_count[0]["c"], serde_json::json!(2));
        assert!(engine.branch_list().unwrap().is_empty());
    }

    #[test]
    fn discard_reports_existence() {
        let engine = engine_with_table();
        let info = engine.branch_create(None, None, 3600).unwrap();

        assert!(engine.branch_discard(&info.branch_id).unwrap());
        assert!(!engine.branch_discard(&info.branch_id).unwrap());
        assert!(matches!(
            engine.branch_query(&info.branch_id, "SELECT 1"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn list_distinguishes_views_from_materialized_tables() {
        let engine = engine_with_table();
        let info = engine.branch_create(None, None, 3600).unwrap();

        let listed = engine.branch_list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].branch_id, info.branch_id);
        assert_eq!(listed[0].views, 1);
        assert_eq!(listed[0].materialized_tables, 0);
        assert_eq!(listed[0].status, "active");

        engine
            .branch_query(&info.branch_id, "CREATE TABLE u (x INTEGER)")
            .unwrap();
        let listed = engine.branch_list().unwrap();
        assert_eq!(listed[0].materialized_tables, 1);
        assert_eq!(listed[0].views, 1);
    }

    #[test]
    fn search_path_is_restored_after_errors() {
        let engine = engine_with_table();
        let info = engine.branch_create(None, None, 3600).unwrap();
        engine
            .branch_query(&info.branch_id, "CREATE TABLE t AS SELECT * FROM main.t; INSERT INTO t VALUES (3);")
            .unwrap();

        // A failing branch query must not leak the branch search path.
        assert!(engine
            .branch_query(&info.branch_id, "SELECT * FROM does_not_exist")
            .is_err());

        // Unqualified names resolve against main again.
        let rows = engine.query("SELECT count(*) AS c FROM t", &[]).unwrap();
        assert_eq!(rows[0]["c"], serde_json::json!(2));
    }

    #[test]
    fn unknown_branch_operations_fail_cleanly() {
        let engine = engine_with_table();
        assert!(matches!(
            engine.branch_query("abcdefabcdef", "SELECT 1"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.branch_merge("abcdefabcdef", MergeStrategy::BranchWins),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.branch_query("not-a-branch!", "SELECT 1"),
            Err(Error::BadArgument(_))
        ));
    }
}
