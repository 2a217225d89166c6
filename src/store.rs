use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{ResolveRunManifest, TemplateResolutionResult};
use crate::util::{ensure_directory, now_utc_string};

pub const DB_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq)]
pub struct LatestRun {
    pub run_id: String,
    pub template_name: String,
    pub document_path: String,
    pub finished_at: String,
    pub flow_element_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub run_count: i64,
    pub signer_count: i64,
    pub flow_element_count: i64,
    pub latest: Option<LatestRun>,
}

pub fn open_ledger(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let connection = Connection::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
          run_id TEXT PRIMARY KEY,
          status TEXT NOT NULL,
          document_path TEXT NOT NULL,
          document_sha256 TEXT NOT NULL,
          template_name TEXT NOT NULL,
          send_method_type TEXT NOT NULL,
          languages TEXT NOT NULL,
          sender_key TEXT,
          page_count INTEGER NOT NULL,
          result_path TEXT NOT NULL,
          warnings_json TEXT NOT NULL,
          started_at TEXT NOT NULL,
          finished_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS signers (
          run_id TEXT NOT NULL,
          signer_index INTEGER NOT NULL,
          title TEXT NOT NULL,
          signer_type TEXT NOT NULL,
          fields_json TEXT NOT NULL,
          fixed_key_type TEXT,
          fixed_key TEXT,
          PRIMARY KEY (run_id, signer_index),
          FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS flow_elements (
          run_id TEXT NOT NULL,
          element_id TEXT NOT NULL,
          page_number INTEGER NOT NULL,
          x1 REAL NOT NULL,
          y1 REAL NOT NULL,
          x2 REAL NOT NULL,
          y2 REAL NOT NULL,
          label TEXT,
          element_type TEXT NOT NULL,
          signer_index INTEGER NOT NULL,
          PRIMARY KEY (run_id, element_id),
          FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_runs_document ON runs(document_sha256);
        CREATE INDEX IF NOT EXISTS idx_runs_finished ON runs(finished_at);
        CREATE INDEX IF NOT EXISTS idx_flow_elements_signer ON flow_elements(run_id, signer_index);
        ",
        )
        .context("failed to create ledger schema")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub fn record_run(
    connection: &mut Connection,
    manifest: &ResolveRunManifest,
    result: &TemplateResolutionResult,
) -> Result<()> {
    let tx = connection
        .transaction()
        .context("failed to start ledger transaction")?;

    tx.execute("DELETE FROM flow_elements WHERE run_id = ?1", [&manifest.run_id])?;
    tx.execute("DELETE FROM signers WHERE run_id = ?1", [&manifest.run_id])?;
    tx.execute("DELETE FROM runs WHERE run_id = ?1", [&manifest.run_id])?;

    let warnings_json =
        serde_json::to_string(&manifest.warnings).context("failed to serialize warnings")?;
    tx.execute(
        "INSERT INTO runs(
           run_id, status, document_path, document_sha256, template_name, send_method_type,
           languages, sender_key, page_count, result_path, warnings_json, started_at, finished_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            manifest.run_id,
            manifest.status,
            manifest.document_path,
            manifest.document_sha256,
            result.template_name,
            result.send_method_type.as_str(),
            result.languages,
            result.sender_key.as_ref().map(|key| key.key.as_str()),
            result.page_count as i64,
            manifest.result_path,
            warnings_json,
            manifest.started_at,
            manifest.updated_at,
        ],
    )
    .with_context(|| format!("failed to insert run {}", manifest.run_id))?;

    {
        let mut statement = tx.prepare(
            "INSERT INTO signers(
               run_id, signer_index, title, signer_type, fields_json, fixed_key_type, fixed_key
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (index, signer) in result.signers.iter().enumerate() {
            let fields_json = serde_json::to_string(&signer.fields)
                .context("failed to serialize signer fields")?;
            statement
                .execute(params![
                    manifest.run_id,
                    index as i64,
                    signer.title,
                    signer.signer_type.as_str(),
                    fields_json,
                    signer
                        .fixed_signer_key
                        .as_ref()
                        .map(|key| key.key_type.as_str()),
                    signer.fixed_signer_key.as_ref().map(|key| key.key.as_str()),
                ])
                .with_context(|| format!("failed to insert signer {}", signer.title))?;
        }
    }

    {
        let mut statement = tx.prepare(
            "INSERT INTO flow_elements(
               run_id, element_id, page_number, x1, y1, x2, y2, label, element_type, signer_index
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for element in &result.flow_elements {
            statement
                .execute(params![
                    manifest.run_id,
                    element.element_id,
                    element.page_number,
                    element.position.x1,
                    element.position.y1,
                    element.position.x2,
                    element.position.y2,
                    element.label,
                    element.element_type.as_str(),
                    element.signer_index as i64,
                ])
                .with_context(|| format!("failed to insert element {}", element.element_id))?;
        }
    }

    tx.commit().context("failed to commit ledger transaction")?;
    Ok(())
}

pub fn ledger_summary(connection: &Connection) -> Result<LedgerSummary> {
    let run_count = query_count(connection, "SELECT COUNT(*) FROM runs")?;
    let signer_count = query_count(connection, "SELECT COUNT(*) FROM signers")?;
    let flow_element_count = query_count(connection, "SELECT COUNT(*) FROM flow_elements")?;

    let latest = connection
        .query_row(
            "SELECT r.run_id, r.template_name, r.document_path, r.finished_at,
                    (SELECT COUNT(*) FROM flow_elements e WHERE e.run_id = r.run_id)
             FROM runs r
             ORDER BY r.finished_at DESC, r.run_id DESC
             LIMIT 1",
            [],
            |row| {
                Ok(LatestRun {
                    run_id: row.get(0)?,
                    template_name: row.get(1)?,
                    document_path: row.get(2)?,
                    finished_at: row.get(3)?,
                    flow_element_count: row.get(4)?,
                })
            },
        )
        .optional()
        .context("failed to read latest run")?;

    Ok(LedgerSummary {
        run_count,
        signer_count,
        flow_element_count,
        latest,
    })
}

fn query_count(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to run {sql}"))?;
    Ok(count)
}
