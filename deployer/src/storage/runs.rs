//! Run history persisted in SQLite

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::models::run::{HostResults, RunRecord};

/// Column headers of the CSV export, in order
pub const CSV_HEADERS: [&str; 4] = [
    "Hostname",
    "Legacy Agent Removed",
    "Agent Installed",
    "Status",
];

type RunRow = (i64, String, DateTime<Utc>, String, String, Option<i32>);

const SELECT_RUN: &str =
    "SELECT id, initiator, timestamp, raw_log, host_results, exit_code FROM runs";

/// Append-only store of completed deployments
pub struct RunRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl RunRecorder {
    /// Open or create the database at `file`
    pub async fn open(file: &File) -> Result<Self, DeployerError> {
        let path = file.path().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Opening run history database at: {}", path.display());

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, DeployerError> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(conn)
        })
        .await
        .map_err(|e| DeployerError::Internal(e.to_string()))??;

        Self::with_connection(conn).await
    }

    /// A private in-memory database
    pub async fn open_in_memory() -> Result<Self, DeployerError> {
        Self::with_connection(Connection::open_in_memory()?).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, DeployerError> {
        let recorder = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        recorder.initialize_schema().await?;
        Ok(recorder)
    }

    async fn initialize_schema(&self) -> Result<(), DeployerError> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    initiator TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    raw_log TEXT NOT NULL,
                    host_results TEXT NOT NULL,
                    exit_code INTEGER
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs(timestamp)",
                [],
            )?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DeployerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DeployerError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| DeployerError::Internal(e.to_string()))?
    }

    /// Persist a finished run
    pub async fn record(
        &self,
        initiator: &str,
        raw_log: &str,
        host_results: &HostResults,
        exit_code: Option<i32>,
    ) -> Result<RunRecord, DeployerError> {
        let mut record = RunRecord {
            id: 0,
            initiator: initiator.to_string(),
            timestamp: Utc::now(),
            raw_log: raw_log.to_string(),
            host_results: host_results.clone(),
            exit_code,
        };
        let results_json = serde_json::to_string(&record.host_results)?;

        let (initiator, timestamp, raw_log) =
            (record.initiator.clone(), record.timestamp, record.raw_log.clone());
        record.id = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO runs (initiator, timestamp, raw_log, host_results, exit_code)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![initiator, timestamp, raw_log, results_json, exit_code],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!("Recorded run {} for {}", record.id, record.initiator);
        Ok(record)
    }

    /// All runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunRecord>, DeployerError> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_RUN} ORDER BY timestamp DESC, id DESC"))?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(into_record).collect()
    }

    /// One run by id
    pub async fn get_run(&self, id: i64) -> Result<RunRecord, DeployerError> {
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(&format!("{SELECT_RUN} WHERE id = ?1"), params![id], read_row)
                    .optional()?;
                Ok(row)
            })
            .await?;

        match row {
            Some(row) => into_record(row),
            None => Err(DeployerError::NotFound(format!("run {}", id))),
        }
    }

    /// CSV summary of one run
    pub async fn export_csv(&self, id: i64) -> Result<String, DeployerError> {
        let record = self.get_run(id).await?;
        render_csv(&record)
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_record(row: RunRow) -> Result<RunRecord, DeployerError> {
    let (id, initiator, timestamp, raw_log, results_json, exit_code) = row;
    Ok(RunRecord {
        id,
        initiator,
        timestamp,
        raw_log,
        host_results: serde_json::from_str(&results_json)?,
        exit_code,
    })
}

/// Render the host summary of `record`: a header row, then one row per host
pub fn render_csv(record: &RunRecord) -> Result<String, DeployerError> {
    let csv_error = |e: csv::Error| DeployerError::Internal(format!("CSV export failed: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS).map_err(csv_error)?;
    for (host, result) in &record.host_results {
        writer
            .write_record([
                host.as_str(),
                yes_no(result.removed_legacy_agent),
                yes_no(result.installed_agent),
                result.status.as_str(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DeployerError::Internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| DeployerError::Internal(e.to_string()))
}

/// Boolean cell text
pub fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}
