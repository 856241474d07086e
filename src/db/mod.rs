mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::*;

/// Errors the store reports to callers as distinct outcomes rather than
/// failures of the database itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("estimate {0} already exists")]
    EstimateExists(String),
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Estimate operations
    // ============================================================

    pub fn get_all_estimates(&self) -> Result<Vec<Estimate>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_name, start_date, created_at, is_draft, epics
             FROM estimates ORDER BY created_at DESC",
        )?;

        let rows = stmt
            .query_map([], EstimateRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(EstimateRow::into_estimate).collect()
    }

    pub fn get_estimate(&self, id: &str) -> Result<Option<Estimate>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        load_estimate(&conn, id)
    }

    pub fn create_estimate(&self, input: CreateEstimateInput) -> Result<Estimate> {
        let epics = EstimateTree::from_records(input.epics.unwrap_or_default())?;
        let estimate = Estimate {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            project_name: input
                .project_name
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            start_date: input
                .start_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            created_at: Utc::now(),
            is_draft: input.is_draft.unwrap_or(true),
            epics,
        };

        let conn = self.conn.lock().expect("database lock poisoned");
        if load_estimate(&conn, &estimate.id)?.is_some() {
            return Err(StoreError::EstimateExists(estimate.id).into());
        }
        insert_estimate(&conn, &estimate)?;

        tracing::info!(id = %estimate.id, project = %estimate.project_name, "created estimate");
        Ok(estimate)
    }

    pub fn update_estimate(
        &self,
        id: &str,
        input: UpdateEstimateInput,
    ) -> Result<Option<Estimate>> {
        let updated = self.with_estimate(id, |estimate| {
            if let Some(epics) = input.epics {
                estimate.epics.reconcile(epics)?;
            }
            if let Some(name) = input.project_name {
                estimate.project_name = name;
            }
            if let Some(date) = input.start_date {
                estimate.start_date = date;
            }
            if let Some(is_draft) = input.is_draft {
                estimate.is_draft = is_draft;
            }
            Ok(())
        })?;

        Ok(updated.map(|(estimate, ())| estimate))
    }

    /// Load an estimate, let `change` edit it and write it back.
    ///
    /// The connection stays locked for the whole read-modify-write. Nothing
    /// is written when `change` fails; its error is returned as is so callers
    /// can downcast domain errors. Returns `None` if the estimate is missing.
    pub fn with_estimate<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut Estimate) -> Result<T>,
    ) -> Result<Option<(Estimate, T)>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let Some(mut estimate) = load_estimate(&conn, id)? else {
            return Ok(None);
        };

        let output = change(&mut estimate)?;
        save_estimate(&conn, &estimate)?;
        Ok(Some((estimate, output)))
    }

    /// Delete an estimate. Its drafts go with it.
    pub fn delete_estimate(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM estimates WHERE id = ?", [id])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Draft operations
    // ============================================================

    pub fn get_drafts(&self, estimate_id: &str) -> Result<Vec<Draft>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, timestamp, estimate_id, estimate_data
             FROM drafts WHERE estimate_id = ? ORDER BY timestamp DESC",
        )?;

        let rows = stmt
            .query_map([estimate_id], DraftRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(DraftRow::into_draft).collect()
    }

    pub fn get_draft(&self, estimate_id: &str, draft_id: &str) -> Result<Option<Draft>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let row = conn
            .query_row(
                "SELECT id, name, timestamp, estimate_id, estimate_data
                 FROM drafts WHERE id = ? AND estimate_id = ?",
                [draft_id, estimate_id],
                DraftRow::from_row,
            )
            .optional()?;

        row.map(DraftRow::into_draft).transpose()
    }

    /// Save a snapshot of an estimate. Returns `None` if the estimate does
    /// not exist.
    ///
    /// The snapshot is normalized on the way in: missing node ids are
    /// generated, duplicate ids are rejected and it is always marked as a
    /// draft.
    pub fn create_draft(
        &self,
        estimate_id: &str,
        input: CreateDraftInput,
    ) -> Result<Option<Draft>> {
        let mut data = input.estimate_data;
        if data.id.is_empty() {
            data.id = estimate_id.to_string();
        }
        let mut snapshot = EstimateRecord::from(&Estimate::try_from(data)?);
        snapshot.is_draft = true;

        let conn = self.conn.lock().expect("database lock poisoned");
        if load_estimate(&conn, estimate_id)?.is_none() {
            return Ok(None);
        }

        let timestamp = Utc::now();
        let draft = Draft {
            id: Uuid::new_v4().to_string(),
            name: input
                .name
                .unwrap_or_else(|| default_draft_name(timestamp)),
            timestamp,
            estimate_id: estimate_id.to_string(),
            estimate: snapshot,
        };

        conn.execute(
            "INSERT INTO drafts (id, estimate_id, name, timestamp, estimate_data)
             VALUES (?, ?, ?, ?, ?)",
            (
                &draft.id,
                &draft.estimate_id,
                &draft.name,
                draft.timestamp.to_rfc3339(),
                serde_json::to_string(&draft.estimate)?,
            ),
        )?;

        tracing::info!(id = %draft.id, estimate_id, name = %draft.name, "saved draft");
        Ok(Some(draft))
    }

    pub fn delete_draft(&self, estimate_id: &str, draft_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM drafts WHERE id = ? AND estimate_id = ?",
            [draft_id, estimate_id],
        )?;
        Ok(rows > 0)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// `ESTIMATE_DB_PATH`, or `estimates.db` in the platform data directory.
pub fn default_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("ESTIMATE_DB_PATH") {
        return Ok(PathBuf::from(path));
    }
    let dirs = directories::ProjectDirs::from("", "", "estimate-manager")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("estimates.db"))
}

// ============================================================
// Row mapping
// ============================================================

struct EstimateRow {
    id: String,
    project_name: String,
    start_date: String,
    created_at: String,
    is_draft: bool,
    epics: String,
}

impl EstimateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_name: row.get(1)?,
            start_date: row.get(2)?,
            created_at: row.get(3)?,
            is_draft: row.get::<_, i32>(4)? != 0,
            epics: row.get(5)?,
        })
    }

    fn into_estimate(self) -> Result<Estimate> {
        let records: Vec<NodeRecord> = serde_json::from_str(&self.epics)
            .with_context(|| format!("Corrupt epics for estimate {}", self.id))?;
        let start_date = lenient::parse_date(&self.start_date)
            .ok_or_else(|| anyhow::anyhow!("Bad start_date for estimate {}", self.id))?;

        Ok(Estimate {
            epics: EstimateTree::from_records(records)?,
            start_date,
            created_at: parse_datetime(&self.created_at)
                .with_context(|| format!("Bad created_at for estimate {}", self.id))?,
            id: self.id,
            project_name: self.project_name,
            is_draft: self.is_draft,
        })
    }
}

struct DraftRow {
    id: String,
    name: String,
    timestamp: String,
    estimate_id: String,
    estimate_data: String,
}

impl DraftRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            timestamp: row.get(2)?,
            estimate_id: row.get(3)?,
            estimate_data: row.get(4)?,
        })
    }

    fn into_draft(self) -> Result<Draft> {
        let estimate = serde_json::from_str(&self.estimate_data)
            .with_context(|| format!("Corrupt snapshot for draft {}", self.id))?;
        let timestamp = parse_datetime(&self.timestamp)
            .with_context(|| format!("Bad timestamp for draft {}", self.id))?;
        Ok(Draft {
            timestamp,
            id: self.id,
            name: self.name,
            estimate_id: self.estimate_id,
            estimate,
        })
    }
}

fn load_estimate(conn: &Connection, id: &str) -> Result<Option<Estimate>> {
    let row = conn
        .query_row(
            "SELECT id, project_name, start_date, created_at, is_draft, epics
             FROM estimates WHERE id = ?",
            [id],
            EstimateRow::from_row,
        )
        .optional()?;

    row.map(EstimateRow::into_estimate).transpose()
}

fn insert_estimate(conn: &Connection, estimate: &Estimate) -> Result<()> {
    conn.execute(
        "INSERT INTO estimates (id, project_name, start_date, created_at, is_draft, epics)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &estimate.id,
            &estimate.project_name,
            estimate.start_date.to_string(),
            estimate.created_at.to_rfc3339(),
            if estimate.is_draft { 1 } else { 0 },
            serde_json::to_string(&estimate.epics.to_records())?,
        ),
    )?;
    Ok(())
}

fn save_estimate(conn: &Connection, estimate: &Estimate) -> Result<()> {
    conn.execute(
        "UPDATE estimates SET project_name = ?, start_date = ?, is_draft = ?, epics = ? WHERE id = ?",
        (
            &estimate.project_name,
            estimate.start_date.to_string(),
            if estimate.is_draft { 1 } else { 0 },
            serde_json::to_string(&estimate.epics.to_records())?,
            &estimate.id,
        ),
    )?;
    Ok(())
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<Utc>> {
    lenient::parse_datetime(s).ok_or_else(|| anyhow::anyhow!("unparseable timestamp {:?}", s))
}
