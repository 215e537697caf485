//! Typed query helpers for every table in the sandsync database.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use serde::Serialize;
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::ProjectRecord;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub project_id: String,
    pub action: String,
    pub commit_sha: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

const PROJECT_COLUMNS: &str = "id, name, repository_id, last_commit, updated_at";

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    let updated_at: String = row.get(4)?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(ProjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        repository_id: row.get(2)?,
        last_commit: row.get(3)?,
        updated_at,
    })
}

fn project_not_found(id: &str) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "project".into(),
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- projects -----------------------------------------------------------

    /// Insert a new, unlinked project.
    pub fn insert_project(&self, id: &str, name: &str) -> Result<ProjectRecord, DatabaseError> {
        let now = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO projects (id, name, updated_at) VALUES (?1, ?2, ?3)",
            params![id, name, now.to_rfc3339()],
        )?;
        debug!(id, name, "inserted project");
        Ok(ProjectRecord {
            id: id.to_string(),
            name: name.to_string(),
            repository_id: None,
            last_commit: None,
            updated_at: now,
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects WHERE id = ?1",
            PROJECT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], row_to_project)?;
        match rows.next() {
            Some(Ok(project)) => Ok(Some(project)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// List every project, oldest first.
    pub fn list_projects(&self) -> Result<Vec<ProjectRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects ORDER BY created_at, id",
            PROJECT_COLUMNS
        ))?;
        let projects = stmt
            .query_map([], row_to_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// Record the repository a project is linked to and the SHA it is in
    /// sync with.
    pub fn link_repository(
        &self,
        id: &str,
        repository_id: &str,
        last_commit: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE projects SET repository_id = ?1, last_commit = ?2, updated_at = ?3 WHERE id = ?4",
            params![repository_id, last_commit, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(project_not_found(id));
        }
        debug!(id, repository_id, "linked repository");
        Ok(())
    }

    /// Update the last synced commit SHA.
    pub fn set_last_commit(&self, id: &str, sha: &str) -> Result<(), DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE projects SET last_commit = ?1, updated_at = ?2 WHERE id = ?3",
            params![sha, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(project_not_found(id));
        }
        debug!(id, sha, "recorded last commit");
        Ok(())
    }

    /// Unlink the project from its repository and forget the synced SHA.
    pub fn clear_repository(&self, id: &str) -> Result<(), DatabaseError> {
        let changed = self.conn().execute(
            "UPDATE projects SET repository_id = NULL, last_commit = NULL, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(project_not_found(id));
        }
        debug!(id, "cleared repository link");
        Ok(())
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit-log entry for one sync operation.
    pub fn insert_audit_log(
        &self,
        project_id: &str,
        action: &str,
        commit_sha: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (project_id, action, commit_sha, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![project_id, action, commit_sha, details, success, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, project_id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Most recent audit-log entries for a project, newest first.
    pub fn list_audit_log(
        &self,
        project_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, action, commit_sha, details, success, created_at
             FROM audit_log WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![project_id, limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    action: row.get(2)?,
                    commit_sha: row.get(3)?,
                    details: row.get(4)?,
                    success: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
