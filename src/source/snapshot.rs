//! SQLite snapshot source.
//!
//! A snapshot is a local SQLite file holding exports of the two workflow
//! tables with the same column names. Discriminators are stored as text.
//! It lets a resolution run without a tunnel or a database server.

use super::{ASSIGNMENT_TABLE, TASK_TABLE, WorkflowSource};
use crate::models::{AssignmentRecord, TaskRecord};
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::Path;
use uuid::Uuid;

/// Schema for building a snapshot file.
pub const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sungero_wf_assignment (
    Id INTEGER PRIMARY KEY,
    Discriminator TEXT NOT NULL,
    task INTEGER
);

CREATE TABLE IF NOT EXISTS sungero_wf_task (
    Id INTEGER PRIMARY KEY,
    Discriminator TEXT NOT NULL,
    MainTask INTEGER,
    ParentTask INTEGER,
    ParentAsg INTEGER
);
"#;

const ASSIGNMENT_BY_ID: &str = "SELECT Id, task FROM sungero_wf_assignment WHERE Id = ?1";
const ASSIGNMENT_BY_ID_AND_DISCRIMINATOR: &str =
    "SELECT Id, task FROM sungero_wf_assignment WHERE Id = ?1 AND lower(Discriminator) = ?2";
const TASK_BY_ID: &str =
    "SELECT Id, MainTask, ParentTask, ParentAsg FROM sungero_wf_task WHERE Id = ?1";
const TASK_BY_ID_AND_DISCRIMINATOR: &str = "SELECT Id, MainTask, ParentTask, ParentAsg \
     FROM sungero_wf_task WHERE Id = ?1 AND lower(Discriminator) = ?2";

pub struct SnapshotSource {
    conn: Connection,
    location: String,
}

impl SnapshotSource {
    /// Open an existing snapshot read-only.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "snapshot file {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::from_connection(conn, format!("snapshot {}", path.display()))
    }

    /// Create (or extend) a snapshot file with the workflow schema.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SNAPSHOT_SCHEMA)?;
        Self::from_connection(conn, format!("snapshot {}", path.display()))
    }

    /// Wrap an already open connection, checking both tables are present.
    pub fn from_connection(conn: Connection, location: impl Into<String>) -> Result<Self> {
        for table in [ASSIGNMENT_TABLE, TASK_TABLE] {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND lower(name) = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(Error::InvalidInput(format!(
                    "snapshot has no {} table",
                    table
                )));
            }
        }
        Ok(Self {
            conn,
            location: location.into(),
        })
    }

    /// Access the underlying connection (used to load fixture rows).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: row.get(0)?,
        linked_task_id: row.get(1)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        root_task_id: TaskRecord::root_from_column(row.get(1)?),
        parent_task_id: row.get(2)?,
        parent_assignment_id: row.get(3)?,
    })
}

impl WorkflowSource for SnapshotSource {
    fn assignment(
        &mut self,
        id: i64,
        discriminator: Option<Uuid>,
    ) -> Result<Option<AssignmentRecord>> {
        let record = match discriminator {
            Some(d) => self
                .conn
                .query_row(
                    ASSIGNMENT_BY_ID_AND_DISCRIMINATOR,
                    params![id, d.hyphenated().to_string()],
                    assignment_from_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(ASSIGNMENT_BY_ID, params![id], assignment_from_row)
                .optional()?,
        };
        Ok(record)
    }

    fn task(&mut self, id: i64, discriminator: Option<Uuid>) -> Result<Option<TaskRecord>> {
        let record = match discriminator {
            Some(d) => self
                .conn
                .query_row(
                    TASK_BY_ID_AND_DISCRIMINATOR,
                    params![id, d.hyphenated().to_string()],
                    task_from_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(TASK_BY_ID, params![id], task_from_row)
                .optional()?,
        };
        Ok(record)
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: &str = "4e585572-f5a6-4c0d-9c0b-6f6f8d8e6a11";

    fn fixture() -> SnapshotSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SNAPSHOT_SCHEMA).unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO sungero_wf_assignment (Id, Discriminator, task) VALUES (1001, '{D}', 2002);
             INSERT INTO sungero_wf_assignment (Id, Discriminator, task) VALUES (1002, '{D}', NULL);
             INSERT INTO sungero_wf_task VALUES (2002, '{D}', 3003, 3003, NULL);
             INSERT INTO sungero_wf_task VALUES (3003, '{}', 3003, NULL, NULL);
             INSERT INTO sungero_wf_task VALUES (4004, '{D}', 0, NULL, NULL);",
            D.to_uppercase()
        ))
        .unwrap();
        SnapshotSource::from_connection(conn, "memory").unwrap()
    }

    fn d() -> Uuid {
        D.parse().unwrap()
    }

    #[test]
    fn test_assignment_lookup_by_id_and_discriminator() {
        let mut source = fixture();
        let record = source.assignment(1001, Some(d())).unwrap().unwrap();
        assert_eq!(record.linked_task_id, Some(2002));

        assert!(source.assignment(1001, Some(Uuid::nil())).unwrap().is_none());
    }

    #[test]
    fn test_assignment_without_link() {
        let mut source = fixture();
        let record = source.assignment(1002, None).unwrap().unwrap();
        assert_eq!(record.linked_task_id, None);
    }

    #[test]
    fn test_task_lookup_reads_all_pointers() {
        let mut source = fixture();
        let record = source.task(2002, None).unwrap().unwrap();
        assert_eq!(record.root_task_id, Some(3003));
        assert_eq!(record.parent_task_id, Some(3003));
        assert_eq!(record.parent_assignment_id, None);
    }

    #[test]
    fn test_discriminator_match_is_case_insensitive() {
        let mut source = fixture();
        assert!(source.task(3003, Some(d())).unwrap().is_some());
    }

    #[test]
    fn test_zero_main_task_reads_as_none() {
        let mut source = fixture();
        let record = source.task(4004, None).unwrap().unwrap();
        assert_eq!(record.root_task_id, None);
    }

    #[test]
    fn test_missing_rows_are_none() {
        let mut source = fixture();
        assert!(source.task(9999, None).unwrap().is_none());
        assert!(source.assignment(9999, None).unwrap().is_none());
    }

    #[test]
    fn test_from_connection_requires_both_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE sungero_wf_task (Id INTEGER);")
            .unwrap();
        let err = SnapshotSource::from_connection(conn, "memory").err().unwrap();
        assert!(err.to_string().contains("sungero_wf_assignment"));
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = SnapshotSource::open(&dir.path().join("absent.db"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
