//! PostgreSQL-backed source over an open database session.

use super::WorkflowSource;
use crate::Result;
use crate::models::{AssignmentRecord, TaskRecord};
use postgres::{Client, Row};
use uuid::Uuid;

const ASSIGNMENT_BY_ID: &str = "SELECT Id, task FROM sungero_wf_assignment WHERE Id = $1";
const ASSIGNMENT_BY_ID_AND_DISCRIMINATOR: &str =
    "SELECT Id, task FROM sungero_wf_assignment WHERE Id = $1 AND Discriminator = $2";
const TASK_BY_ID: &str =
    "SELECT Id, MainTask, ParentTask, ParentAsg FROM sungero_wf_task WHERE Id = $1";
const TASK_BY_ID_AND_DISCRIMINATOR: &str = "SELECT Id, MainTask, ParentTask, ParentAsg \
     FROM sungero_wf_task WHERE Id = $1 AND Discriminator = $2";

/// Borrowed view of a live database client as a [`WorkflowSource`].
pub struct PgSource<'a> {
    client: &'a mut Client,
    location: String,
}

impl<'a> PgSource<'a> {
    pub fn new(client: &'a mut Client, location: impl Into<String>) -> Self {
        Self {
            client,
            location: location.into(),
        }
    }

    fn query_one_row(
        &mut self,
        by_id: &str,
        by_id_and_discriminator: &str,
        id: i64,
        discriminator: Option<Uuid>,
    ) -> Result<Option<Row>> {
        let sql = statement(by_id, by_id_and_discriminator, discriminator);
        let row = match discriminator {
            Some(d) => self.client.query_opt(sql, &[&id, &d])?,
            None => self.client.query_opt(sql, &[&id])?,
        };
        Ok(row)
    }
}

/// Lookups inside the walk carry no discriminator and match on id alone.
fn statement<'q>(by_id: &'q str, filtered: &'q str, discriminator: Option<Uuid>) -> &'q str {
    if discriminator.is_some() {
        filtered
    } else {
        by_id
    }
}

/// Named column access, so row mapping can be checked without a server.
trait Columns {
    fn id(&self, name: &str) -> Result<i64>;
    fn optional_id(&self, name: &str) -> Result<Option<i64>>;
}

impl Columns for Row {
    fn id(&self, name: &str) -> Result<i64> {
        Ok(self.try_get(name)?)
    }

    fn optional_id(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.try_get(name)?)
    }
}

// Unquoted identifiers fold to lower case in PostgreSQL.
fn assignment_from_row(row: &impl Columns) -> Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: row.id("id")?,
        linked_task_id: row.optional_id("task")?,
    })
}

fn task_from_row(row: &impl Columns) -> Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.id("id")?,
        root_task_id: TaskRecord::root_from_column(row.optional_id("maintask")?),
        parent_task_id: row.optional_id("parenttask")?,
        parent_assignment_id: row.optional_id("parentasg")?,
    })
}

impl WorkflowSource for PgSource<'_> {
    fn assignment(
        &mut self,
        id: i64,
        discriminator: Option<Uuid>,
    ) -> Result<Option<AssignmentRecord>> {
        self.query_one_row(
            ASSIGNMENT_BY_ID,
            ASSIGNMENT_BY_ID_AND_DISCRIMINATOR,
            id,
            discriminator,
        )?
        .as_ref()
        .map(assignment_from_row)
        .transpose()
    }

    fn task(&mut self, id: i64, discriminator: Option<Uuid>) -> Result<Option<TaskRecord>> {
        self.query_one_row(TASK_BY_ID, TASK_BY_ID_AND_DISCRIMINATOR, id, discriminator)?
            .as_ref()
            .map(|row| task_from_row(row))
            .transpose()
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
