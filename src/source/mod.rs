//! Read-only access to the workflow tables.
//!
//! The resolver only ever needs two lookups, one per record kind. They are
//! expressed as the [`WorkflowSource`] trait so the same traversal runs
//! against a live PostgreSQL session or a local SQLite snapshot.
//!
//! Schema contract (queried, never owned or modified):
//! - `sungero_wf_assignment`: `Id`, `Discriminator`, `task`
//! - `sungero_wf_task`: `Id`, `Discriminator`, `MainTask`, `ParentTask`, `ParentAsg`

pub mod postgres;
pub mod snapshot;

pub use self::postgres::PgSource;
pub use snapshot::SnapshotSource;

use crate::Result;
use crate::models::{AssignmentRecord, TaskRecord};
use uuid::Uuid;

pub const ASSIGNMENT_TABLE: &str = "sungero_wf_assignment";
pub const TASK_TABLE: &str = "sungero_wf_task";

/// Kind-specific fetch functions over the two workflow tables.
///
/// `discriminator` narrows the lookup to one record subtype. The resolver
/// passes it only for its initial dispatch; later lookups are by id alone.
/// Both methods return `Ok(None)` when no row matches.
pub trait WorkflowSource {
    fn assignment(
        &mut self,
        id: i64,
        discriminator: Option<Uuid>,
    ) -> Result<Option<AssignmentRecord>>;

    fn task(&mut self, id: i64, discriminator: Option<Uuid>) -> Result<Option<TaskRecord>>;

    /// Human-readable location, for logs and output.
    fn location(&self) -> String;
}

impl<S: WorkflowSource + ?Sized> WorkflowSource for &mut S {
    fn assignment(
        &mut self,
        id: i64,
        discriminator: Option<Uuid>,
    ) -> Result<Option<AssignmentRecord>> {
        (**self).assignment(id, discriminator)
    }

    fn task(&mut self, id: i64, discriminator: Option<Uuid>) -> Result<Option<TaskRecord>> {
        (**self).task(id, discriminator)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
