//! Data models for taskroot.
//!
//! This module defines the core data structures:
//! - `EntityKind` / `EntityRef` - The traversal position (assignment or task plus id)
//! - `StartRef` - The reference a resolution starts from (id plus discriminator)
//! - `AssignmentRecord` / `TaskRecord` - Read-only rows fetched during traversal
//! - `ConnectionCredentials` - Tunnel and database connection parameters

pub mod credentials;

pub use credentials::ConnectionCredentials;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The two record kinds a traversal can stand on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Assignment,
    Task,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Assignment => "assignment",
            EntityKind::Task => "task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current position of a traversal: a record kind and its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn assignment(id: i64) -> Self {
        Self {
            kind: EntityKind::Assignment,
            id,
        }
    }

    pub fn task(id: i64) -> Self {
        Self {
            kind: EntityKind::Task,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A complete starting reference. Both parts are required; the resolver
/// never runs on a partial reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRef {
    pub id: i64,
    pub discriminator: Uuid,
}

impl StartRef {
    pub fn new(id: i64, discriminator: Uuid) -> Self {
        Self { id, discriminator }
    }
}

impl fmt::Display for StartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.discriminator)
    }
}

/// The part of an assignment row that matters for traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: i64,
    /// The task this assignment belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<i64>,
}

/// The part of a task row that matters for traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,

    /// Declared root task (`MainTask`). NULL and 0 both read as `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_task_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_assignment_id: Option<i64>,
}

impl TaskRecord {
    /// Normalize a raw `MainTask` column value.
    pub fn root_from_column(value: Option<i64>) -> Option<i64> {
        value.filter(|id| *id != 0)
    }

    /// A task is a root when its declared root points at itself.
    pub fn is_self_rooted(&self) -> bool {
        self.root_task_id == Some(self.id)
    }

    /// Next position upward. Parent task wins over parent assignment.
    pub fn parent(&self) -> Option<EntityRef> {
        self.parent_task_id
            .map(EntityRef::task)
            .or_else(|| self.parent_assignment_id.map(EntityRef::assignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: i64, root: Option<i64>, parent_task: Option<i64>, parent_asg: Option<i64>) -> TaskRecord {
        TaskRecord {
            id,
            root_task_id: root,
            parent_task_id: parent_task,
            parent_assignment_id: parent_asg,
        }
    }

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::task(42).to_string(), "task 42");
        assert_eq!(EntityRef::assignment(7).to_string(), "assignment 7");
    }

    #[test]
    fn test_entity_ref_serializes_kind_snake_case() {
        let json = serde_json::to_string(&EntityRef::assignment(5)).unwrap();
        assert_eq!(json, r#"{"kind":"assignment","id":5}"#);
    }

    #[test]
    fn test_root_from_column_treats_zero_as_absent() {
        assert_eq!(TaskRecord::root_from_column(Some(0)), None);
        assert_eq!(TaskRecord::root_from_column(None), None);
        assert_eq!(TaskRecord::root_from_column(Some(3003)), Some(3003));
    }

    #[test]
    fn test_is_self_rooted() {
        assert!(task(3003, Some(3003), None, None).is_self_rooted());
        assert!(!task(2002, Some(3003), Some(3003), None).is_self_rooted());
        assert!(!task(2002, None, None, None).is_self_rooted());
    }

    #[test]
    fn test_parent_prefers_task_over_assignment() {
        let t = task(10, None, Some(11), Some(12));
        assert_eq!(t.parent(), Some(EntityRef::task(11)));

        let t = task(10, None, None, Some(12));
        assert_eq!(t.parent(), Some(EntityRef::assignment(12)));

        let t = task(10, None, None, None);
        assert_eq!(t.parent(), None);
    }
}
