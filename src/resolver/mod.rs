//! Root task resolution.
//!
//! Starting from an `(id, discriminator)` reference that may name either an
//! assignment or a task, walk parent pointers upward until reaching a task
//! whose `MainTask` is itself.
//!
//! The walk has two phases:
//! 1. An initial dispatch, filtered by discriminator: follow the assignment's
//!    task link if the id names a linked assignment, otherwise read the task
//!    row and move to its parent (parent task wins over parent assignment).
//! 2. A loop of at most [`MAX_ITERATIONS`] steps, by id alone. Tasks either
//!    terminate as root or move to a parent; assignments move to their task.
//!
//! Every step is reported through a [`ResolveEvent`] observer. The walk is
//! read-only; it never writes to the source.

use crate::Result;
use crate::models::{EntityKind, EntityRef, StartRef};
use crate::source::WorkflowSource;
use serde::Serialize;
use std::fmt;

/// Upper bound on loop iterations before the graph is assumed cyclic.
pub const MAX_ITERATIONS: u32 = 100;

/// Terminal resolution failures. None of these are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// The starting reference has no task link and no parent pointers.
    #[error("No parent: {id} is not a linked assignment and has no parent task or assignment")]
    NoParent { id: i64 },

    /// A record reached by the walk has no pointer to follow.
    #[error("Broken link at {at}: no parent task, parent assignment or task link")]
    BrokenLink { at: EntityRef },

    /// A task id reached by the walk does not exist.
    #[error("Missing record: {at} does not exist")]
    MissingRecord { at: EntityRef },

    #[error("Cycle suspected: no root within {steps} steps (stopped at {at})")]
    CycleSuspected { steps: u32, at: EntityRef },
}

impl ResolutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::NoParent { .. } => "no_parent",
            ResolutionError::BrokenLink { .. } => "broken_link",
            ResolutionError::MissingRecord { .. } => "missing_record",
            ResolutionError::CycleSuspected { .. } => "cycle_suspected",
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub root_task_id: i64,
    /// Loop iterations used; the initial dispatch is not counted.
    pub steps: u32,
    /// Every position visited, starting at the reference.
    pub path: Vec<EntityRef>,
}

/// Progress notifications emitted while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResolveEvent {
    Started { start: StartRef },
    AssignmentLinked { assignment_id: i64, task_id: i64 },
    FellBackToTask { task_id: i64 },
    Visiting { iteration: u32, at: EntityRef },
    Moved { from: EntityRef, to: EntityRef },
    RootFound { root_task_id: i64, steps: u32 },
    Failed { error: ResolutionError },
}

impl fmt::Display for ResolveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveEvent::Started { start } => write!(f, "Resolving {}", start),
            ResolveEvent::AssignmentLinked {
                assignment_id,
                task_id,
            } => write!(f, "Assignment {} links to task {}", assignment_id, task_id),
            ResolveEvent::FellBackToTask { task_id } => write!(
                f,
                "No linked assignment {}, reading it as a task",
                task_id
            ),
            ResolveEvent::Visiting { iteration, at } => {
                write!(f, "[{}] Visiting {}", iteration, at)
            }
            ResolveEvent::Moved { from, to } => write!(f, "  {} -> {}", from, to),
            ResolveEvent::RootFound {
                root_task_id,
                steps,
            } => write!(f, "Root task found: {} ({} steps)", root_task_id, steps),
            ResolveEvent::Failed { error } => write!(f, "Failed: {}", error),
        }
    }
}

enum Next {
    Move(EntityRef),
    Root(i64),
    Fail(ResolutionError),
}

/// Walks a [`WorkflowSource`] from a starting reference to its root task.
pub struct RootTaskResolver<S> {
    source: S,
    max_iterations: u32,
}

impl<S: WorkflowSource> RootTaskResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Resolve without observing progress.
    pub fn resolve(&mut self, start: StartRef) -> Result<Resolution> {
        self.resolve_with(start, &mut |_| {})
    }

    /// Resolve, reporting each step to `observer`.
    ///
    /// # Errors
    /// - `Error::Unresolved` with one of the four [`ResolutionError`]s
    /// - `Error::Database` / `Error::Snapshot` when a lookup itself fails
    pub fn resolve_with(
        &mut self,
        start: StartRef,
        observer: &mut dyn FnMut(&ResolveEvent),
    ) -> Result<Resolution> {
        tracing::debug!(%start, source = %self.source.location(), "resolving root task");
        observer(&ResolveEvent::Started { start });

        let mut path = Vec::new();
        let mut current = match self.dispatch(start, &mut path, observer)? {
            Ok(next) => next,
            Err(error) => return fail(error, observer),
        };

        for iteration in 1..=self.max_iterations {
            path.push(current);
            tracing::debug!(iteration, at = %current, "visiting");
            observer(&ResolveEvent::Visiting {
                iteration,
                at: current,
            });

            let next = match current.kind {
                EntityKind::Task => self.visit_task(current.id)?,
                EntityKind::Assignment => self.visit_assignment(current.id)?,
            };
            match next {
                Next::Root(root_task_id) => {
                    tracing::debug!(root_task_id, steps = iteration, "root task found");
                    observer(&ResolveEvent::RootFound {
                        root_task_id,
                        steps: iteration,
                    });
                    return Ok(Resolution {
                        root_task_id,
                        steps: iteration,
                        path,
                    });
                }
                Next::Move(to) => {
                    observer(&ResolveEvent::Moved { from: current, to });
                    current = to;
                }
                Next::Fail(error) => return fail(error, observer),
            }
        }

        fail(
            ResolutionError::CycleSuspected {
                steps: self.max_iterations,
                at: current,
            },
            observer,
        )
    }

    /// Initial dispatch: the only lookups filtered by discriminator.
    fn dispatch(
        &mut self,
        start: StartRef,
        path: &mut Vec<EntityRef>,
        observer: &mut dyn FnMut(&ResolveEvent),
    ) -> Result<std::result::Result<EntityRef, ResolutionError>> {
        let linked = self
            .source
            .assignment(start.id, Some(start.discriminator))?
            .and_then(|a| a.linked_task_id);
        if let Some(task_id) = linked {
            let from = EntityRef::assignment(start.id);
            let to = EntityRef::task(task_id);
            path.push(from);
            tracing::debug!(assignment = start.id, task = task_id, "assignment linked");
            observer(&ResolveEvent::AssignmentLinked {
                assignment_id: start.id,
                task_id,
            });
            observer(&ResolveEvent::Moved { from, to });
            return Ok(Ok(to));
        }

        tracing::debug!(id = start.id, "no linked assignment, reading task");
        observer(&ResolveEvent::FellBackToTask { task_id: start.id });
        let parent = self
            .source
            .task(start.id, Some(start.discriminator))?
            .and_then(|t| t.parent());
        match parent {
            Some(to) => {
                let from = EntityRef::task(start.id);
                path.push(from);
                observer(&ResolveEvent::Moved { from, to });
                Ok(Ok(to))
            }
            None => Ok(Err(ResolutionError::NoParent { id: start.id })),
        }
    }

    fn visit_task(&mut self, id: i64) -> Result<Next> {
        let at = EntityRef::task(id);
        let Some(task) = self.source.task(id, None)? else {
            return Ok(Next::Fail(ResolutionError::MissingRecord { at }));
        };
        if task.is_self_rooted() {
            return Ok(Next::Root(id));
        }
        Ok(match task.parent() {
            Some(parent) => Next::Move(parent),
            None => Next::Fail(ResolutionError::BrokenLink { at }),
        })
    }

    fn visit_assignment(&mut self, id: i64) -> Result<Next> {
        let linked = self
            .source
            .assignment(id, None)?
            .and_then(|a| a.linked_task_id);
        Ok(match linked {
            Some(task_id) => Next::Move(EntityRef::task(task_id)),
            None => Next::Fail(ResolutionError::BrokenLink {
                at: EntityRef::assignment(id),
            }),
        })
    }
}

fn fail<T>(error: ResolutionError, observer: &mut dyn FnMut(&ResolveEvent)) -> Result<T> {
    tracing::debug!(error = %error, "resolution failed");
    observer(&ResolveEvent::Failed {
        error: error.clone(),
    });
    Err(error.into())
}
