//! Common test utilities for taskroot integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch
//! the user's `~/.local/share/taskroot/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// Discriminator used by every fixture row.
pub const DISCRIMINATOR: &str = "4e585572-f5a6-4c0d-9c0b-6f6f8d8e6a11";

/// A test environment with isolated data storage.
///
/// The `taskroot()` method returns a `Command` that sets `TASKROOT_DATA_DIR`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the taskroot binary with an isolated data directory.
    pub fn taskroot(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskroot"));
        cmd.env("TASKROOT_DATA_DIR", self.data_dir.path());
        cmd.env_remove("TASKROOT_SNAPSHOT");
        cmd.env_remove("TASKROOT_LOG");
        for var in [
            "TASKROOT_SSH_HOST",
            "TASKROOT_SSH_PORT",
            "TASKROOT_SSH_USER",
            "TASKROOT_SSH_PASSWORD",
            "TASKROOT_DB_HOST",
            "TASKROOT_DB_PORT",
            "TASKROOT_DB_NAME",
            "TASKROOT_DB_USER",
            "TASKROOT_DB_PASSWORD",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Write a snapshot with the chain assignment 1001 -> task 2002 -> task 3003
    /// plus a few dead ends:
    /// - task 5000: no parent, not self-rooted
    /// - task 6000: parent task 6001 which does not exist
    /// - tasks 7000/7001: parents of each other
    pub fn snapshot(&self) -> PathBuf {
        let path = self.data_path().join("workflow.sqlite");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE sungero_wf_assignment (
                 id INTEGER PRIMARY KEY,
                 discriminator TEXT NOT NULL,
                 task INTEGER
             );
             CREATE TABLE sungero_wf_task (
                 id INTEGER PRIMARY KEY,
                 discriminator TEXT NOT NULL,
                 maintask INTEGER,
                 parenttask INTEGER,
                 parentasg INTEGER
             );
             INSERT INTO sungero_wf_assignment VALUES (1001, '{d}', 2002);
             INSERT INTO sungero_wf_task VALUES (2002, '{d}', 3003, 3003, NULL);
             INSERT INTO sungero_wf_task VALUES (3003, '{d}', 3003, NULL, NULL);
             INSERT INTO sungero_wf_task VALUES (5000, '{d}', 0, NULL, NULL);
             INSERT INTO sungero_wf_task VALUES (6000, '{d}', NULL, 6001, NULL);
             INSERT INTO sungero_wf_task VALUES (7000, '{d}', NULL, 7001, NULL);
             INSERT INTO sungero_wf_task VALUES (7001, '{d}', NULL, 7000, NULL);",
            d = DISCRIMINATOR
        ))
        .unwrap();
        path
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A card link for `id` with the fixture discriminator.
pub fn card_link(id: i64) -> String {
    format!("https://rx.example.com/Client/#/card/{}/{}", DISCRIMINATOR, id)
}
