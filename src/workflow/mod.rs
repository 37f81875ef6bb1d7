//! File based task pipeline.
//!
//! Tasks declare the files they read and the files they produce. The graph
//! orders producers before consumers and the runner skips any task whose
//! targets are newer than its inputs.

pub mod actions;
pub mod emodul;
mod graph;
mod runner;

use std::{fmt, path::PathBuf};

pub use graph::TaskGraph;
pub use runner::{RunReport, Runner};

use crate::error::Result;

pub type Action = Box<dyn Fn() -> Result<()>>;

pub struct Task {
    /// Unique name, `<group>:<item>` for generated tasks
    pub name: String,
    pub group: String,
    pub file_dep: Vec<PathBuf>,
    pub targets: Vec<PathBuf>,
    /// Groups that must finish before this task runs
    pub task_dep: Vec<String>,
    action: Action,
}

impl Task {
    pub fn new(
        group: impl Into<String>,
        item: impl fmt::Display,
        action: impl Fn() -> Result<()> + 'static,
    ) -> Task {
        let group = group.into();
        Task {
            name: format!("{group}:{item}"),
            group,
            file_dep: Vec::new(),
            targets: Vec::new(),
            task_dep: Vec::new(),
            action: Box::new(action),
        }
    }

    pub fn file_dep(mut self, path: impl Into<PathBuf>) -> Task {
        self.file_dep.push(path.into());
        self
    }

    pub fn target(mut self, path: impl Into<PathBuf>) -> Task {
        self.targets.push(path.into());
        self
    }

    pub fn after(mut self, group: impl Into<String>) -> Task {
        self.task_dep.push(group.into());
        self
    }

    pub fn execute(&self) -> Result<()> {
        (self.action)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("file_dep", &self.file_dep)
            .field("targets", &self.targets)
            .field("task_dep", &self.task_dep)
            .finish_non_exhaustive()
    }
}
