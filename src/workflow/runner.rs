use std::{fs, path::Path, time::SystemTime};

use tracing::{debug, info};

use super::{Task, TaskGraph};
use crate::error::{CemflowError, Result};

/// Names of the tasks a run executed and skipped, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<String>,
    pub up_to_date: Vec<String>,
}

pub struct Runner {
    graph: TaskGraph,
}

impl Runner {
    pub fn new(graph: TaskGraph) -> Runner {
        Runner { graph }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Runs every out of date task in dependency order
    ///
    /// A task is up to date when it has targets, all of them exist and none
    /// is older than any of its file dependencies.
    pub fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        for task in self.graph.ordered() {
            let newest_dep = self.newest_dependency(task)?;

            if is_up_to_date(task, newest_dep)? {
                info!("-- {}", task.name);
                report.up_to_date.push(task.name.clone());
                continue;
            }

            info!(".  {}", task.name);
            task.execute().map_err(|err| {
                CemflowError::Workflow(format!("Task '{}' failed: {err}", task.name))
            })?;

            if let Some(missing) = task.targets.iter().find(|t| !t.exists()) {
                return Err(CemflowError::Workflow(format!(
                    "Task '{}' did not create its target {}",
                    task.name,
                    missing.display()
                )));
            }
            report.executed.push(task.name.clone());
        }

        Ok(report)
    }

    /// Removes the targets of every task
    ///
    /// # Returns
    /// The paths that were removed
    pub fn clean(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for task in self.graph.tasks() {
            for target in task.targets.iter().filter(|t| t.is_file()) {
                fs::remove_file(target).map_err(|err| CemflowError::io(target, err))?;
                debug!("removed {}", target.display());
                removed.push(target.display().to_string());
            }
        }
        info!("removed {} targets", removed.len());
        Ok(removed)
    }

    fn newest_dependency(&self, task: &Task) -> Result<Option<SystemTime>> {
        let mut newest = None;
        for dep in &task.file_dep {
            if !dep.exists() {
                let reason = match self.graph.producer_of(dep) {
                    Some(producer) => format!("it was not created by '{}'", producer.name),
                    None => "no task produces it".to_owned(),
                };
                return Err(CemflowError::Workflow(format!(
                    "Dependency {} of task '{}' is missing: {reason}",
                    dep.display(),
                    task.name
                )));
            }
            let modified = modified(dep)?;
            newest = newest.max(Some(modified));
        }
        Ok(newest)
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|err| CemflowError::io(path, err))
}

fn is_up_to_date(task: &Task, newest_dep: Option<SystemTime>) -> Result<bool> {
    if task.targets.is_empty() {
        return Ok(false);
    }
    for target in &task.targets {
        if !target.exists() {
            return Ok(false);
        }
        if let Some(newest_dep) = newest_dep {
            if modified(target)? < newest_dep {
                return Ok(false);
            }
        }
    }
    Ok(true)
}
