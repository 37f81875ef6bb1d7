use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
    Direction,
};
use tracing::warn;

use super::Task;
use crate::error::{CemflowError, Result};

/// Dependency graph over a list of tasks
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    /// node `i` is `tasks[i]`; edges point from a task to the tasks waiting on it
    graph: DiGraph<(), ()>,
    /// target path -> producing task index
    producers: HashMap<PathBuf, usize>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Derives the edges between `tasks` and their execution order
    ///
    /// A task runs after every task producing one of its file dependencies
    /// and after every task of the groups it lists in `task_dep`.
    pub fn new(tasks: Vec<Task>) -> Result<TaskGraph> {
        let mut names = HashSet::new();
        let mut producers: HashMap<PathBuf, usize> = HashMap::new();
        for (index, task) in tasks.iter().enumerate() {
            if !names.insert(task.name.as_str()) {
                return Err(CemflowError::Workflow(format!(
                    "Task '{}' is defined twice",
                    task.name
                )));
            }
            for target in &task.targets {
                if let Some(&other) = producers.get(target) {
                    return Err(CemflowError::Workflow(format!(
                        "Target {} is produced by both '{}' and '{}'",
                        target.display(),
                        tasks[other].name,
                        task.name
                    )));
                }
                producers.insert(target.clone(), index);
            }
        }

        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, task) in tasks.iter().enumerate() {
            groups.entry(task.group.as_str()).or_default().push(index);
        }

        let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(tasks.len(), tasks.len());
        for _ in &tasks {
            graph.add_node(());
        }

        for (index, task) in tasks.iter().enumerate() {
            for dep in &task.file_dep {
                if let Some(&producer) = producers.get(dep) {
                    if producer == index {
                        return Err(CemflowError::Workflow(format!(
                            "Task '{}' depends on its own target {}",
                            task.name,
                            dep.display()
                        )));
                    }
                    graph.update_edge(NodeIndex::new(producer), NodeIndex::new(index), ());
                }
            }
            for group in &task.task_dep {
                match groups.get(group.as_str()) {
                    Some(members) => {
                        for &member in members.iter().filter(|&&m| m != index) {
                            graph.update_edge(NodeIndex::new(member), NodeIndex::new(index), ());
                        }
                    }
                    None => warn!("task '{}' waits on unknown group '{group}'", task.name),
                }
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| {
                CemflowError::Workflow(format!(
                    "Task dependencies contain a cycle through '{}'",
                    tasks[cycle.node_id().index()].name
                ))
            })?
            .into_iter()
            .map(NodeIndex::index)
            .collect();

        Ok(TaskGraph {
            tasks,
            graph,
            producers,
            order,
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks in execution order
    pub fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|&i| &self.tasks[i])
    }

    /// Tasks without upstream dependencies, in definition order
    pub fn entry_points(&self) -> Vec<&Task> {
        let mut entries: Vec<usize> = self
            .graph
            .externals(Direction::Incoming)
            .map(NodeIndex::index)
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|i| &self.tasks[i]).collect()
    }

    pub fn downstream(&self, name: &str) -> Vec<&Task> {
        self.neighbors(name, Direction::Outgoing)
    }

    pub fn upstream(&self, name: &str) -> Vec<&Task> {
        self.neighbors(name, Direction::Incoming)
    }

    /// The task producing `path`, if any
    pub fn producer_of(&self, path: &Path) -> Option<&Task> {
        self.producers.get(path).map(|&i| &self.tasks[i])
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&Task> {
        let Some(index) = self.index_of(name) else {
            return Vec::new();
        };
        let mut neighbors: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), direction)
            .map(NodeIndex::index)
            .collect();
        neighbors.sort_unstable();
        neighbors.into_iter().map(|i| &self.tasks[i]).collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(group: &str, item: &str) -> Task {
        Task::new(group, item, || Ok(()))
    }

    fn names(graph: &TaskGraph) -> Vec<String> {
        graph.ordered().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn test_producer_runs_before_consumer() {
        let graph = TaskGraph::new(vec![
            task("report", "a").file_dep("data.csv").target("report.txt"),
            task("extract", "a").file_dep("raw.dat").target("data.csv"),
        ])
        .unwrap();

        assert_eq!(names(&graph), vec!["extract:a", "report:a"]);
        assert_eq!(graph.entry_points().len(), 1);
        assert_eq!(graph.upstream("report:a")[0].name, "extract:a");
        assert_eq!(graph.downstream("extract:a")[0].name, "report:a");
        assert_eq!(
            graph.producer_of(Path::new("data.csv")).map(|t| t.name.as_str()),
            Some("extract:a")
        );
    }

    fn position(graph: &TaskGraph, name: &str) -> usize {
        graph.ordered().position(|t| t.name == name).unwrap()
    }

    #[test]
    fn test_group_dependency_orders_whole_group() {
        let build = || {
            TaskGraph::new(vec![
                task("upload", "x").after("export"),
                task("export", "x"),
                task("export", "y"),
                task("other", "z"),
            ])
            .unwrap()
        };
        let graph = build();

        assert_eq!(names(&graph).len(), 4);
        assert!(position(&graph, "export:x") < position(&graph, "upload:x"));
        assert!(position(&graph, "export:y") < position(&graph, "upload:x"));
        let upstream: Vec<&str> = graph.upstream("upload:x").iter().map(|t| t.name.as_str()).collect();
        assert_eq!(upstream, vec!["export:x", "export:y"]);
        assert_eq!(names(&build()), names(&graph));
    }

    #[test]
    fn test_chain_is_ordered_regardless_of_definition() {
        let graph = TaskGraph::new(vec![
            task("c", "1").file_dep("b.txt").target("c.txt"),
            task("g", "free"),
            task("b", "1").file_dep("a.txt").target("b.txt"),
            task("a", "1").target("a.txt"),
        ])
        .unwrap();

        assert!(position(&graph, "a:1") < position(&graph, "b:1"));
        assert!(position(&graph, "b:1") < position(&graph, "c:1"));
        let entries: Vec<&str> = graph.entry_points().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(entries, vec!["g:free", "a:1"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let result = TaskGraph::new(vec![
            task("one", "a").file_dep("b.txt").target("a.txt"),
            task("two", "b").file_dep("a.txt").target("b.txt"),
        ]);
        match result {
            Err(CemflowError::Workflow(message)) => assert!(message.contains("cycle"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let result = TaskGraph::new(vec![task("one", "a").file_dep("a.txt").target("a.txt")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_name_and_target_rejected() {
        assert!(TaskGraph::new(vec![task("g", "a"), task("g", "a")]).is_err());
        assert!(TaskGraph::new(vec![
            task("g", "a").target("out.txt"),
            task("g", "b").target("out.txt"),
        ])
        .is_err());
    }
}
