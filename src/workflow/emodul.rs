//! Task definitions of the Young's modulus ("E-modul") pipeline.

use std::{
    fs,
    path::{Path, PathBuf},
    rc::Rc,
    str::FromStr,
};

use tracing::{info, warn};

use super::{
    actions::{self, UploadJob, RAW_DATA_FILE},
    Task,
};
use crate::{
    config::PipelineConfig,
    error::{CemflowError, Result},
    lab::openbis::Credentials,
};

pub const EXTRACT_METADATA: &str = "extract_metadata_emodul";
pub const EXTRACT_PROCESSED_DATA: &str = "extract_processed_data_emodul";
pub const EXPORT_KNOWLEDGE_GRAPH: &str = "export_knowledge_graph_emodul";
pub const UPLOAD_TO_OPENBIS: &str = "upload_to_openbis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    /// Only the configured example experiment
    Cheap,
    /// Every experiment in the raw data directory
    Full,
}

impl FromStr for WorkflowMode {
    type Err = CemflowError;

    fn from_str(s: &str) -> Result<WorkflowMode> {
        match s {
            "cheap" => Ok(WorkflowMode::Cheap),
            "full" => Ok(WorkflowMode::Full),
            other => Err(CemflowError::Input(format!(
                "mode must be 'cheap' or 'full', got '{other}'"
            ))),
        }
    }
}

/// Directory layout below the pipeline root
#[derive(Debug, Clone)]
pub struct EmodulPaths {
    pub raw_data: PathBuf,
    pub metadata: PathBuf,
    pub processed_data: PathBuf,
    pub knowledge_graphs: PathBuf,
    pub openbis_samples: PathBuf,
}

impl EmodulPaths {
    pub fn new(root: &Path) -> EmodulPaths {
        let output = root.join("emodul");
        EmodulPaths {
            raw_data: root.join("Data").join("E-modul"),
            metadata: output.join("metadata"),
            processed_data: output.join("processed_data"),
            knowledge_graphs: output.join("knowledge_graphs"),
            openbis_samples: output.join("openbis_samples"),
        }
    }

    pub fn raw_data_file(&self, experiment: &str) -> PathBuf {
        self.raw_data.join(experiment).join(RAW_DATA_FILE)
    }

    pub fn metadata_file(&self, experiment: &str) -> PathBuf {
        self.metadata.join(format!("{experiment}.json"))
    }

    pub fn processed_data_file(&self, experiment: &str) -> PathBuf {
        self.processed_data.join(format!("{experiment}.csv"))
    }

    pub fn knowledge_graph_file(&self, experiment: &str) -> PathBuf {
        self.knowledge_graphs.join(format!("{experiment}.ttl"))
    }

    pub fn sample_log_file(&self, experiment: &str) -> PathBuf {
        self.openbis_samples.join(format!("{experiment}.json"))
    }
}

/// Experiments to process, as raw data directory names
pub fn experiments(config: &PipelineConfig, paths: &EmodulPaths) -> Result<Vec<String>> {
    match config.mode {
        WorkflowMode::Cheap => {
            if paths.raw_data.join(&config.cheap_example_name).is_dir() {
                Ok(vec![config.cheap_example_name.clone()])
            } else {
                warn!(
                    "example {} not found in {}",
                    config.cheap_example_name,
                    paths.raw_data.display()
                );
                Ok(Vec::new())
            }
        }
        WorkflowMode::Full => {
            let entries = fs::read_dir(&paths.raw_data)
                .map_err(|err| CemflowError::io(&paths.raw_data, err))?;
            let mut experiments = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| CemflowError::io(&paths.raw_data, err))?;
                if entry.path().is_dir() {
                    experiments.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            experiments.sort();
            Ok(experiments)
        }
    }
}

/// Builds the four task groups for every experiment
///
/// # Arguments
/// * `config` - The pipeline config
/// * `root` - Directory holding `Data/E-modul`; outputs go to `emodul/`
/// * `credentials` - openBIS login, only needed for local uploads
pub fn tasks(config: &PipelineConfig, root: &Path, credentials: Option<Credentials>) -> Result<Vec<Task>> {
    let paths = EmodulPaths::new(root);
    let experiments = experiments(config, &paths)?;
    info!("defining tasks for {} experiments", experiments.len());

    let mut tasks = Vec::with_capacity(4 * experiments.len());

    for experiment in &experiments {
        let raw_dir = paths.raw_data.join(experiment);
        let target = paths.metadata_file(experiment);
        let output = target.clone();
        tasks.push(
            Task::new(EXTRACT_METADATA, experiment, move || {
                actions::extract_metadata(&raw_dir, &output)
            })
            .file_dep(paths.raw_data_file(experiment))
            .target(target),
        );
    }

    for experiment in &experiments {
        let raw_dir = paths.raw_data.join(experiment);
        let target = paths.processed_data_file(experiment);
        let output = target.clone();
        tasks.push(
            Task::new(EXTRACT_PROCESSED_DATA, experiment, move || {
                actions::extract_processed_data(&raw_dir, &output)
            })
            .file_dep(paths.raw_data_file(experiment))
            .target(target),
        );
    }

    let namespace: Rc<str> = config.knowledge_graph_namespace.as_str().into();
    for experiment in &experiments {
        let metadata_file = paths.metadata_file(experiment);
        let processed_data_file = paths.processed_data_file(experiment);
        let target = paths.knowledge_graph_file(experiment);
        let (metadata, processed, output, namespace) = (
            metadata_file.clone(),
            processed_data_file.clone(),
            target.clone(),
            namespace.clone(),
        );
        tasks.push(
            Task::new(EXPORT_KNOWLEDGE_GRAPH, experiment, move || {
                actions::generate_knowledge_graph(&metadata, &processed, &output, &namespace)
            })
            .file_dep(metadata_file)
            .file_dep(processed_data_file)
            .target(target)
            .after(EXTRACT_METADATA),
        );
    }

    let openbis = Rc::new(config.openbis.clone());
    let credentials = Rc::new(credentials);
    for experiment in &experiments {
        let job = UploadJob {
            metadata_file: paths.metadata_file(experiment),
            processed_data_file: paths.processed_data_file(experiment),
            raw_data_file: paths.raw_data_file(experiment),
            output: paths.sample_log_file(experiment),
        };
        let task = Task::new(UPLOAD_TO_OPENBIS, experiment, {
            let (job, openbis, credentials) = (job.clone(), openbis.clone(), credentials.clone());
            move || actions::upload_to_openbis(&job, &openbis, (*credentials).as_ref())
        });
        tasks.push(
            task.file_dep(job.metadata_file)
                .file_dep(job.processed_data_file)
                .target(job.output)
                .after(EXPORT_KNOWLEDGE_GRAPH),
        );
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Runner, TaskGraph};

    const RAW: &str = "Versuchsbezeichnung: probe\nDurchmesser: 98,6\n\nZeit\tKraft\n0\t1,5\n1\t2,5\n";

    fn write_experiment(root: &Path, name: &str) {
        let dir = EmodulPaths::new(root).raw_data.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RAW_DATA_FILE), RAW).unwrap();
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("cheap".parse::<WorkflowMode>().unwrap(), WorkflowMode::Cheap);
        assert_eq!("full".parse::<WorkflowMode>().unwrap(), WorkflowMode::Full);
        assert!("medium".parse::<WorkflowMode>().is_err());
    }

    #[test]
    fn test_cheap_mode_selects_example() {
        let root = tempfile::tempdir().unwrap();
        write_experiment(root.path(), "Wolf 8.2 Probe 1");
        write_experiment(root.path(), "Wolf 8.2 Probe 2");

        let config = PipelineConfig::default();
        let paths = EmodulPaths::new(root.path());
        assert_eq!(experiments(&config, &paths).unwrap(), vec!["Wolf 8.2 Probe 1"]);

        let full = PipelineConfig {
            mode: WorkflowMode::Full,
            ..PipelineConfig::default()
        };
        assert_eq!(
            experiments(&full, &paths).unwrap(),
            vec!["Wolf 8.2 Probe 1", "Wolf 8.2 Probe 2"]
        );
    }

    #[test]
    fn test_full_mode_requires_raw_directory() {
        let root = tempfile::tempdir().unwrap();
        let full = PipelineConfig {
            mode: WorkflowMode::Full,
            ..PipelineConfig::default()
        };
        assert!(experiments(&full, &EmodulPaths::new(root.path())).is_err());
    }

    #[test]
    fn test_pipeline_runs_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        write_experiment(root.path(), "Wolf 8.2 Probe 1");
        let config = PipelineConfig::default();

        let build = || {
            let tasks = tasks(&config, root.path(), None).unwrap();
            Runner::new(TaskGraph::new(tasks).unwrap())
        };

        let runner = build();
        let order: Vec<&str> = runner.graph().ordered().map(|t| t.group.as_str()).collect();
        let position = |group: &str| order.iter().position(|g| *g == group).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(EXTRACT_METADATA) < position(EXPORT_KNOWLEDGE_GRAPH));
        assert!(position(EXTRACT_PROCESSED_DATA) < position(EXPORT_KNOWLEDGE_GRAPH));
        assert_eq!(position(UPLOAD_TO_OPENBIS), 3);

        let report = runner.run().unwrap();
        assert_eq!(report.executed.len(), 4);

        let paths = EmodulPaths::new(root.path());
        let name = "Wolf 8.2 Probe 1";
        assert!(paths.metadata_file(name).is_file());
        assert!(paths.processed_data_file(name).is_file());
        assert!(paths.knowledge_graph_file(name).is_file());
        assert!(paths.sample_log_file(name).is_file());

        let report = build().run().unwrap();
        assert!(report.executed.is_empty());
        assert_eq!(report.up_to_date.len(), 4);

        assert_eq!(build().clean().unwrap().len(), 4);
        assert!(!paths.metadata_file(name).exists());
    }
}
