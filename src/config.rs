use std::{path::Path, str::FromStr};

use json::JsonValue;
use tracing::debug;

use crate::{
    error::{CemflowError, Result},
    workflow::emodul::WorkflowMode,
};

/// Where the pipeline runs. On CI there are no lab credentials, so the
/// openBIS upload is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunsOn {
    Actions,
    Local,
}

impl FromStr for RunsOn {
    type Err = CemflowError;

    fn from_str(s: &str) -> Result<RunsOn> {
        match s {
            "actions" => Ok(RunsOn::Actions),
            "local" => Ok(RunsOn::Local),
            other => Err(CemflowError::Input(format!(
                "runs_on must be 'actions' or 'local', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenbisConfig {
    pub datastore_url: String,
    pub space: String,
    pub project: String,
    pub collection: String,
    pub sample_type: String,
    pub sample_prefix: String,
    pub dataset_type: String,
    pub runs_on: RunsOn,
}

impl Default for OpenbisConfig {
    fn default() -> Self {
        OpenbisConfig {
            datastore_url: "https://test.datastore.bam.de/openbis/".to_owned(),
            space: "CKUJATH".to_owned(),
            project: "LEBEDIGITAL".to_owned(),
            collection: "LEBEDIGITAL_COLLECTION".to_owned(),
            sample_type: "EXPERIMENTAL_STEP_EMODUL".to_owned(),
            sample_prefix: "EMODUL".to_owned(),
            dataset_type: "RAW_DATA".to_owned(),
            runs_on: RunsOn::Actions,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub mode: WorkflowMode,
    /// Raw data directory processed in cheap mode
    pub cheap_example_name: String,
    /// Namespace IRI of the generated knowledge graph entities
    pub knowledge_graph_namespace: String,
    pub openbis: OpenbisConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mode: WorkflowMode::Cheap,
            cheap_example_name: "Wolf 8.2 Probe 1".to_owned(),
            knowledge_graph_namespace: "https://w3id.org/lebedigital/emodul/".to_owned(),
            openbis: OpenbisConfig::default(),
        }
    }
}

fn string_field(section: &JsonValue, key: &str, default: &str) -> Result<String> {
    if !section.has_key(key) {
        return Ok(default.to_owned());
    }
    section[key]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| CemflowError::Input(format!("Config field {key} must be a string")))
}

impl PipelineConfig {
    /// Loads a pipeline config. Missing fields keep their defaults.
    ///
    /// # Arguments
    /// * `config_file` - Path to the json config
    pub fn load(config_file: &Path) -> Result<PipelineConfig> {
        let file_string =
            std::fs::read_to_string(config_file).map_err(|err| CemflowError::io(config_file, err))?;
        let config = PipelineConfig::parse(&file_string)?;
        debug!("loaded pipeline config from {}", config_file.display());
        Ok(config)
    }

    pub fn parse(source: &str) -> Result<PipelineConfig> {
        let config_json = json::parse(source)
            .map_err(|err| CemflowError::Input(format!("Error in config json: {err}")))?;
        if !config_json.is_object() {
            return Err(CemflowError::Input(
                "Config json must be an object".to_owned(),
            ));
        }

        let defaults = PipelineConfig::default();
        let openbis_json = &config_json["openbis"];
        if !openbis_json.is_null() && !openbis_json.is_object() {
            return Err(CemflowError::Input(
                "Config field openbis must be an object".to_owned(),
            ));
        }
        let openbis_defaults = &defaults.openbis;

        let runs_on = if openbis_json.has_key("runs_on") {
            string_field(openbis_json, "runs_on", "")?.parse()?
        } else {
            openbis_defaults.runs_on
        };

        let openbis = OpenbisConfig {
            datastore_url: string_field(openbis_json, "datastore_url", &openbis_defaults.datastore_url)?,
            space: string_field(openbis_json, "space", &openbis_defaults.space)?,
            project: string_field(openbis_json, "project", &openbis_defaults.project)?,
            collection: string_field(openbis_json, "collection", &openbis_defaults.collection)?,
            sample_type: string_field(openbis_json, "sample_type", &openbis_defaults.sample_type)?,
            sample_prefix: string_field(openbis_json, "sample_prefix", &openbis_defaults.sample_prefix)?,
            dataset_type: string_field(openbis_json, "dataset_type", &openbis_defaults.dataset_type)?,
            runs_on,
        };

        let mode = if config_json.has_key("mode") {
            string_field(&config_json, "mode", "")?.parse()?
        } else {
            defaults.mode
        };

        Ok(PipelineConfig {
            mode,
            cheap_example_name: string_field(
                &config_json,
                "cheap_example_name",
                &defaults.cheap_example_name,
            )?,
            knowledge_graph_namespace: string_field(
                &config_json,
                "knowledge_graph_namespace",
                &defaults.knowledge_graph_namespace,
            )?,
            openbis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(PipelineConfig::parse("{}").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::parse(
            r#"{"mode": "full", "openbis": {"space": "LAB", "runs_on": "local"}}"#,
        )
        .unwrap();
        assert_eq!(config.mode, WorkflowMode::Full);
        assert_eq!(config.openbis.space, "LAB");
        assert_eq!(config.openbis.runs_on, RunsOn::Local);
        assert_eq!(config.openbis.project, "LEBEDIGITAL");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::parse(r#"{"mode": "fast"}"#).is_err());
        assert!(PipelineConfig::parse(r#"{"openbis": {"runs_on": "cloud"}}"#).is_err());
        assert!(PipelineConfig::parse(r#"{"cheap_example_name": 3}"#).is_err());
        assert!(PipelineConfig::parse("[]").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"cheap_example_name": "Probe 2"}"#).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap().cheap_example_name, "Probe 2");
        assert!(PipelineConfig::load(&dir.path().join("absent.json")).is_err());
    }
}
