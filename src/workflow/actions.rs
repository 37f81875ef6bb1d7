//! Actions of the Young's modulus pipeline.
//!
//! A raw `specimen.dat` starts with a metadata block of `key: value` or
//! `key<TAB>value` lines. The block ends at the first blank line or the
//! first line that is not a pair. The data block follows: its first
//! non-numeric row names the columns, further non-numeric rows (units) are
//! skipped and numeric rows are measurements. Numbers may use decimal
//! commas. Columns are separated by tabs, semicolons or whitespace.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use json::JsonValue;
use tracing::{debug, info, warn};

use crate::{
    config::{OpenbisConfig, RunsOn},
    error::{CemflowError, Result},
    lab::openbis::{sample_identifier, Credentials, OpenbisClient, SampleSpec},
};

pub const RAW_DATA_FILE: &str = "specimen.dat";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSpecimen {
    /// Snake case keys in file order
    pub metadata: Vec<(String, String)>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Lowercases `key` and joins its alphanumeric runs with underscores
pub fn snake_case(key: &str) -> String {
    key.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<String>>()
        .join("_")
}

/// Parses a number that may use a decimal comma
pub fn parse_number(token: &str) -> Option<f64> {
    token.trim().replace(',', ".").parse().ok()
}

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':').or_else(|| {
        let mut fields = line.split('\t');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(key), Some(value), None) => Some((key, value)),
            _ => None,
        }
    })?;
    let key = key.trim();
    if key.is_empty() || parse_number(key).is_some() {
        return None;
    }
    Some((key, value.trim()))
}

fn split_fields(line: &str) -> Vec<&str> {
    let fields: Vec<&str> = if line.contains('\t') {
        line.split('\t').collect()
    } else if line.contains(';') {
        line.split(';').collect()
    } else {
        line.split_whitespace().collect()
    };
    fields
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect()
}

impl RawSpecimen {
    pub fn parse(source: &str) -> Result<RawSpecimen> {
        let mut specimen = RawSpecimen::default();
        let mut lines = source.lines().enumerate().peekable();

        while let Some(&(_, line)) = lines.peek() {
            if line.trim().is_empty() {
                lines.next();
                break;
            }
            let Some((key, value)) = split_pair(line) else {
                break;
            };
            specimen.metadata.push((snake_case(key), value.to_owned()));
            lines.next();
        }

        for (line_number, line) in lines {
            let fields = split_fields(line);
            if fields.is_empty() {
                continue;
            }
            let numbers: Option<Vec<f64>> = fields.iter().map(|f| parse_number(f)).collect();
            match numbers {
                Some(row) => {
                    if row.len() != specimen.columns.len() {
                        return Err(CemflowError::Input(format!(
                            "Line {} has {} values but {} columns are defined",
                            line_number + 1,
                            row.len(),
                            specimen.columns.len()
                        )));
                    }
                    specimen.rows.push(row);
                }
                None if specimen.columns.is_empty() => {
                    specimen.columns = fields.iter().map(|f| f.to_string()).collect();
                }
                None if specimen.rows.is_empty() => {
                    debug!("skipping header line {}: {line}", line_number + 1);
                }
                None => {
                    return Err(CemflowError::Input(format!(
                        "Line {} is not numeric: {line}",
                        line_number + 1
                    )));
                }
            }
        }

        if specimen.columns.is_empty() {
            return Err(CemflowError::Input(
                "Raw data has no column header".to_owned(),
            ));
        }
        Ok(specimen)
    }

    pub fn load(raw_data_dir: &Path) -> Result<RawSpecimen> {
        let raw_file = raw_data_dir.join(RAW_DATA_FILE);
        let source = fs::read(&raw_file).map_err(|err| CemflowError::io(&raw_file, err))?;
        RawSpecimen::parse(&String::from_utf8_lossy(&source)).map_err(|err| {
            CemflowError::Input(format!("{}: {err}", raw_file.display()))
        })
    }
}

fn experiment_name(raw_data_dir: &Path) -> Result<String> {
    raw_data_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            CemflowError::Input(format!("{} has no directory name", raw_data_dir.display()))
        })
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|err| CemflowError::io(parent, err))
        }
        _ => Ok(()),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    create_parent(path)?;
    fs::write(path, contents).map_err(|err| CemflowError::io(path, err))
}

fn metadata_value(value: &str) -> JsonValue {
    match parse_number(value) {
        Some(number) => number.into(),
        None => value.into(),
    }
}

/// Extracts the metadata of a raw specimen directory into a json file
///
/// # Arguments
/// * `raw_data_dir` - Directory holding `specimen.dat`, named after the experiment
/// * `output` - Path of the metadata json
pub fn extract_metadata(raw_data_dir: &Path, output: &Path) -> Result<()> {
    let specimen = RawSpecimen::load(raw_data_dir)?;

    let mut metadata = JsonValue::new_object();
    metadata["experiment_name"] = experiment_name(raw_data_dir)?.into();
    metadata["data_file"] = raw_data_dir.join(RAW_DATA_FILE).display().to_string().into();
    for (key, value) in &specimen.metadata {
        metadata[key.as_str()] = metadata_value(value);
    }

    write_file(output, &metadata.pretty(4))?;
    info!("wrote {} metadata entries to {}", specimen.metadata.len(), output.display());
    Ok(())
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Converts the measurements of a raw specimen directory into a csv file
pub fn extract_processed_data(raw_data_dir: &Path, output: &Path) -> Result<()> {
    let specimen = RawSpecimen::load(raw_data_dir)?;

    let mut csv = specimen
        .columns
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<String>>()
        .join(",");
    csv.push('\n');
    for row in &specimen.rows {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>()
            .join(",");
        csv.push_str(&line);
        csv.push('\n');
    }

    write_file(output, &csv)?;
    info!("wrote {} rows to {}", specimen.rows.len(), output.display());
    Ok(())
}

fn load_metadata(metadata_file: &Path) -> Result<JsonValue> {
    let source =
        fs::read_to_string(metadata_file).map_err(|err| CemflowError::io(metadata_file, err))?;
    let metadata = json::parse(&source).map_err(|err| {
        CemflowError::Input(format!("Error in metadata json {}: {err}", metadata_file.display()))
    })?;
    if !metadata.has_key("experiment_name") {
        return Err(CemflowError::Input(format!(
            "{} is missing experiment_name",
            metadata_file.display()
        )));
    }
    Ok(metadata)
}

/// Local name usable in a Turtle prefixed name
fn local_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn turtle_literal(value: &JsonValue) -> String {
    match value.as_f64() {
        Some(number) if value.is_number() => format!("\"{number}\"^^xsd:double"),
        _ => {
            let text = value.as_str().map(str::to_owned).unwrap_or_else(|| value.dump());
            format!(
                "\"{}\"",
                text.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
            )
        }
    }
}

/// Maps a metadata json file to a Turtle knowledge graph
///
/// # Arguments
/// * `metadata_file` - Metadata json written by [`extract_metadata`]
/// * `processed_data_file` - Processed csv of the same experiment
/// * `output` - Path of the Turtle file
/// * `namespace` - Namespace IRI of the specimen and its properties
pub fn generate_knowledge_graph(
    metadata_file: &Path,
    processed_data_file: &Path,
    output: &Path,
    namespace: &str,
) -> Result<()> {
    let metadata = load_metadata(metadata_file)?;
    let name = metadata["experiment_name"]
        .as_str()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            CemflowError::Upload(format!(
                "{} has no experiment_name",
                metadata_file.display()
            ))
        })?;

    let mut statements = vec![
        "a co:Specimen".to_owned(),
        format!("co:hasIdentifier {}", turtle_literal(&metadata["experiment_name"])),
    ];
    if let Some(file_name) = processed_data_file.file_name() {
        statements.push(format!(
            "ns:processed_data {}",
            turtle_literal(&JsonValue::from(file_name.to_string_lossy().into_owned()))
        ));
    }
    for (key, value) in metadata.entries() {
        if key == "experiment_name" {
            continue;
        }
        statements.push(format!("ns:{} {}", local_name(key), turtle_literal(value)));
    }

    let turtle = format!(
        "@prefix co: <https://w3id.org/pmd/co/> .\n\
         @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\
         @prefix ns: <{namespace}> .\n\n\
         ns:{subject} {body} .\n",
        subject = local_name(name),
        body = statements.join(" ;\n    "),
    );

    write_file(output, &turtle)?;
    info!("wrote knowledge graph {}", output.display());
    Ok(())
}

/// Everything the openBIS upload of one experiment needs
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub metadata_file: PathBuf,
    pub processed_data_file: PathBuf,
    pub raw_data_file: PathBuf,
    /// Sample log written after the upload
    pub output: PathBuf,
}

/// openBIS code of an experiment, e.g. `EMODUL_WOLF_8_2_PROBE_1`
pub fn sample_code(prefix: &str, experiment_name: &str) -> String {
    format!("{prefix}_{}", local_name(experiment_name)).to_uppercase()
}

fn sample_properties(prefix: &str, metadata: &JsonValue) -> BTreeMap<String, String> {
    metadata
        .entries()
        .map(|(key, value)| {
            let text = value.as_str().map(str::to_owned).unwrap_or_else(|| value.dump());
            (format!("{prefix}.{key}").to_uppercase(), text)
        })
        .collect()
}

/// Registers an experiment as an openBIS sample with its files attached
///
/// With [`RunsOn::Actions`] no connection is made and the log records that
/// the upload was skipped.
pub fn upload_to_openbis(job: &UploadJob, config: &OpenbisConfig, credentials: Option<&Credentials>) -> Result<()> {
    let metadata = load_metadata(&job.metadata_file)?;
    let name = metadata["experiment_name"]
        .as_str()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            CemflowError::Upload(format!(
                "{} has no experiment_name",
                job.metadata_file.display()
            ))
        })?;
    let code = sample_code(&config.sample_prefix, name);
    let identifier = sample_identifier(&config.space, &config.project, &code);

    let mut log = JsonValue::new_object();
    log["experiment_name"] = name.into();
    log["sample_identifier"] = identifier.as_str().into();

    if config.runs_on == RunsOn::Actions {
        info!("skipping openBIS upload of {name}");
        log["status"] = "skipped".into();
        write_file(&job.output, &log.pretty(4))?;
        return Ok(());
    }

    let credentials = credentials.ok_or_else(|| {
        CemflowError::Upload("openBIS credentials are required for a local upload".to_owned())
    })?;
    let mut client = OpenbisClient::new(&config.datastore_url)?;
    client.login(credentials)?;

    let result = (|| -> Result<()> {
        if client.exists_in_datastore(&identifier)? {
            info!("{identifier} already exists in openBIS");
            log["status"] = "exists".into();
            return Ok(());
        }

        let spec = SampleSpec {
            sample_type: config.sample_type.clone(),
            space: config.space.clone(),
            project: config.project.clone(),
            collection: config.collection.clone(),
            code: code.clone(),
            properties: sample_properties(&config.sample_prefix, &metadata),
        };
        let perm_id = client.create_sample(&spec)?;
        let dataset = client.upload_dataset(
            &identifier,
            &config.dataset_type,
            &code,
            &[
                job.raw_data_file.as_path(),
                job.metadata_file.as_path(),
                job.processed_data_file.as_path(),
            ],
        )?;

        log["status"] = "uploaded".into();
        log["perm_id"] = perm_id.into();
        log["dataset"] = dataset.into();
        Ok(())
    })();

    let logout = client.logout();
    end_session(result, logout)?;

    write_file(&job.output, &log.pretty(4))
}

/// Combines the upload outcome with the logout outcome, keeping the upload error
fn end_session(result: Result<()>, logout: Result<()>) -> Result<()> {
    match (result, logout) {
        (Err(err), Err(logout_err)) => {
            warn!("openBIS logout failed: {logout_err}");
            Err(err)
        }
        (result, logout) => result.and(logout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Versuchsbezeichnung: Wolf 8.2 Probe 1\n\
                       Durchmesser (mm):\t98,6\n\
                       Bemerkung: keine\n\
                       \n\
                       Zeit\tKraft\tWeg\n\
                       [s]\t[kN]\t[mm]\n\
                       0,0\t1,5\t0,001\n\
                       0,5\t2,25\t0,002\n";

    fn raw_dir(root: &Path) -> PathBuf {
        let dir = root.join("Wolf 8.2 Probe 1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RAW_DATA_FILE), RAW).unwrap();
        dir
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Durchmesser (mm)"), "durchmesser_mm");
        assert_eq!(snake_case("  Max. Kraft-Wert "), "max_kraft_wert");
    }

    #[test]
    fn test_parse_raw_specimen() {
        let specimen = RawSpecimen::parse(RAW).unwrap();
        assert_eq!(specimen.metadata.len(), 3);
        assert_eq!(specimen.metadata[1], ("durchmesser_mm".to_owned(), "98,6".to_owned()));
        assert_eq!(specimen.columns, vec!["Zeit", "Kraft", "Weg"]);
        assert_eq!(specimen.rows, vec![vec![0.0, 1.5, 0.001], vec![0.5, 2.25, 0.002]]);
    }

    #[test]
    fn test_parse_semicolon_and_ragged_rows() {
        let specimen = RawSpecimen::parse("a;b\n1,5;2\n3;4,25\n").unwrap();
        assert!(specimen.metadata.is_empty());
        assert_eq!(specimen.rows[1], vec![3.0, 4.25]);

        assert!(RawSpecimen::parse("a;b\n1;2;3\n").is_err());
        assert!(RawSpecimen::parse("key: value\n").is_err());
    }

    #[test]
    fn test_extract_metadata() {
        let root = tempfile::tempdir().unwrap();
        let dir = raw_dir(root.path());
        let output = root.path().join("metadata").join("Wolf 8.2 Probe 1.json");
        extract_metadata(&dir, &output).unwrap();

        let metadata = json::parse(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(metadata["experiment_name"], "Wolf 8.2 Probe 1");
        assert_eq!(metadata["durchmesser_mm"], 98.6);
        assert_eq!(metadata["bemerkung"], "keine");
        assert!(metadata["data_file"].as_str().unwrap().ends_with(RAW_DATA_FILE));
    }

    #[test]
    fn test_extract_processed_data() {
        let root = tempfile::tempdir().unwrap();
        let dir = raw_dir(root.path());
        let output = root.path().join("processed.csv");
        extract_processed_data(&dir, &output).unwrap();

        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "Zeit,Kraft,Weg\n0,1.5,0.001\n0.5,2.25,0.002\n"
        );
    }

    #[test]
    fn test_generate_knowledge_graph() {
        let root = tempfile::tempdir().unwrap();
        let dir = raw_dir(root.path());
        let metadata = root.path().join("meta.json");
        let output = root.path().join("kg.ttl");
        extract_metadata(&dir, &metadata).unwrap();
        generate_knowledge_graph(&metadata, Path::new("Wolf 8.2 Probe 1.csv"), &output, "https://example.org/emodul/")
            .unwrap();

        let turtle = fs::read_to_string(&output).unwrap();
        assert!(turtle.starts_with("@prefix co: <https://w3id.org/pmd/co/> ."));
        assert!(turtle.contains("@prefix ns: <https://example.org/emodul/> ."));
        assert!(turtle.contains("ns:Wolf_8_2_Probe_1 a co:Specimen"));
        assert!(turtle.contains("ns:durchmesser_mm \"98.6\"^^xsd:double"));
        assert!(turtle.contains("ns:bemerkung \"keine\""));
        assert!(turtle.trim_end().ends_with('.'));
    }

    #[test]
    fn test_upload_skipped_on_actions() {
        let root = tempfile::tempdir().unwrap();
        let dir = raw_dir(root.path());
        let metadata_file = root.path().join("meta.json");
        extract_metadata(&dir, &metadata_file).unwrap();

        let job = UploadJob {
            metadata_file,
            processed_data_file: root.path().join("data.csv"),
            raw_data_file: dir.join(RAW_DATA_FILE),
            output: root.path().join("samples").join("log.json"),
        };
        upload_to_openbis(&job, &OpenbisConfig::default(), None).unwrap();

        let log = json::parse(&fs::read_to_string(&job.output).unwrap()).unwrap();
        assert_eq!(log["status"], "skipped");
        assert_eq!(
            log["sample_identifier"],
            "/CKUJATH/LEBEDIGITAL/EMODUL_WOLF_8_2_PROBE_1"
        );
    }

    #[test]
    fn test_upload_requires_experiment_name() {
        let root = tempfile::tempdir().unwrap();
        let metadata_file = root.path().join("meta.json");
        fs::write(&metadata_file, "{\"experiment_name\": 42, \"durchmesser_mm\": 98.6}").unwrap();

        let job = UploadJob {
            metadata_file,
            processed_data_file: root.path().join("data.csv"),
            raw_data_file: root.path().join(RAW_DATA_FILE),
            output: root.path().join("log.json"),
        };
        assert!(matches!(
            upload_to_openbis(&job, &OpenbisConfig::default(), None),
            Err(CemflowError::Upload(_))
        ));

        fs::write(&job.metadata_file, "{\"experiment_name\": \"  \"}").unwrap();
        assert!(matches!(
            upload_to_openbis(&job, &OpenbisConfig::default(), None),
            Err(CemflowError::Upload(_))
        ));

        fs::write(&job.metadata_file, "{\"durchmesser_mm\": 98.6}").unwrap();
        assert!(upload_to_openbis(&job, &OpenbisConfig::default(), None).is_err());
        assert!(!job.output.exists());
    }

    #[test]
    fn test_upload_error_outranks_logout_error() {
        let upload = || -> Result<()> { Err(CemflowError::Upload("dataset rejected".to_owned())) };
        let logout = || -> Result<()> { Err(CemflowError::Upload("session expired".to_owned())) };

        match end_session(upload(), logout()) {
            Err(CemflowError::Upload(message)) => assert_eq!(message, "dataset rejected"),
            other => panic!("unexpected {other:?}"),
        }
        match end_session(Ok(()), logout()) {
            Err(CemflowError::Upload(message)) => assert_eq!(message, "session expired"),
            other => panic!("unexpected {other:?}"),
        }
        match end_session(upload(), Ok(())) {
            Err(CemflowError::Upload(message)) => assert_eq!(message, "dataset rejected"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(end_session(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_local_upload_needs_credentials() {
        let root = tempfile::tempdir().unwrap();
        let dir = raw_dir(root.path());
        let metadata_file = root.path().join("meta.json");
        extract_metadata(&dir, &metadata_file).unwrap();

        let job = UploadJob {
            metadata_file,
            processed_data_file: root.path().join("data.csv"),
            raw_data_file: dir.join(RAW_DATA_FILE),
            output: root.path().join("log.json"),
        };
        let config = OpenbisConfig {
            runs_on: RunsOn::Local,
            ..OpenbisConfig::default()
        };
        assert!(matches!(
            upload_to_openbis(&job, &config, None),
            Err(CemflowError::Upload(_))
        ));
        assert!(!job.output.exists());
    }
}
