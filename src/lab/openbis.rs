//! Client for the openBIS v3 JSON-RPC API.
//!
//! The application server (AS) stores samples and their properties, the
//! data store server (DSS) stores files. Every call other than `login`
//! carries the session token as its first parameter.

use std::{collections::BTreeMap, path::Path};

use reqwest::{blocking::Client, Url};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{CemflowError, Result};

pub const AS_ENDPOINT: &str = "/openbis/openbis/rmi-application-server-v3.json";
pub const DSS_ENDPOINT: &str = "/datastore_server/rmi-data-store-server-v3.json";
pub const UPLOAD_ENDPOINT: &str = "/datastore_server/session_workspace_file_upload";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A sample to register under a collection
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSpec {
    pub sample_type: String,
    pub space: String,
    pub project: String,
    pub collection: String,
    pub code: String,
    pub properties: BTreeMap<String, String>,
}

impl SampleSpec {
    pub fn identifier(&self) -> String {
        sample_identifier(&self.space, &self.project, &self.code)
    }
}

/// `/SPACE/PROJECT/CODE`
pub fn sample_identifier(space: &str, project: &str, code: &str) -> String {
    format!("/{space}/{project}/{code}")
}

/// Builds a JSON-RPC 2.0 request body
pub fn rpc_request(method: &str, params: Value) -> Value {
    json!({
        "method": method,
        "id": "1",
        "jsonrpc": "2.0",
        "params": params,
    })
}

/// Extracts the `result` of a JSON-RPC response
///
/// # Returns
/// The result value, or an upload error carrying the server's message
pub fn parse_rpc_response(response: Value) -> Result<Value> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(CemflowError::Upload(format!("openBIS error: {message}")));
    }
    match response {
        Value::Object(mut body) => Ok(body.remove("result").unwrap_or(Value::Null)),
        other => Err(CemflowError::Upload(format!(
            "Unexpected openBIS response: {other}"
        ))),
    }
}

fn sample_id(identifier: &str) -> Value {
    json!({
        "@type": "as.dto.sample.id.SampleIdentifier",
        "identifier": identifier,
    })
}

pub fn sample_creation(spec: &SampleSpec) -> Value {
    json!({
        "@type": "as.dto.sample.create.SampleCreation",
        "typeId": {
            "@type": "as.dto.entitytype.id.EntityTypePermId",
            "permId": spec.sample_type,
        },
        "spaceId": {
            "@type": "as.dto.space.id.SpacePermId",
            "permId": spec.space,
        },
        "projectId": {
            "@type": "as.dto.project.id.ProjectIdentifier",
            "identifier": format!("/{}/{}", spec.space, spec.project),
        },
        "experimentId": {
            "@type": "as.dto.experiment.id.ExperimentIdentifier",
            "identifier": format!("/{}/{}/{}", spec.space, spec.project, spec.collection),
        },
        "code": spec.code,
        "properties": spec.properties,
    })
}

pub fn uploaded_dataset_creation(dataset_type: &str, sample_identifier: &str, upload_id: &str) -> Value {
    json!({
        "@type": "dss.dto.dataset.create.UploadedDataSetCreation",
        "typeId": {
            "@type": "as.dto.entitytype.id.EntityTypePermId",
            "permId": dataset_type,
        },
        "sampleId": sample_id(sample_identifier),
        "properties": {},
        "parentIds": [],
        "uploadId": upload_id,
    })
}

pub struct OpenbisClient {
    http: Client,
    host: Url,
    session_token: Option<String>,
}

impl OpenbisClient {
    /// # Arguments
    /// * `datastore_url` - Any url on the openBIS host, e.g. `https://host/openbis/`
    pub fn new(datastore_url: &str) -> Result<OpenbisClient> {
        let host = Url::parse(datastore_url)
            .map_err(|err| CemflowError::Input(format!("Invalid openBIS url {datastore_url}: {err}")))?;
        Ok(OpenbisClient {
            http: Client::new(),
            host,
            session_token: None,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.host
            .join(path)
            .map_err(|err| CemflowError::Input(format!("Invalid openBIS endpoint {path}: {err}")))
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    fn token(&self) -> Result<&str> {
        self.session_token
            .as_deref()
            .ok_or_else(|| CemflowError::Upload("Not logged in to openBIS".to_owned()))
    }

    fn call(&self, endpoint: &str, method: &str, params: Value) -> Result<Value> {
        debug!("openBIS {method}");
        let response: Value = self
            .http
            .post(self.endpoint(endpoint)?)
            .json(&rpc_request(method, params))
            .send()?
            .error_for_status()?
            .json()?;
        parse_rpc_response(response)
    }

    pub fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let token = self.call(
            AS_ENDPOINT,
            "login",
            json!([credentials.username, credentials.password]),
        )?;
        match token {
            Value::String(token) => {
                info!("logged in to openBIS as {}", credentials.username);
                self.session_token = Some(token);
                Ok(())
            }
            _ => Err(CemflowError::Upload(format!(
                "openBIS login failed for user {}",
                credentials.username
            ))),
        }
    }

    pub fn logout(&mut self) -> Result<()> {
        if let Some(token) = self.session_token.take() {
            self.call(AS_ENDPOINT, "logout", json!([token]))?;
        }
        Ok(())
    }

    /// Fetches a sample by identifier
    ///
    /// # Returns
    /// The sample object, or `None` if it does not exist
    pub fn get_sample(&self, identifier: &str) -> Result<Option<Value>> {
        let result = self.call(
            AS_ENDPOINT,
            "getSamples",
            json!([
                self.token()?,
                [sample_id(identifier)],
                {"@type": "as.dto.sample.fetchoptions.SampleFetchOptions"}
            ]),
        )?;
        Ok(result.get(identifier).filter(|s| !s.is_null()).cloned())
    }

    pub fn exists_in_datastore(&self, identifier: &str) -> Result<bool> {
        Ok(self.get_sample(identifier)?.is_some())
    }

    /// # Returns
    /// The perm id of the new sample
    pub fn create_sample(&self, spec: &SampleSpec) -> Result<String> {
        let result = self.call(
            AS_ENDPOINT,
            "createSamples",
            json!([self.token()?, [sample_creation(spec)]]),
        )?;
        let perm_id = result
            .get(0)
            .and_then(|id| id.get("permId"))
            .and_then(Value::as_str)
            .ok_or_else(|| CemflowError::Upload(format!("openBIS did not create {}", spec.identifier())))?;
        info!("created openBIS sample {} ({perm_id})", spec.identifier());
        Ok(perm_id.to_owned())
    }

    pub fn delete_sample(&self, identifier: &str, reason: &str) -> Result<()> {
        self.call(
            AS_ENDPOINT,
            "deleteSamples",
            json!([
                self.token()?,
                [sample_id(identifier)],
                {"@type": "as.dto.sample.delete.SampleDeletionOptions", "reason": reason}
            ]),
        )?;
        info!("deleted openBIS sample {identifier}");
        Ok(())
    }

    fn upload_to_workspace(&self, upload_id: &str, file: &Path) -> Result<()> {
        let contents = std::fs::read(file).map_err(|err| CemflowError::io(file, err))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CemflowError::Upload(format!("{} is not a file", file.display())))?;
        let size = contents.len().to_string();

        self.http
            .post(self.endpoint(UPLOAD_ENDPOINT)?)
            .query(&[
                ("filename", format!("{upload_id}/{file_name}").as_str()),
                ("id", "1"),
                ("startByte", "0"),
                ("endByte", size.as_str()),
                ("size", size.as_str()),
                ("emptyFolder", "false"),
                ("sessionID", self.token()?),
            ])
            .body(contents)
            .send()?
            .error_for_status()?;
        debug!("uploaded {} to session workspace", file.display());
        Ok(())
    }

    /// Uploads files as one dataset attached to a sample
    ///
    /// # Returns
    /// The perm id of the new dataset
    pub fn upload_dataset(
        &self,
        sample_identifier: &str,
        dataset_type: &str,
        upload_id: &str,
        files: &[&Path],
    ) -> Result<String> {
        for file in files {
            self.upload_to_workspace(upload_id, file)?;
        }

        let result = self.call(
            DSS_ENDPOINT,
            "createUploadedDataSets",
            json!([
                self.token()?,
                [uploaded_dataset_creation(dataset_type, sample_identifier, upload_id)]
            ]),
        )?;
        let perm_id = result
            .get(0)
            .and_then(|id| id.get("permId"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CemflowError::Upload(format!("openBIS did not register a dataset for {sample_identifier}"))
            })?;
        info!("uploaded {} files to dataset {perm_id}", files.len());
        Ok(perm_id.to_owned())
    }
}
