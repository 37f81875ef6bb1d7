use std::{fmt, path::Path};

use reqwest::{
    blocking::{Client, Request, RequestBuilder},
    header::CONTENT_TYPE,
    Method, Url,
};
use tracing::{debug, info};

use crate::error::{CemflowError, Result};

/// Triplestore backend of an ontodocker dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triplestore {
    Jena,
    Blazegraph,
}

impl fmt::Display for Triplestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Triplestore::Jena => write!(f, "jena"),
            Triplestore::Blazegraph => write!(f, "blazegraph"),
        }
    }
}

/// REST client for an ontodocker instance, authenticated with a JWT
pub struct OntodockerClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl OntodockerClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<OntodockerClient> {
        let base_url = Url::parse(base_url)
            .map_err(|err| CemflowError::Input(format!("Invalid ontodocker url {base_url}: {err}")))?;
        Ok(OntodockerClient {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| CemflowError::Input(format!("Invalid ontodocker path {path}: {err}")))?;
        Ok(self.http.request(method, url).bearer_auth(&self.token))
    }

    fn dataset_path(triplestore: Triplestore, dataset: &str, suffix: &str) -> String {
        format!("/api/{triplestore}/{dataset}{suffix}")
    }

    pub fn list_datasets_request(&self) -> Result<Request> {
        Ok(self.request(Method::GET, "/api/ds/all")?.build()?)
    }

    pub fn create_dataset_request(&self, triplestore: Triplestore, dataset: &str) -> Result<Request> {
        let path = Self::dataset_path(triplestore, dataset, "");
        Ok(self.request(Method::PUT, &path)?.build()?)
    }

    pub fn delete_dataset_request(&self, triplestore: Triplestore, dataset: &str) -> Result<Request> {
        let path = Self::dataset_path(triplestore, dataset, "");
        Ok(self.request(Method::DELETE, &path)?.build()?)
    }

    pub fn upload_turtle_request(
        &self,
        triplestore: Triplestore,
        dataset: &str,
        turtle: Vec<u8>,
    ) -> Result<Request> {
        let path = Self::dataset_path(triplestore, dataset, "/upload");
        Ok(self
            .request(Method::POST, &path)?
            .header(CONTENT_TYPE, "text/turtle")
            .body(turtle)
            .build()?)
    }

    pub fn query_request(&self, triplestore: Triplestore, dataset: &str, sparql: &str) -> Result<Request> {
        let path = Self::dataset_path(triplestore, dataset, "/query");
        Ok(self
            .request(Method::GET, &path)?
            .query(&[("query", sparql)])
            .build()?)
    }

    pub fn update_request(&self, triplestore: Triplestore, dataset: &str, sparql: &str) -> Result<Request> {
        let path = Self::dataset_path(triplestore, dataset, "/update");
        Ok(self
            .request(Method::POST, &path)?
            .query(&[("update", sparql)])
            .build()?)
    }

    fn send(&self, request: Request) -> Result<String> {
        debug!("{} {}", request.method(), request.url());
        let response = self.http.execute(request)?.error_for_status()?;
        Ok(response.text()?)
    }

    /// # Returns
    /// The raw response body listing every dataset
    pub fn list_datasets(&self) -> Result<String> {
        self.send(self.list_datasets_request()?)
    }

    pub fn create_dataset(&self, triplestore: Triplestore, dataset: &str) -> Result<String> {
        info!("creating {triplestore} dataset {dataset}");
        self.send(self.create_dataset_request(triplestore, dataset)?)
    }

    pub fn delete_dataset(&self, triplestore: Triplestore, dataset: &str) -> Result<String> {
        info!("deleting {triplestore} dataset {dataset}");
        self.send(self.delete_dataset_request(triplestore, dataset)?)
    }

    /// Uploads a Turtle file into `dataset`
    pub fn upload_turtle(&self, triplestore: Triplestore, dataset: &str, turtle_file: &Path) -> Result<String> {
        let turtle = std::fs::read(turtle_file).map_err(|err| CemflowError::io(turtle_file, err))?;
        info!("uploading {} to {dataset}", turtle_file.display());
        self.send(self.upload_turtle_request(triplestore, dataset, turtle)?)
    }

    pub fn query(&self, triplestore: Triplestore, dataset: &str, sparql: &str) -> Result<String> {
        self.send(self.query_request(triplestore, dataset, sparql)?)
    }

    pub fn update(&self, triplestore: Triplestore, dataset: &str, sparql: &str) -> Result<String> {
        self.send(self.update_request(triplestore, dataset, sparql)?)
    }
}
