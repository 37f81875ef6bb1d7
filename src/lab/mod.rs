//! HTTP clients for the lab notebook and the triplestore.

pub mod ontodocker;
pub mod openbis;

pub use ontodocker::{OntodockerClient, Triplestore};
pub use openbis::{Credentials, OpenbisClient};
