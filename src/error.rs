use thiserror::Error;

#[derive(Debug, Error)]
pub enum CemflowError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Unit error: {0}")]
    Unit(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: String, found: String },

    #[error("Mesher error: {0}")]
    Mesher(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Forward solver failed on sample {index}: {source}")]
    Propagation {
        index: usize,
        #[source]
        source: Box<CemflowError>,
    },

    #[error("Requested {requested} samples but only {available} are available")]
    SampleCount { requested: usize, available: usize },

    #[error("Post Processor error: {0}")]
    PostProcessor(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CemflowError {
    /// Wraps an I/O error with the path it occurred on
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> CemflowError {
        CemflowError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CemflowError>;
