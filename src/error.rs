use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("front-matter error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("content too large: {id} is {bytes} bytes (limit {limit})")]
    ContentTooLarge {
        id: String,
        bytes: usize,
        limit: usize,
    },

    #[error("unsafe path rejected: {0}")]
    UnsafePath(String),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error("{collaborator} timed out after {after:?}")]
    ExternalTimeout {
        collaborator: &'static str,
        after: Duration,
    },

    #[error("{collaborator} failed: {message}")]
    External {
        collaborator: &'static str,
        message: String,
    },
}

impl Error {
    /// Whether the error only affects a single candidate and the caller
    /// should skip it and continue.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::ContentTooLarge { .. }
                | Error::UnsafePath(_)
                | Error::Yaml(_)
        )
    }
}
