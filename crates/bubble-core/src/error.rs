use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config")]
    ConfigSerialize { source: toml::ser::Error },

    #[error("failed to read state file {path}")]
    StateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse state file {path}")]
    StateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write state file {path}")]
    StateWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
