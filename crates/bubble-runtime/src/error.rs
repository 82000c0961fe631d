#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("incus CLI not found — install: https://linuxcontainers.org/incus/docs/main/installing/")]
    NotFound { source: std::io::Error },

    #[error("command failed: {args:?}\n{detail}")]
    CommandFailed { args: Vec<String>, detail: String },

    #[error("command output was not valid UTF-8")]
    InvalidUtf8 { source: std::string::FromUtf8Error },

    #[error("failed to parse runtime output: {detail}")]
    Parse { detail: String },

    #[error("container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("container '{name}' not ready after {seconds}s")]
    NotReady { name: String, seconds: u64 },
}
