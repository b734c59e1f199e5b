use thiserror::Error;

pub type HalResult<T> = std::result::Result<T, HalError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("root privileges are required to manage partitions")]
    NotRoot,

    #[error("{program} not found - {hint}")]
    MissingTool { program: String, hint: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}
