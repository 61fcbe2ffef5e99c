use std::path::PathBuf;

/// Errors that can occur in fusor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("malformed record: {0}")]
    Record(String),

    #[error("annotation error: {0}")]
    Annotation(String),

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("resume state mismatch: {0}")]
    Resume(String),

    #[error("external tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("FASTQ error: {0}")]
    Fastq(String),
}

impl Error {
    /// Convenience for wrapping an `io::Error` with a path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            source: err,
            path: PathBuf::from("<unknown>"),
        }
    }
}
