use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestCmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report formatting error: {0}")]
    Fmt(#[from] std::fmt::Error),

    #[error("Directories {old:?} and {new:?} must both exist and be of the same kind")]
    BadDirectories { old: PathBuf, new: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid exclusion pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Could not run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The external tool exited outside its {0, 1} contract.
    #[error("Error from {tool} (exit status {status:?}):\n{output}")]
    ToolFailure {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    /// A single file could not be interpreted in its expected format.
    #[error("{path:?}: {message}")]
    Format { path: PathBuf, message: String },
}

impl TestCmpError {
    pub fn format(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        TestCmpError::Format {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Per-file format errors are turned into differences; everything else aborts the run.
    pub fn is_format(&self) -> bool {
        matches!(self, TestCmpError::Format { .. })
    }
}

pub type Result<T> = std::result::Result<T, TestCmpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_format_errors_are_recoverable() {
        assert!(TestCmpError::format("a.shp", "truncated").is_format());
        let failure = TestCmpError::ToolFailure {
            tool: "numdiff".to_string(),
            status: Some(3),
            output: String::new(),
        };
        assert!(!failure.is_format());
        assert!(failure.to_string().contains("exit status Some(3)"));
    }
}
