//! Tool driver errors

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments rejected before anything was run
    #[error("Invalid arguments: {0}")]
    Invalid(String),

    /// The tool ran and exited nonzero
    #[error("`{command}` failed: {output}")]
    ToolFailure { command: String, output: String },

    /// The tool could not be started
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool did not finish in time and was killed
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}
