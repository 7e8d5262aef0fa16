//! Command construction and execution

use crate::error::ToolError;
use std::fmt;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// Default time a tool invocation may take
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// How tools are located and run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Prefix every invocation with `sudo`
    pub use_sudo: bool,
    /// Kill the child after this long
    pub timeout: Duration,
    /// Pool manager binary, resolved through PATH
    pub zpool: String,
    /// Volume manager binary, resolved through PATH
    pub zfs: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            timeout: DEFAULT_TOOL_TIMEOUT,
            zpool: "zpool".to_string(),
            zfs: "zfs".to_string(),
        }
    }
}

impl ToolConfig {
    /// Defaults with `USE_SUDO` applied
    pub fn from_env() -> Self {
        Self {
            use_sudo: parse_use_sudo(std::env::var("USE_SUDO").ok().as_deref()),
            ..Self::default()
        }
    }
}

/// `USE_SUDO` is on unless explicitly disabled
pub fn parse_use_sudo(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "false" | "0" | "no" | "off"),
        None => true,
    }
}

/// A fully resolved program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Resolve `tool args...`, wrapping in sudo when requested
    pub fn new(use_sudo: bool, tool: &str, args: Vec<String>) -> Self {
        if use_sudo {
            let mut wrapped = Vec::with_capacity(args.len() + 1);
            wrapped.push(tool.to_string());
            wrapped.extend(args);
            Self {
                program: "sudo".to_string(),
                args: wrapped,
            }
        } else {
            Self {
                program: tool.to_string(),
                args,
            }
        }
    }

    /// Run to completion and return combined stdout and stderr
    pub async fn run(&self, timeout: Duration) -> Result<String, ToolError> {
        let rendered = self.to_string();
        debug!("Running {}", rendered);

        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_elapsed| ToolError::Timeout {
                command: rendered.clone(),
                timeout,
            })?
            .map_err(|source| ToolError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            error!("{} exited with {}: {}", rendered, output.status, combined.trim());
            return Err(ToolError::ToolFailure {
                command: rendered,
                output: combined,
            });
        }
        Ok(combined)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// `import [-c <cacheFile>] <pool>`
pub fn import_args(pool_name: &str, cache_file: Option<&str>) -> Result<Vec<String>, ToolError> {
    require("pool name", pool_name)?;
    let mut args = vec!["import".to_string()];
    if let Some(cache_file) = cache_file.filter(|c| !c.is_empty()) {
        args.push("-c".to_string());
        args.push(cache_file.to_string());
    }
    args.push(pool_name.to_string());
    Ok(args)
}

/// `create -f [-o cachefile=<cacheFile>] <pool> <disks...>`
pub fn create_pool_args(pool_name: &str, cache_file: Option<&str>, disks: &[String]) -> Result<Vec<String>, ToolError> {
    require("pool name", pool_name)?;
    if disks.is_empty() {
        return Err(ToolError::Invalid("disk list cannot be empty".to_string()));
    }
    let mut args = vec!["create".to_string(), "-f".to_string()];
    if let Some(cache_file) = cache_file.filter(|c| !c.is_empty()) {
        args.push("-o".to_string());
        args.push(format!("cachefile={cache_file}"));
    }
    args.push(pool_name.to_string());
    args.extend(disks.iter().cloned());
    Ok(args)
}

/// `create -s -V <capacity> <pool/volume>`
pub fn create_volume_args(full_name: &str, capacity: &str) -> Result<Vec<String>, ToolError> {
    require("volume name", full_name)?;
    require("capacity", capacity)?;
    Ok(vec![
        "create".to_string(),
        "-s".to_string(),
        "-V".to_string(),
        capacity.to_string(),
        full_name.to_string(),
    ])
}

/// Pool name from `zpool status` output: the first `pool:` line, trimmed
pub fn parse_pool_name(status_output: &str) -> Option<String> {
    status_output
        .lines()
        .find(|line| line.contains("pool:"))
        .map(|line| line.replacen("pool:", "", 1).trim().to_string())
        .filter(|name| !name.is_empty())
}

fn require(what: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::Invalid(format!("{what} cannot be empty")));
    }
    Ok(())
}
