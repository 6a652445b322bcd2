//! Dependency checks for the external tools.
//!
//! Verifies that the demodulator and transcoder are installed and answer a
//! probe invocation with the expected identification text.

use crate::config::Config;
use crate::error::{DtmfError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Result of a dependency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// Tool is installed and identified itself
    Ok,
    /// Tool is not found
    NotFound,
    /// Tool runs but its answer is not what we expect
    Warning(String),
}

/// One external tool and how to recognise it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    /// Role shown in reports ("demodulator", "transcoder")
    pub role: &'static str,
    pub program: String,
    pub probe_args: Vec<String>,
    pub marker: String,
}

impl Tool {
    pub fn demodulator(config: &Config) -> Self {
        Self {
            role: "demodulator",
            program: config.demodulator.program.clone(),
            probe_args: config.demodulator.probe_args.clone(),
            marker: config.demodulator.probe_marker.clone(),
        }
    }

    /// The transcoder's leading arguments also precede its probe arguments.
    pub fn transcoder(config: &Config) -> Self {
        let mut probe_args = config.transcoder.args.clone();
        probe_args.extend(config.transcoder.probe_args.iter().cloned());
        Self {
            role: "transcoder",
            program: config.transcoder.program.clone(),
            probe_args,
            marker: config.transcoder.probe_marker.clone(),
        }
    }
}

/// Run the tool's probe invocation and look for its marker.
///
/// Exit status is ignored: usage screens commonly exit non-zero while still
/// listing what the tool supports.
pub async fn check_tool(tool: &Tool, timeout: Duration) -> CheckResult {
    let output = Command::new(&tool.program)
        .args(&tool.probe_args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, output).await {
        Err(_) => CheckResult::Warning(format!(
            "'{}' did not answer within {} ms",
            tool.program,
            timeout.as_millis()
        )),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Ok(Err(e)) => CheckResult::Warning(format!("Error checking '{}': {}", tool.program, e)),
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if text.contains(&tool.marker) {
                CheckResult::Ok
            } else {
                CheckResult::Warning(format!(
                    "'{}' found but its output does not mention '{}'",
                    tool.program, tool.marker
                ))
            }
        }
    }
}

/// Check both tools, transcoder first.
pub async fn check_dependencies(config: &Config) -> Vec<(Tool, CheckResult)> {
    let timeout = config.decode.probe_timeout();
    let mut results = Vec::with_capacity(2);
    for tool in [Tool::transcoder(config), Tool::demodulator(config)] {
        let result = check_tool(&tool, timeout).await;
        results.push((tool, result));
    }
    results
}

/// Fail with [`DtmfError::DependencyMissing`] naming the first unusable tool.
pub async fn require_tools(config: &Config) -> Result<()> {
    for (tool, result) in check_dependencies(config).await {
        let reason = match result {
            CheckResult::Ok => continue,
            CheckResult::NotFound => format!("{} not found", tool.role),
            CheckResult::Warning(message) => message,
        };
        return Err(DtmfError::DependencyMissing {
            binary: tool.program,
            reason,
        });
    }
    Ok(())
}
