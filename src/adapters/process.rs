//! Subprocess runner shared by the CLI-backed adapters

use crate::adapters::AdapterError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools with a timeout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Path to the executable
    program: String,

    /// Working directory; inherited when unset
    workdir: Option<String>,

    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl CommandRunner {
    /// Create a new runner
    ///
    /// # Arguments
    /// * `program` - Path to the executable (e.g., "git", "/usr/bin/docker")
    /// * `timeout_secs` - Timeout for each invocation in seconds
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            workdir: None,
            timeout_secs,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Run with arguments and capture stdout
    ///
    /// # Errors
    /// Returns `AdapterError` if:
    /// - The executable cannot be spawned
    /// - It exits with a non-zero status
    /// - The output is not valid UTF-8
    /// - The command times out
    pub async fn run<I, S>(&self, args: I) -> Result<CommandOutput, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with_stdin(args, None).await
    }

    /// Run with arguments, writing `stdin` to the child before waiting
    pub async fn run_with_stdin<I, S>(&self, args: I, stdin: Option<&[u8]>) -> Result<CommandOutput, AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        debug!("Running {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let spawn_err = |e: std::io::Error| AdapterError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        };

        let mut child = command.spawn().map_err(spawn_err)?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await.map_err(spawn_err)?;
                // Closing stdin signals EOF to the child
                drop(pipe);
            }
        }

        let output = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| AdapterError::Timeout(self.timeout_secs))?
            .map_err(spawn_err)?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, code, stderr);
            return Err(AdapterError::CommandFailed {
                program: self.program.clone(),
                code,
                stderr,
            });
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| AdapterError::Decode(format!("{} output: {}", self.program, e)))?;

        debug!("{} returned {} bytes of output", self.program, stdout.len());

        Ok(CommandOutput { stdout, stderr })
    }
}
