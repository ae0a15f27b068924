use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gpumon_core::{AgentConfig, GpumonError, Report, Result, SmiLog};
use tokio::process::Command;
use tracing::{debug, error, instrument};

/// Anything that can produce one report per cycle.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn sample(&self) -> Result<Report>;
}

/// Decode the XML printed by `nvidia-smi -q -x`.
pub fn decode_report(xml: &str) -> Result<Report> {
    let log: SmiLog =
        quick_xml::de::from_str(xml).map_err(|e| GpumonError::Decode(e.to_string()))?;
    Ok(Report::from_log(&log))
}

/// Runs the diagnostic program and decodes its output.
pub struct SmiRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SmiRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.smi_program.clone(),
            config.smi_args.clone(),
            config.command_timeout,
        )
    }

    /// Run the program once and return its stdout.
    #[instrument(skip(self), fields(program = %self.program, timeout_ms = self.timeout.as_millis()))]
    pub async fn run(&self) -> Result<String> {
        debug!(args = ?self.args, "Running diagnostic command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("{} not found", self.program);
                return Err(GpumonError::CommandNotFound(self.program.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(GpumonError::CommandTimeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(GpumonError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(bytes = output.stdout.len(), "Diagnostic command finished");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ReportSource for SmiRunner {
    async fn sample(&self) -> Result<Report> {
        let xml = self.run().await?;
        decode_report(&xml)
    }
}

/// Reads a captured report from disk instead of running the program.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReportSource for FileSource {
    async fn sample(&self) -> Result<Report> {
        let xml = tokio::fs::read_to_string(&self.path).await?;
        decode_report(&xml)
    }
}
