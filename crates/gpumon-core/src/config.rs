use std::time::Duration;

use crate::error::{GpumonError, Result};
use crate::point::UnparsedPolicy;

pub const DEFAULT_DATABASE: &str = "GPU";
pub const DEFAULT_SMI_PROGRAM: &str = "nvidia-smi";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Query mode with XML output.
pub const SMI_ARGS: [&str; 2] = ["-q", "-x"];

/// Agent settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the InfluxDB HTTP API.
    pub sink_url: String,
    pub database: String,
    /// Value of the `hostname` tag.
    pub hostname: String,
    pub interval: Duration,
    pub smi_program: String,
    pub smi_args: Vec<String>,
    pub command_timeout: Duration,
    pub http_timeout: Duration,
    pub unparsed_policy: UnparsedPolicy,
}

impl AgentConfig {
    pub fn new(sink_url: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            sink_url: sink_url.into(),
            database: DEFAULT_DATABASE.to_string(),
            hostname: hostname.into(),
            interval: DEFAULT_INTERVAL,
            smi_program: DEFAULT_SMI_PROGRAM.to_string(),
            smi_args: SMI_ARGS.iter().map(|s| s.to_string()).collect(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            unparsed_policy: UnparsedPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.sink_url.trim();
        if url.is_empty() {
            return Err(GpumonError::Config(
                "sink URL is empty (set INFLUXDB_ADDR)".to_string(),
            ));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GpumonError::Config(format!(
                "sink URL must start with http:// or https://: {}",
                url
            )));
        }
        if self.database.trim().is_empty() {
            return Err(GpumonError::Config("database name is empty".to_string()));
        }
        if self.hostname.trim().is_empty() {
            return Err(GpumonError::Config("hostname is empty".to_string()));
        }
        if self.interval.is_zero() {
            return Err(GpumonError::Config("interval must be positive".to_string()));
        }
        if self.command_timeout.is_zero() || self.http_timeout.is_zero() {
            return Err(GpumonError::Config("timeouts must be positive".to_string()));
        }
        if self.smi_program.trim().is_empty() {
            return Err(GpumonError::Config("diagnostic program is empty".to_string()));
        }
        Ok(())
    }

    /// Sink URL with exactly one trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}/", self.sink_url.trim().trim_end_matches('/'))
    }

    pub fn query_url(&self) -> String {
        format!("{}query", self.base_url())
    }

    pub fn write_url(&self) -> String {
        format!("{}write", self.base_url())
    }

    pub fn create_database_statement(&self) -> String {
        format!("CREATE DATABASE {}", self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new("http://influxdb:8086/", "node-1");
        assert_eq!(config.database, "GPU");
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.smi_program, "nvidia-smi");
        assert_eq!(config.smi_args, vec!["-q", "-x"]);
        assert_eq!(config.unparsed_policy, UnparsedPolicy::Zero);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_urls() {
        for url in ["http://influxdb:8086", "http://influxdb:8086/", "http://influxdb:8086//"] {
            let config = AgentConfig::new(url, "node-1");
            assert_eq!(config.query_url(), "http://influxdb:8086/query");
            assert_eq!(config.write_url(), "http://influxdb:8086/write");
        }
        let config = AgentConfig::new("http://influxdb:8086", "node-1");
        assert_eq!(config.create_database_statement(), "CREATE DATABASE GPU");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AgentConfig::new("", "node-1").validate().is_err());
        assert!(AgentConfig::new("influxdb:8086", "node-1").validate().is_err());
        assert!(AgentConfig::new("http://influxdb:8086", "").validate().is_err());

        let mut config = AgentConfig::new("http://influxdb:8086", "node-1");
        config.interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(GpumonError::Config(_))));

        let mut config = AgentConfig::new("http://influxdb:8086", "node-1");
        config.http_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::new("http://influxdb:8086", "node-1");
        config.database = " ".to_string();
        assert!(config.validate().is_err());
    }
}
