//! Timer driven sample -> encode -> publish loop.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use gpumon_core::{encode_report, render_payload, AgentConfig, Result};
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::sink::InfluxSink;
use crate::smi::ReportSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub devices: usize,
    pub points: usize,
    pub timestamp_ns: i64,
}

pub struct Agent<S> {
    config: AgentConfig,
    source: S,
    sink: InfluxSink,
}

impl<S: ReportSource> Agent<S> {
    pub fn new(config: AgentConfig, source: S) -> Result<Self> {
        config.validate()?;
        let sink = InfluxSink::new(&config)?;
        Ok(Self {
            config,
            source,
            sink,
        })
    }

    /// One full cycle. The database creation call may fail without aborting
    /// the write; any other failure ends the cycle.
    #[instrument(skip(self), fields(host = %self.config.hostname))]
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let timestamp_ns = now_ns();

        let report = self.source.sample().await?;
        let points = encode_report(
            &report,
            &self.config.hostname,
            timestamp_ns,
            self.config.unparsed_policy,
        );
        let payload = render_payload(&points);

        if let Err(e) = self.sink.ensure_database().await {
            warn!(error = %e, category = e.category(), "Create database failed, writing anyway");
        }
        self.sink.write(&payload).await?;

        Ok(CycleSummary {
            devices: report.device_count(),
            points: points.len(),
            timestamp_ns,
        })
    }

    /// Run cycles on every tick until `shutdown` resolves. Cycle errors are
    /// logged and never stop the loop.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            host = %self.config.hostname,
            sink = %self.config.base_url(),
            db = %self.config.database,
            interval_ms = self.config.interval.as_millis(),
            "Agent started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping agent");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(summary) => info!(
                            devices = summary.devices,
                            points = summary.points,
                            "Cycle published"
                        ),
                        Err(e) => error!(
                            error = %e,
                            category = e.category(),
                            timeout = e.is_timeout(),
                            "Cycle failed"
                        ),
                    }
                }
            }
        }
    }
}

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
