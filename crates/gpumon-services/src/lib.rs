mod agent;
mod sink;
mod smi;

pub use agent::{now_ns, Agent, CycleSummary};
pub use sink::InfluxSink;
pub use smi::{decode_report, FileSource, ReportSource, SmiRunner};

// Re-export core types so the binary only needs this crate for the pipeline
pub use gpumon_core::{
    encode_report, render_payload, AgentConfig, GpumonError, Report, UnparsedPolicy,
};
