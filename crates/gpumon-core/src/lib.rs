pub mod config;
pub mod error;
pub mod point;
pub mod report;
pub mod units;

pub use config::AgentConfig;
pub use error::{GpumonError, Result};
pub use point::{encode_report, render_payload, Metric, Point, TagSet, UnparsedPolicy};
pub use report::{DeviceSample, MemoryUsage, Report, SmiLog, Utilization};
pub use units::{memory_bytes, parse_memory, parse_utilization, utilization_percent, Reading};
