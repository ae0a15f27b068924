//! Device report model.
//!
//! `SmiLog` mirrors the XML document produced by `nvidia-smi -q -x` and is
//! what the decoder deserializes into. `Report` is the converted form the
//! encoder works with: every memory counter is a byte count and every
//! utilization is an integer percentage.

use serde::Deserialize;
use tracing::warn;

use crate::units::{parse_memory, parse_utilization, Reading};

/// Root `<nvidia_smi_log>` element. Unknown elements are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiLog {
    #[serde(default)]
    pub driver_version: String,
    #[serde(default)]
    pub attached_gpus: String,
    #[serde(rename = "gpu", default)]
    pub gpus: Vec<SmiGpu>,
}

/// One `<gpu id="...">` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiGpu {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_brand: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub minor_number: String,
    #[serde(default)]
    pub fb_memory_usage: SmiMemoryUsage,
    #[serde(default)]
    pub bar1_memory_usage: SmiMemoryUsage,
    #[serde(default)]
    pub utilization: SmiUtilization,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiMemoryUsage {
    #[serde(default)]
    pub total: String,
    #[serde(default)]
    pub used: String,
    #[serde(default)]
    pub free: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmiUtilization {
    #[serde(default)]
    pub gpu_util: String,
    #[serde(default)]
    pub memory_util: String,
    #[serde(default)]
    pub encoder_util: String,
    #[serde(default)]
    pub decoder_util: String,
}

/// Memory counters in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total: Reading,
    pub used: Reading,
    pub free: Reading,
}

impl From<&SmiMemoryUsage> for MemoryUsage {
    fn from(raw: &SmiMemoryUsage) -> Self {
        Self {
            total: parse_memory(&raw.total),
            used: parse_memory(&raw.used),
            free: parse_memory(&raw.free),
        }
    }
}

/// Utilization percentages, 0-100.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utilization {
    pub gpu: Reading,
    pub memory: Reading,
    pub encoder: Reading,
    pub decoder: Reading,
}

impl From<&SmiUtilization> for Utilization {
    fn from(raw: &SmiUtilization) -> Self {
        Self {
            gpu: parse_utilization(&raw.gpu_util),
            memory: parse_utilization(&raw.memory_util),
            encoder: parse_utilization(&raw.encoder_util),
            decoder: parse_utilization(&raw.decoder_util),
        }
    }
}

/// One cycle's telemetry for a single card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSample {
    pub id: String,
    pub product_name: String,
    pub product_brand: String,
    pub uuid: String,
    pub minor_number: String,
    /// Frame buffer memory.
    pub fb_memory: MemoryUsage,
    /// BAR1 memory.
    pub bar1_memory: MemoryUsage,
    pub utilization: Utilization,
}

impl From<&SmiGpu> for DeviceSample {
    fn from(raw: &SmiGpu) -> Self {
        Self {
            id: raw.id.trim().to_string(),
            product_name: raw.product_name.trim().to_string(),
            product_brand: raw.product_brand.trim().to_string(),
            uuid: raw.uuid.trim().to_string(),
            minor_number: raw.minor_number.trim().to_string(),
            fb_memory: MemoryUsage::from(&raw.fb_memory_usage),
            bar1_memory: MemoryUsage::from(&raw.bar1_memory_usage),
            utilization: Utilization::from(&raw.utilization),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub driver_version: String,
    pub attached_gpus: u32,
    pub devices: Vec<DeviceSample>,
}

impl Report {
    pub fn from_log(log: &SmiLog) -> Self {
        let attached_gpus = match log.attached_gpus.trim().parse::<u32>() {
            Ok(count) => count,
            Err(_) => {
                warn!(raw = %log.attached_gpus, "Unparseable attached GPU count");
                0
            }
        };

        let devices: Vec<DeviceSample> = log.gpus.iter().map(DeviceSample::from).collect();
        if attached_gpus as usize != devices.len() {
            warn!(
                attached_gpus,
                devices = devices.len(),
                "Attached GPU count does not match device blocks"
            );
        }

        Self {
            driver_version: log.driver_version.trim().to_string(),
            attached_gpus,
            devices,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
