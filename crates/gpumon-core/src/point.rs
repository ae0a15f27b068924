//! Line protocol encoding of device samples.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::report::{DeviceSample, Report};
use crate::units::Reading;

/// The nine metrics emitted per device, in emission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    FbTotal,
    FbUsed,
    FbFree,
    Bar1Total,
    Bar1Used,
    Bar1Free,
    Gpu,
    Encoder,
    Decoder,
}

impl Metric {
    pub fn measurement(&self) -> &'static str {
        match self {
            Metric::FbTotal => "fbmemory/total",
            Metric::FbUsed => "fbmemory/used",
            Metric::FbFree => "fbmemory/free",
            Metric::Bar1Total => "bar1memory/total",
            Metric::Bar1Used => "bar1memory/used",
            Metric::Bar1Free => "bar1memory/free",
            Metric::Gpu => "gpu",
            Metric::Encoder => "gpu/encoder",
            Metric::Decoder => "gpu/decoder",
        }
    }

    pub fn all() -> &'static [Metric] {
        &[
            Metric::FbTotal,
            Metric::FbUsed,
            Metric::FbFree,
            Metric::Bar1Total,
            Metric::Bar1Used,
            Metric::Bar1Free,
            Metric::Gpu,
            Metric::Encoder,
            Metric::Decoder,
        ]
    }

    pub fn reading<'a>(&self, device: &'a DeviceSample) -> &'a Reading {
        match self {
            Metric::FbTotal => &device.fb_memory.total,
            Metric::FbUsed => &device.fb_memory.used,
            Metric::FbFree => &device.fb_memory.free,
            Metric::Bar1Total => &device.bar1_memory.total,
            Metric::Bar1Used => &device.bar1_memory.used,
            Metric::Bar1Free => &device.bar1_memory.free,
            Metric::Gpu => &device.utilization.gpu,
            Metric::Encoder => &device.utilization.encoder,
            Metric::Decoder => &device.utilization.decoder,
        }
    }
}

/// What to do with a reading that could not be parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnparsedPolicy {
    /// Emit the point with a value of 0.
    #[default]
    Zero,
    /// Leave the point out of the payload.
    Skip,
}

impl FromStr for UnparsedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(UnparsedPolicy::Zero),
            "skip" => Ok(UnparsedPolicy::Skip),
            other => Err(format!("unknown policy '{}', expected 'zero' or 'skip'", other)),
        }
    }
}

impl fmt::Display for UnparsedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnparsedPolicy::Zero => f.write_str("zero"),
            UnparsedPolicy::Skip => f.write_str("skip"),
        }
    }
}

/// Rendered `hostname=..,gpuid=..,product=..,minor=..` tag set shared by
/// every point of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet(String);

/// Written in place of a missing text tag. InfluxDB rejects empty tag values.
pub const UNKNOWN_TAG: &str = "unknown";
/// Written in place of a missing minor number.
pub const UNKNOWN_MINOR: &str = "0";

impl TagSet {
    pub fn for_device(host: &str, device: &DeviceSample) -> Self {
        Self(format!(
            "hostname={},gpuid={},product={},minor={}",
            escape_tag(or_placeholder(host, UNKNOWN_TAG)),
            escape_tag(or_placeholder(&device.id, UNKNOWN_TAG)),
            urlencoding::encode(or_placeholder(&device.product_name, UNKNOWN_TAG)),
            escape_tag(or_placeholder(&device.minor_number, UNKNOWN_MINOR)),
        ))
    }

    /// Value of a tag by key, as it appears on the wire.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.split(',').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

/// Escape the characters that are significant inside a line protocol tag.
pub fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: TagSet,
    pub value: i64,
    /// Nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl Point {
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{} value={} {}",
            self.measurement, self.tags, self.value, self.timestamp_ns
        )
    }
}

/// Encode every device of a report. All points share `timestamp_ns`.
pub fn encode_report(
    report: &Report,
    host: &str,
    timestamp_ns: i64,
    policy: UnparsedPolicy,
) -> Vec<Point> {
    let mut points = Vec::with_capacity(report.devices.len() * Metric::all().len());

    for device in &report.devices {
        let tags = TagSet::for_device(host, device);

        for metric in Metric::all() {
            let value = match metric.reading(device) {
                Reading::Value(v) => *v,
                Reading::Unparseable(raw) => {
                    debug!(
                        gpuid = %device.id,
                        metric = metric.measurement(),
                        raw = %raw,
                        %policy,
                        "Unparseable reading"
                    );
                    match policy {
                        UnparsedPolicy::Zero => 0,
                        UnparsedPolicy::Skip => continue,
                    }
                }
            };

            points.push(Point {
                measurement: metric.measurement(),
                tags: tags.clone(),
                value,
                timestamp_ns,
            });
        }
    }

    points
}

/// Join points into a newline separated write body.
pub fn render_payload(points: &[Point]) -> String {
    points
        .iter()
        .map(Point::to_line)
        .collect::<Vec<_>>()
        .join("\n")
}
