//! Conversion of the textual quantities found in `nvidia-smi` reports.

const MIB_SUFFIX: &str = " MiB";
const PERCENT_SUFFIX: &str = " %";
const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Outcome of converting one reported quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    Value(i64),
    /// The raw text did not match the expected `"<integer> <unit>"` form.
    Unparseable(String),
}

impl Reading {
    pub fn value(&self) -> Option<i64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Unparseable(_) => None,
        }
    }

    pub fn value_or_zero(&self) -> i64 {
        self.value().unwrap_or(0)
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

impl Default for Reading {
    fn default() -> Self {
        Reading::Unparseable(String::new())
    }
}

/// Convert `"11519 MiB"` into a byte count.
pub fn parse_memory(raw: &str) -> Reading {
    parse_suffixed(raw, MIB_SUFFIX)
        .and_then(|mib| mib.checked_mul(BYTES_PER_MIB))
        .map(Reading::Value)
        .unwrap_or_else(|| Reading::Unparseable(raw.to_string()))
}

/// Convert `"83 %"` into an integer percentage. No scaling is applied.
pub fn parse_utilization(raw: &str) -> Reading {
    parse_suffixed(raw, PERCENT_SUFFIX)
        .map(Reading::Value)
        .unwrap_or_else(|| Reading::Unparseable(raw.to_string()))
}

/// Byte count of a `"<N> MiB"` string, 0 when it cannot be parsed.
pub fn memory_bytes(raw: &str) -> i64 {
    parse_memory(raw).value_or_zero()
}

/// Percentage of a `"<N> %"` string, 0 when it cannot be parsed.
pub fn utilization_percent(raw: &str) -> i64 {
    parse_utilization(raw).value_or_zero()
}

fn parse_suffixed(raw: &str, suffix: &str) -> Option<i64> {
    raw.strip_suffix(suffix)?.parse::<i64>().ok()
}
