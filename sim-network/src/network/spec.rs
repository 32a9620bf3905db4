use crate::error::AttributeError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_QUEUE_SIZE_PACKETS: usize = 100;

/// Attributes shared by every device and by the channel of a link
#[derive(Clone, Debug, PartialEq)]
pub struct LinkSpec {
    pub data_rate: DataRate,
    pub delay: Duration,
    /// Capacity of each device's transmit queue, in packets
    pub queue_size_packets: usize,
}

impl LinkSpec {
    pub fn new(data_rate: DataRate, delay: Duration) -> Self {
        Self {
            data_rate,
            delay,
            queue_size_packets: DEFAULT_QUEUE_SIZE_PACKETS,
        }
    }

    /// Builds a link spec from textual attribute values, e.g. `("5Mbps", "2ms")`
    pub fn from_attributes(data_rate: &str, delay: &str) -> Result<Self, AttributeError> {
        Ok(Self::new(data_rate.parse()?, parse_time(delay)?))
    }
}

/// A link's bandwidth, in bits per second
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataRate {
    bps: u64,
}

impl DataRate {
    pub fn from_bps(bps: u64) -> Self {
        Self { bps }
    }

    pub fn bps(&self) -> u64 {
        self.bps
    }

    /// Time needed to put `bytes` on the wire
    pub fn transmission_time(&self, bytes: usize) -> Duration {
        let bits = bytes as u128 * 8;
        let nanos = bits * 1_000_000_000 / self.bps as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bps", self.bps)
    }
}

impl FromStr for DataRate {
    type Err = AttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AttributeError::InvalidDataRate(s.to_string());
        let (value, unit) = split_value_and_unit(s).ok_or_else(invalid)?;
        let multiplier = match unit {
            "bps" | "b/s" => 1.0,
            "Bps" | "B/s" => 8.0,
            "kbps" | "Kbps" | "kb/s" | "Kb/s" => 1e3,
            "kBps" | "KBps" | "kB/s" | "KB/s" => 8e3,
            "Mbps" | "Mb/s" => 1e6,
            "MBps" | "MB/s" => 8e6,
            "Gbps" | "Gb/s" => 1e9,
            "GBps" | "GB/s" => 8e9,
            _ => return Err(invalid()),
        };

        let bps = (value * multiplier).round();
        if bps < 1.0 {
            return Err(AttributeError::ZeroDataRate(s.to_string()));
        }

        Ok(Self { bps: bps as u64 })
    }
}

/// Parses a time value with a mandatory unit (`s`, `ms`, `us`, `ns`, `min` or `h`)
pub fn parse_time(s: &str) -> Result<Duration, AttributeError> {
    let invalid = || AttributeError::InvalidTime(s.to_string());
    let (value, unit) = split_value_and_unit(s).ok_or_else(invalid)?;
    let nanos_per_unit = match unit {
        "h" => 3600e9,
        "min" => 60e9,
        "s" => 1e9,
        "ms" => 1e6,
        "us" => 1e3,
        "ns" => 1.0,
        _ => return Err(invalid()),
    };

    let nanos = (value * nanos_per_unit).round();
    if nanos > u64::MAX as f64 {
        return Err(invalid());
    }

    Ok(Duration::from_nanos(nanos as u64))
}

// Splits `12.5Mbps` into `(12.5, "Mbps")`, rejecting negative, non-finite and unit-less values
fn split_value_and_unit(s: &str) -> Option<(f64, &str)> {
    let s = s.trim();
    let unit_start = s.find(|c: char| c.is_ascii_alphabetic() || c == '/')?;
    let (value, unit) = s.split_at(unit_start);
    if value.is_empty() || unit.is_empty() {
        return None;
    }

    let value: f64 = value.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    Some((value, unit))
}
