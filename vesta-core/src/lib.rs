use std::{borrow::Borrow, fmt};

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

type BoxStr = Box<str>;
type BoxList<T> = Box<[T]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub Ulid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub Ulid);

impl CampaignId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Numeric device type code assigned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceType(pub u32);

/// Name of a device parameter, e.g. `outletStatus` or `power`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterName(BoxStr);

impl ParameterName {
    pub fn new(name: impl Into<BoxStr>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParameterName {
    fn from(name: &str) -> Self {
        Self(name.into())
    }
}

impl From<String> for ParameterName {
    fn from(name: String) -> Self {
        Self(name.into_boxed_str())
    }
}

impl Borrow<str> for ParameterName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ParameterName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single observed value. The store does not interpret it; typed views
/// live on the device adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementValue {
    Bool(bool),
    Number(NotNan<f64>),
    Raw(BoxStr),
}

impl MeasurementValue {
    /// Returns `None` for NaN.
    pub fn number(value: f64) -> Option<Self> {
        NotNan::new(value).ok().map(Self::Number)
    }

    pub fn raw(value: impl Into<BoxStr>) -> Self {
        Self::Raw(value.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(n) => Some(n.into_inner() != 0.0),
            Self::Raw(raw) => parse_bool(raw),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Some(n.into_inner()),
            Self::Raw(raw) => raw.trim().parse().ok(),
        }
    }

    /// Whether this observation reproduces the raw command value sent to
    /// the device, e.g. `Bool(true)` satisfies `"1"`.
    pub fn satisfies(&self, command: &str) -> bool {
        let command = command.trim();
        match self {
            Self::Bool(b) => parse_bool(command) == Some(*b),
            Self::Number(n) => command
                .parse::<f64>()
                .is_ok_and(|c| c == n.into_inner()),
            Self::Raw(raw) => raw.as_ref() == command,
        }
    }
}

impl From<bool> for MeasurementValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NotNan<f64>> for MeasurementValue {
    fn from(value: NotNan<f64>) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => fmt::Display::fmt(b, f),
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "True" | "on" => Some(true),
        "0" | "false" | "False" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub device_id: DeviceId,
    pub parameter: ParameterName,
    pub value: MeasurementValue,
    pub timestamp: jiff::Timestamp,
}

/// Inbound telemetry delivered for one processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementBatch {
    pub measurements: BoxList<Measurement>,
    pub received_at: jiff::Timestamp,
}

/// Raw command handed to the transport. Values stay textual (`"1"`, `"0"`)
/// because that is what the device side accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub device_id: DeviceId,
    pub parameter: ParameterName,
    pub value: BoxStr,
}
