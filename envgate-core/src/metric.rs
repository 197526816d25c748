//! Recognized environmental metrics
//!
//! The last topic level of an ingest topic names the metric. Only the three
//! quantities below are recognized; anything else is dropped by the pipeline.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Sensor quantity carried by a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Air temperature
    Temperature,
    /// Relative humidity
    Humidity,
    /// Barometric pressure
    Pressure,
}

impl Metric {
    /// Every recognized metric, in wire-name order of the default config
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Humidity, Metric::Pressure];

    /// Topic level / wire name
    pub const fn name(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
        }
    }

    /// Exact, case-sensitive lookup by wire name
    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|metric| metric.name() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::from_name(s).ok_or_else(|| ConfigError::UnknownMetric(s.to_string()))
    }
}
