//! Time-bucket aggregation for exports
//!
//! Supports a closed set of aggregates: MEAN (AVG), SUM, MIN, MAX, COUNT.
//! Windows use humantime syntax (`"15m"`, `"1h 30m"`, `"900s"`) and are
//! bound as a Postgres interval, never spliced into SQL text.

use crate::error::{HybridError, HybridResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Aggregation function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregationFunction {
    /// Average of values
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Count of values
    Count,
}

impl AggregationFunction {
    /// SQL aggregate over `column`, always yielding double precision
    pub fn to_sql(self, column: &str) -> String {
        let func = match self {
            Self::Mean => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        };
        format!("{func}({column})::double precision")
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

impl FromStr for AggregationFunction {
    type Err = HybridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "avg" | "average" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(HybridError::validation(format!(
                "unsupported aggregation function '{other}' (expected mean, sum, min, max or count)"
            ))),
        }
    }
}

impl TryFrom<String> for AggregationFunction {
    type Error = HybridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AggregationFunction> for String {
    fn from(value: AggregationFunction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate `function` over fixed `window` buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Aggregate applied per bucket
    pub function: AggregationFunction,
    /// Bucket width
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl AggregationSpec {
    /// Build a spec, rejecting empty windows
    pub fn new(function: AggregationFunction, window: Duration) -> HybridResult<Self> {
        if window.is_zero() {
            return Err(HybridError::validation(
                "aggregation window must be positive",
            ));
        }
        Ok(Self { function, window })
    }

    /// Parse from user-facing strings, e.g. `("mean", "15m")`
    pub fn parse(function: &str, window: &str) -> HybridResult<Self> {
        let function = function.parse()?;
        let window = humantime::parse_duration(window.trim()).map_err(|e| {
            HybridError::validation(format!("invalid aggregation window '{window}': {e}"))
        })?;
        Self::new(function, window)
    }

    /// Ensure a deserialized spec still has a positive window
    pub fn validate(&self) -> HybridResult<()> {
        Self::new(self.function, self.window).map(|_| ())
    }
}
