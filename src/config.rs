use std::path::PathBuf;

use serde::Deserialize;

/// Tuning for the adaptive batch stepper.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    /// Instructions in the first `step_many` batch. Values below 1 are raised to 1.
    pub initial_batch_size: u32,
    /// Batches faster than this double the next batch.
    pub fast_batch_ms: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 1000,
            fast_batch_ms: 10.0,
        }
    }
}

/// Arguments of a DAP `launch` request, also built from the command line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
    #[serde(default = "default_stop_on_entry")]
    pub stop_on_entry: bool,
    #[serde(flatten)]
    pub driver: DriverConfig,
}

fn default_stop_on_entry() -> bool {
    true
}

impl LaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            labels: None,
            stop_on_entry: default_stop_on_entry(),
            driver: DriverConfig::default(),
        }
    }
}
