//! Data-limit configuration pushed by the control plane.
//!
//! The control plane drops a JSON document shaped like:
//!
//! ```text
//! {
//!   "config": {
//!     "emission_period": 60,
//!     "storage": { "storage_limit": null },
//!     "data": { "cellular_data_limit": null, "normalized_cell_plan_date": 1 }
//!   }
//! }
//! ```
//!
//! Limits are expressed in megabytes; `null` means unlimited.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bytes per megabyte as the control plane counts them.
pub const BYTES_PER_MEGABYTE: u64 = 1_000_000;

/// Earliest valid plan boundary day.
const MIN_PLAN_DAY: u32 = 1;
/// Latest valid plan boundary day; every month has it.
const MAX_PLAN_DAY: u32 = 28;

/// Top-level data-limit document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLimitConfig {
    pub config: LimitSettings,
}

/// Body of the data-limit document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Seconds the collectors wait between emissions.
    #[serde(default)]
    pub emission_period: u64,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(rename = "data", default)]
    pub cellular: CellularConfig,
}

/// Bound on unsent messages kept on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Megabytes; unlimited if absent.
    #[serde(rename = "storage_limit", default)]
    pub limit_mb: Option<u64>,
}

/// Transmission budget for cellular connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellularConfig {
    /// Megabytes per plan period; unlimited if absent.
    #[serde(rename = "cellular_data_limit", default)]
    pub limit_mb: Option<u64>,
    /// Day of the month on which the plan period rolls over, in 1..=28.
    #[serde(rename = "normalized_cell_plan_date", default = "default_plan_day")]
    pub plan_day: u32,
}

fn default_plan_day() -> u32 {
    MIN_PLAN_DAY
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            limit_mb: None,
            plan_day: MIN_PLAN_DAY,
        }
    }
}

impl StorageConfig {
    /// Storage limit in bytes, `None` when unbounded.
    pub fn limit_bytes(&self) -> Option<u64> {
        self.limit_mb.map(|mb| mb.saturating_mul(BYTES_PER_MEGABYTE))
    }
}

impl CellularConfig {
    /// Budget in bytes, `None` when unlimited.
    pub fn budget_bytes(&self) -> Option<u64> {
        self.limit_mb.map(|mb| mb.saturating_mul(BYTES_PER_MEGABYTE))
    }
}

impl DataLimitConfig {
    /// Read and validate a data-limit document.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a data-limit document.
    pub fn parse(content: &str) -> CoreResult<Self> {
        let config: DataLimitConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Storage limit in bytes.
    pub fn storage_limit_bytes(&self) -> Option<u64> {
        self.config.storage.limit_bytes()
    }

    /// Cellular settings.
    pub fn cellular(&self) -> &CellularConfig {
        &self.config.cellular
    }

    fn validate(&self) -> CoreResult<()> {
        let day = self.config.cellular.plan_day;
        if !(MIN_PLAN_DAY..=MAX_PLAN_DAY).contains(&day) {
            return Err(CoreError::Config(format!(
                "normalized_cell_plan_date must be within [{MIN_PLAN_DAY}, {MAX_PLAN_DAY}], got {day}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BACKEND_DEFAULT: &str = r#"{
        "config": {
            "emission_period": 60,
            "storage": { "storage_limit": null },
            "data": { "cellular_data_limit": null, "normalized_cell_plan_date": 1 }
        }
    }"#;

    #[test]
    fn test_parse_unlimited_document() {
        let config = DataLimitConfig::parse(BACKEND_DEFAULT).unwrap();
        assert_eq!(config.config.emission_period, 60);
        assert_eq!(config.storage_limit_bytes(), None);
        assert_eq!(config.cellular().budget_bytes(), None);
        assert_eq!(config.cellular().plan_day, 1);
    }

    #[test]
    fn test_megabytes_convert_to_decimal_bytes() {
        let config = DataLimitConfig::parse(
            r#"{"config":{"storage":{"storage_limit":5},"data":{"cellular_data_limit":100,"normalized_cell_plan_date":15}}}"#,
        )
        .unwrap();
        assert_eq!(config.storage_limit_bytes(), Some(5_000_000));
        assert_eq!(config.cellular().budget_bytes(), Some(100_000_000));
        assert_eq!(config.cellular().plan_day, 15);
    }

    #[test]
    fn test_rejects_out_of_range_plan_day() {
        let result = DataLimitConfig::parse(
            r#"{"config":{"data":{"cellular_data_limit":1,"normalized_cell_plan_date":31}}}"#,
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data_limit.json");
        std::fs::write(&path, BACKEND_DEFAULT).unwrap();

        let config = DataLimitConfig::load_from_file(&path).unwrap();
        assert_eq!(config, DataLimitConfig::parse(BACKEND_DEFAULT).unwrap());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = DataLimitConfig::load_from_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}
