//! Query settings.
//!
//! [`Settings`] is a plain serde struct: every field has a default, so a
//! partial JSON document (or none at all) yields a usable configuration.
//!
//! ```
//! use blockflow::settings::{OverflowMode, Settings};
//!
//! let s = Settings::from_json_str(r#"{ "max_threads": 2, "sort_overflow_mode": "break" }"#).unwrap();
//! assert_eq!(s.max_threads, 2);
//! assert_eq!(s.sort_overflow_mode, OverflowMode::Break);
//! assert_eq!(s.max_block_size, 65_536);
//! ```

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do when a row / byte / time cap is hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Fail the query.
    #[default]
    Throw,
    /// Stop producing rows and return what has been produced so far.
    Break,
    /// Aggregation only: keep aggregating existing keys, fold new keys into the
    /// overflow row (or drop them).
    Any,
}

/// How `WITH TOTALS` interacts with `HAVING` and the overflow row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalsMode {
    /// Totals over all groups, before HAVING.
    BeforeHaving,
    /// Totals over groups passing HAVING plus the overflow row.
    AfterHavingInclusive,
    /// Totals over groups passing HAVING only.
    #[default]
    AfterHavingExclusive,
    /// Inclusive when the share of rows passing HAVING is at least
    /// `totals_auto_threshold`, exclusive otherwise.
    AfterHavingAuto,
}

/// A row / byte cap pair with its overflow policy. `0` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub overflow_mode: OverflowMode,
}

impl SizeLimits {
    #[must_use]
    pub const fn new(max_rows: usize, max_bytes: usize, overflow_mode: OverflowMode) -> Self {
        Self { max_rows, max_bytes, overflow_mode }
    }

    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(0, 0, OverflowMode::Throw)
    }

    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.max_rows == 0 && self.max_bytes == 0
    }

    /// Check accumulated usage against the caps.
    ///
    /// Returns `Ok(true)` while within limits, `Ok(false)` when a cap is hit
    /// under a non-throwing policy.
    ///
    /// # Errors
    /// `LimitExceeded` when a cap is hit under [`OverflowMode::Throw`].
    pub fn check(&self, rows: usize, bytes: usize, what: &str) -> Result<bool> {
        let exceeded = if self.max_rows != 0 && rows > self.max_rows {
            Some(("rows", self.max_rows, rows))
        } else if self.max_bytes != 0 && bytes > self.max_bytes {
            Some(("bytes", self.max_bytes, bytes))
        } else {
            None
        };
        match exceeded {
            None => Ok(true),
            Some((unit, limit, actual)) => match self.overflow_mode {
                OverflowMode::Throw => Err(QueryError::LimitExceeded {
                    what: format!("{unit} ({what})"),
                    limit,
                    actual,
                }),
                OverflowMode::Break | OverflowMode::Any => Ok(false),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_block_size: usize,
    pub max_threads: usize,
    pub max_streams_to_max_threads_ratio: f64,
    pub max_distributed_connections: usize,

    pub max_columns_to_read: usize,
    pub max_subquery_depth: usize,

    pub max_rows_to_read: usize,
    pub max_bytes_to_read: usize,
    pub read_overflow_mode: OverflowMode,

    pub max_execution_time_ms: u64,
    pub timeout_overflow_mode: OverflowMode,
    pub min_execution_speed: usize,
    pub timeout_before_checking_execution_speed_ms: u64,

    pub max_rows_to_group_by: usize,
    pub group_by_overflow_mode: OverflowMode,
    pub group_by_two_level_threshold: usize,
    pub group_by_two_level_threshold_bytes: usize,
    pub max_bytes_before_external_group_by: usize,
    pub distributed_aggregation_memory_efficient: bool,
    pub aggregation_memory_efficient_merge_threads: usize,
    pub empty_result_for_aggregation_by_empty_set: bool,

    pub totals_mode: TotalsMode,
    pub totals_auto_threshold: f64,

    pub max_rows_to_sort: usize,
    pub max_bytes_to_sort: usize,
    pub sort_overflow_mode: OverflowMode,
    pub max_bytes_before_external_sort: usize,

    pub max_rows_in_distinct: usize,
    pub max_bytes_in_distinct: usize,
    pub distinct_overflow_mode: OverflowMode,

    pub max_rows_to_transfer: usize,
    pub max_bytes_to_transfer: usize,
    pub transfer_overflow_mode: OverflowMode,

    pub max_result_rows: usize,
    pub max_result_bytes: usize,
    pub result_overflow_mode: OverflowMode,

    pub extremes: bool,
    pub tmp_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_block_size: 65_536,
            max_threads: num_cpus::get(),
            max_streams_to_max_threads_ratio: 1.0,
            max_distributed_connections: 1024,
            max_columns_to_read: 0,
            max_subquery_depth: 100,
            max_rows_to_read: 0,
            max_bytes_to_read: 0,
            read_overflow_mode: OverflowMode::Throw,
            max_execution_time_ms: 0,
            timeout_overflow_mode: OverflowMode::Throw,
            min_execution_speed: 0,
            timeout_before_checking_execution_speed_ms: 0,
            max_rows_to_group_by: 0,
            group_by_overflow_mode: OverflowMode::Throw,
            group_by_two_level_threshold: 100_000,
            group_by_two_level_threshold_bytes: 100 * 1024 * 1024,
            max_bytes_before_external_group_by: 0,
            distributed_aggregation_memory_efficient: false,
            aggregation_memory_efficient_merge_threads: 0,
            empty_result_for_aggregation_by_empty_set: false,
            totals_mode: TotalsMode::AfterHavingExclusive,
            totals_auto_threshold: 0.5,
            max_rows_to_sort: 0,
            max_bytes_to_sort: 0,
            sort_overflow_mode: OverflowMode::Throw,
            max_bytes_before_external_sort: 0,
            max_rows_in_distinct: 0,
            max_bytes_in_distinct: 0,
            distinct_overflow_mode: OverflowMode::Throw,
            max_rows_to_transfer: 0,
            max_bytes_to_transfer: 0,
            transfer_overflow_mode: OverflowMode::Throw,
            max_result_rows: 0,
            max_result_bytes: 0,
            result_overflow_mode: OverflowMode::Throw,
            extremes: false,
            tmp_path: None,
        }
    }
}

impl Settings {
    /// Parse settings from JSON; absent fields keep their defaults.
    ///
    /// # Errors
    /// `Configuration` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QueryError::Configuration(format!("invalid settings: {e}")))
    }

    #[must_use]
    pub const fn read_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_rows_to_read, self.max_bytes_to_read, self.read_overflow_mode)
    }

    #[must_use]
    pub const fn sort_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_rows_to_sort, self.max_bytes_to_sort, self.sort_overflow_mode)
    }

    #[must_use]
    pub const fn distinct_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_rows_in_distinct, self.max_bytes_in_distinct, self.distinct_overflow_mode)
    }

    #[must_use]
    pub const fn transfer_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_rows_to_transfer, self.max_bytes_to_transfer, self.transfer_overflow_mode)
    }

    #[must_use]
    pub const fn result_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_result_rows, self.max_result_bytes, self.result_overflow_mode)
    }

    /// Worker count for the memory-efficient merge of partial aggregates.
    #[must_use]
    pub fn memory_efficient_merge_threads(&self) -> usize {
        if self.aggregation_memory_efficient_merge_threads == 0 {
            self.max_threads.max(1)
        } else {
            self.aggregation_memory_efficient_merge_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limits_policy() {
        let throw = SizeLimits::new(10, 0, OverflowMode::Throw);
        assert!(throw.check(10, 1_000_000, "sort").unwrap());
        assert!(matches!(throw.check(11, 0, "sort"), Err(QueryError::LimitExceeded { limit: 10, actual: 11, .. })));

        let brk = SizeLimits::new(0, 100, OverflowMode::Break);
        assert!(!brk.check(1, 101, "distinct").unwrap());
        assert!(SizeLimits::unlimited().check(usize::MAX, usize::MAX, "x").unwrap());
    }

    #[test]
    fn malformed_settings_are_configuration_errors() {
        let err = Settings::from_json_str("{ \"max_threads\": \"many\" }").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
