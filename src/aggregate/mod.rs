//! GROUP BY execution.
//!
//! The [`Aggregator`] folds rows into per-key [`AggregateState`] vectors held
//! by an [`AggregatedData`]. Small results live in one hash table; once a
//! table grows past the two-level thresholds it is split into
//! [`NUM_BUCKETS`] tables by key hash, which lets partial results from
//! different chains, nodes or spill files be merged bucket by bucket.
//!
//! Partially aggregated blocks carry the key columns followed by one
//! [`DataType::AggregateState`] column per aggregate. Finalized blocks carry
//! the finished values instead.
//!
//! [`AggregateState`]: crate::combiners::AggregateState

mod aggregator;
mod streams;

pub use aggregator::{bucket_of, AggregatedData, Aggregator, NUM_BUCKETS};
pub use streams::{
    AggregatingStream, MergingAggregatedMemoryEfficientStream, MergingAggregatedStream, ParallelAggregatingStream,
};

use crate::block::{Field, Header};
use crate::combiners::AggregateKind;
use crate::error::Result;
use crate::settings::{OverflowMode, Settings};
use crate::types::DataType;
use std::path::PathBuf;

/// One aggregate function call of the query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateDescription {
    pub kind: AggregateKind,
    pub argument_names: Vec<String>,
    /// Name of the result column, e.g. `sum(v)`.
    pub column_name: String,
    pub argument_types: Vec<DataType>,
    pub return_type: DataType,
}

impl AggregateDescription {
    /// # Errors
    /// `Planning` if the function rejects the argument types.
    pub fn new(
        kind: AggregateKind,
        argument_names: Vec<String>,
        argument_types: Vec<DataType>,
        column_name: impl Into<String>,
    ) -> Result<Self> {
        let return_type = kind.combiner().return_type(&argument_types)?;
        Ok(Self { kind, argument_names, column_name: column_name.into(), argument_types, return_type })
    }
}

#[derive(Clone, Debug)]
pub struct AggregatorParams {
    /// Header of the rows fed to the aggregation; supplies key types.
    pub src_header: Header,
    pub keys: Vec<String>,
    pub aggregates: Vec<AggregateDescription>,
    /// Fold rows of keys rejected by the group cap into one extra row.
    pub overflow_row: bool,
    pub max_rows_to_group_by: usize,
    pub group_by_overflow_mode: OverflowMode,
    /// Zero disables the rows trigger of the two-level split.
    pub group_by_two_level_threshold: usize,
    pub group_by_two_level_threshold_bytes: usize,
    pub max_bytes_before_external_group_by: usize,
    pub empty_result_for_aggregation_by_empty_set: bool,
    pub tmp_path: PathBuf,
}

impl AggregatorParams {
    /// Parameters using the aggregation settings of `settings`. The two-level
    /// split is only enabled when `allow_two_level` is set.
    #[must_use]
    pub fn from_settings(
        src_header: Header,
        keys: Vec<String>,
        aggregates: Vec<AggregateDescription>,
        overflow_row: bool,
        allow_two_level: bool,
        settings: &Settings,
        tmp_path: PathBuf,
    ) -> Self {
        Self {
            src_header,
            keys,
            aggregates,
            overflow_row,
            max_rows_to_group_by: settings.max_rows_to_group_by,
            group_by_overflow_mode: settings.group_by_overflow_mode,
            group_by_two_level_threshold: if allow_two_level { settings.group_by_two_level_threshold } else { 0 },
            group_by_two_level_threshold_bytes: if allow_two_level {
                settings.group_by_two_level_threshold_bytes
            } else {
                0
            },
            max_bytes_before_external_group_by: settings.max_bytes_before_external_group_by,
            empty_result_for_aggregation_by_empty_set: settings.empty_result_for_aggregation_by_empty_set,
            tmp_path,
        }
    }

    /// # Errors
    /// `LogicalInconsistency` if a key is missing from the source header.
    pub fn key_fields(&self) -> Result<Vec<Field>> {
        self.keys
            .iter()
            .map(|k| {
                let pos = self.src_header.position(k)?;
                Ok(self.src_header.fields()[pos].clone())
            })
            .collect()
    }

    /// Header of partially aggregated blocks.
    ///
    /// # Errors
    /// As for [`Self::key_fields`].
    pub fn intermediate_header(&self) -> Result<Header> {
        let mut fields = self.key_fields()?;
        fields.extend(
            self.aggregates.iter().map(|a| Field::new(a.column_name.clone(), DataType::AggregateState(a.kind))),
        );
        Ok(Header::new(fields))
    }

    /// Header of finalized blocks.
    ///
    /// # Errors
    /// As for [`Self::key_fields`].
    pub fn final_header(&self) -> Result<Header> {
        let mut fields = self.key_fields()?;
        fields.extend(self.aggregates.iter().map(|a| Field::new(a.column_name.clone(), a.return_type.clone())));
        Ok(Header::new(fields))
    }

    /// # Errors
    /// As for [`Self::key_fields`].
    pub fn header(&self, final_: bool) -> Result<Header> {
        if final_ { self.final_header() } else { self.intermediate_header() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_put_keys_before_aggregates() {
        let src = Header::new(vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64)]);
        let sum = AggregateDescription::new(AggregateKind::Sum, vec!["v".into()], vec![DataType::Int64], "sum(v)")
            .unwrap();
        let params = AggregatorParams::from_settings(
            src,
            vec!["k".into()],
            vec![sum],
            false,
            true,
            &Settings::default(),
            std::env::temp_dir(),
        );
        assert_eq!(params.intermediate_header().unwrap().names(), vec!["k", "sum(v)"]);
        assert_eq!(
            params.intermediate_header().unwrap().fields()[1].data_type,
            DataType::AggregateState(AggregateKind::Sum)
        );
        assert_ne!(params.final_header().unwrap().fields()[1].data_type, DataType::AggregateState(AggregateKind::Sum));
    }
}
