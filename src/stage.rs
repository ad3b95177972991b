//! Distributed processing stages.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// How far a query has been executed. Ordered: `FetchColumns < WithMergeableState < Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessingStage {
    /// Only the columns have been read.
    FetchColumns,
    /// Partially aggregated states that a coordinator can still merge.
    WithMergeableState,
    /// The final result.
    Complete,
}

impl Display for ProcessingStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let s = match self {
            Self::FetchColumns => "FetchColumns",
            Self::WithMergeableState => "WithMergeableState",
            Self::Complete => "Complete",
        };
        write!(f, "{s}")
    }
}

/// Which halves of the relational work run here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageBoundary {
    pub from: ProcessingStage,
    pub to: ProcessingStage,
    /// Work done on the data-owning node: join, where, partial aggregation.
    pub first_stage: bool,
    /// Work done at the coordinator: merge, having, order, limit, projection.
    pub second_stage: bool,
}

/// Decide the stage split for reading at `from` and producing `to`.
///
/// # Errors
/// `Configuration` for the remote-to-remote hop
/// `WithMergeableState -> WithMergeableState`.
pub fn analyze_stages(from: ProcessingStage, to: ProcessingStage) -> Result<StageBoundary> {
    use ProcessingStage::WithMergeableState as Wms;
    if from == Wms && to == Wms {
        return Err(QueryError::Configuration(
            "distributed on distributed is not supported: from_stage and to_stage are both WithMergeableState"
                .to_string(),
        ));
    }
    Ok(StageBoundary {
        from,
        to,
        first_stage: from < Wms && to >= Wms,
        second_stage: from <= Wms && to > Wms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingStage::*;

    #[test]
    fn stage_matrix() {
        let b = analyze_stages(FetchColumns, Complete).unwrap();
        assert!(b.first_stage && b.second_stage);

        let b = analyze_stages(FetchColumns, WithMergeableState).unwrap();
        assert!(b.first_stage && !b.second_stage);

        let b = analyze_stages(WithMergeableState, Complete).unwrap();
        assert!(!b.first_stage && b.second_stage);

        let b = analyze_stages(FetchColumns, FetchColumns).unwrap();
        assert!(!b.first_stage && !b.second_stage);

        let b = analyze_stages(Complete, Complete).unwrap();
        assert!(!b.first_stage && !b.second_stage);

        assert!(matches!(analyze_stages(WithMergeableState, WithMergeableState), Err(QueryError::Configuration(_))));
    }
}
