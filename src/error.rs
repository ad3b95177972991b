use thiserror::Error;

/// Error taxonomy of the pipeline builder and its operators.
///
/// Classification guidance:
/// - [`QueryError::Configuration`]: illegal settings or stage combinations, fatal and surfaced immediately
/// - [`QueryError::LimitExceeded`], [`QueryError::Timeout`], [`QueryError::TooSlow`],
///   [`QueryError::TooManyGroups`]: resource caps with the `throw` overflow policy
/// - [`QueryError::LogicalInconsistency`]: a collaborator violated its contract
///   (header mismatch, missing column); always fatal
/// - [`QueryError::Planning`]: the query shape cannot be analyzed
/// - [`QueryError::External`]: failures reported by storage adapters or
///   user-supplied expression programs
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("limit for number of columns to read exceeded: requested {requested}, maximum {max}")]
    TooManyColumns { requested: usize, max: usize },

    #[error("too deep subqueries: depth {depth}, maximum {max}")]
    TooDeepSubqueries { depth: usize, max: usize },

    /// A row or byte cap was exceeded under `OverflowMode::Throw`.
    #[error("limit for {what} exceeded: {actual} > {limit}")]
    LimitExceeded {
        what: String,
        limit: usize,
        actual: usize,
    },

    #[error("timeout exceeded: elapsed {elapsed_ms} ms, maximum {max_ms} ms")]
    Timeout { elapsed_ms: u128, max_ms: u128 },

    #[error("query is executing too slow: {speed:.2} rows/sec, minimum {min_speed} rows/sec")]
    TooSlow { speed: f64, min_speed: usize },

    #[error("limit for rows to group by exceeded: {actual} > {limit}")]
    TooManyGroups { limit: usize, actual: usize },

    #[error("logical error: {0}")]
    LogicalInconsistency(String),

    #[error("planning error: {0}")]
    Planning(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("query was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("spill error: {0}")]
    Spill(String),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

/// Coarse classification of a [`QueryError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ResourceLimitExceeded,
    LogicalInconsistency,
    Planning,
    Cancelled,
    External,
}

impl QueryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::TooManyColumns { .. }
            | Self::TooDeepSubqueries { .. }
            | Self::LimitExceeded { .. }
            | Self::Timeout { .. }
            | Self::TooSlow { .. }
            | Self::TooManyGroups { .. } => ErrorKind::ResourceLimitExceeded,
            Self::LogicalInconsistency(_) => ErrorKind::LogicalInconsistency,
            Self::Planning(_) | Self::UnknownTable(_) => ErrorKind::Planning,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) | Self::Spill(_) | Self::External(_) => ErrorKind::External,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
