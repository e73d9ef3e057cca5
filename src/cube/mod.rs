use thiserror::Error;

pub mod aggregator;
pub mod bone;
pub mod config;
pub mod consistency;
pub mod dimension;
pub mod factory;
pub mod measure;
pub mod result;
pub mod skeleton;

/// Error type used across the crate
#[derive(Debug, Error)]
pub enum CubeError {
    /// Blank or repeated dimension name inside one coordinate
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// The relational description of a dimension cannot be turned into one tree
    #[error("Invalid key selector in dimension '{dimension}': {reason}")]
    InvalidKeySelector { dimension: String, reason: String },

    #[error("Missing dimension(s): {}", .0.join(", "))]
    MissingDimension(Vec<String>),

    #[error("Value '{label}' not found in dimension '{dimension}'")]
    MissingValue { label: String, dimension: String },

    #[error("'{descendant}' is not a descendant of '{ancestor}' in dimension '{dimension}'")]
    NotAnAncestor {
        dimension: String,
        descendant: String,
        ancestor: String,
    },

    #[error("Dimension mismatch: expected [{expected}], found [{found}]")]
    DimensionMismatch { expected: String, found: String },

    #[error("Aggregation failed during {stage}")]
    AggregationFailure {
        stage: &'static str,
        #[source]
        source: Box<CubeError>,
    },

    /// An ancestor, leaf or combination set has more members than `usize` can count
    #[error(transparent)]
    ProductOverflow(#[from] crate::helpers::cartesian::ProductOverflow),

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CubeError {
    pub(crate) fn during(self, stage: &'static str) -> Self {
        CubeError::AggregationFailure {
            stage,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, CubeError>;

/// Outcome of a guarded run or a validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing was computed (e.g. an empty target set)
    NotRun,
    Ok,
    Error,
    Warning,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::NotRun => write!(f, "NOT_RUN"),
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "ERROR"),
            Status::Warning => write!(f, "WARNING"),
        }
    }
}

pub use aggregator::CubeAggregator;
pub use bone::Bone;
pub use config::AggregationConfig;
pub use consistency::{ConsistencyIssue, ConsistencyReport, IssueKind};
pub use dimension::{ChildLink, ChildrenLink, Dimension, ParentLink};
pub use factory::SkeletonFactory;
pub use measure::{
    Avg, CommutativeAggregator, Count, GroupAggregator, Max, MergesWith, Min, Scale, Scaled,
    Sum, WeightedAggregator,
};
pub use result::AggregationResult;
pub use skeleton::{NodeSelection, Skeleton, SkeletonsAccumulator, ValuedSkeleton};
