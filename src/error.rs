//! Error types for tracing, the worker pool and render setup.

use thiserror::Error;

use crate::geometry::{Fp, Vec3f};

/// Errors raised while tracing a single path.
///
/// Consistency violations are fatal: they point at a defect in the
/// structure/distribution code rather than at bad luck with a sample.
/// Everything else is recoverable and only costs the sample it occurred in.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// A distance was drawn from the combined distribution but no primitive covers it
    #[error("sampled distance {distance} is not covered by any primitive along the ray")]
    UncoveredDistance { distance: Fp },

    /// A discrete choice was requested over weights that cannot be normalised
    #[error("weighted choice over {count} candidates has no valid positive weights")]
    InvalidWeights { count: usize },

    /// A direction or normal of zero length or with non-finite components
    #[error("degenerate direction {0:?}")]
    DegenerateDirection(Vec3f),

    /// A position or spectrum went NaN or infinite
    #[error("non-finite {what}: {value:?}")]
    NonFinite { what: &'static str, value: Vec3f },
}

impl TraceError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TraceError::UncoveredDistance { .. } | TraceError::InvalidWeights { .. }
        )
    }
}

/// Errors reported by the worker pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("a batch is still in flight, wait for it before submitting another")]
    Busy,

    #[error("{0} task(s) panicked during the batch")]
    TasksPanicked(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Top-level error for building and rendering a scene.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("invalid value {value} for parameter `{name}`")]
    InvalidParameter { name: &'static str, value: Fp },
}
