//! Error taxonomy. Invariant violations are `thiserror` types callers match
//! on and never retry; transient store/matcher failures propagate as
//! `anyhow::Error` so the Job Queue's generic retry path handles them
//! uniformly.

/// Fatal to the caller; never retried.
#[derive(Debug, thiserror::Error)]
pub enum InvariantError {
    #[error("reservation depth must be >= -1, got {0}")]
    InvalidReservationDepth(i32),
}
