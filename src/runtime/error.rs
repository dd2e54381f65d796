//! Error types for the compute runtime.
//!
//! This module declares the focused error taxonomy shared by every runtime
//! operation. Each variant models a single failure mode and carries enough
//! structured context to make failures actionable from logs without
//! reproducing the issue.
//!
//! ## Goals
//! * **Specificity:** one variant per failure mode (driver acquisition,
//!   device loss, capacity violations, map failures, oversized dispatches).
//! * **Ergonomics:** [`GpuError`] implements [`std::error::Error`] and
//!   [`fmt::Display`]; fallible operations return [`GpuResult`] and bubble
//!   with `?`.
//! * **Actionability:** structured fields (requested vs. available bytes,
//!   offending workgroup counts) keep messages precise.
//!
//! ## Propagation
//! Synchronous APIs surface these errors directly. Asynchronous APIs log the
//! error and still invoke their completion callback, because the C-ABI
//! callback surface is nullary; callers needing error state on that surface
//! must check side state.

use std::fmt;

use crate::runtime::types::DataType;

/// Result alias used across the runtime.
pub type GpuResult<T> = Result<T, GpuError>;

/// Unified error type for runtime operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// No WebGPU adapter or device could be acquired.
    DriverUnavailable {
        /// Which acquisition step failed (`"adapter"` or `"device"`).
        stage: &'static str,
        /// Driver-reported detail.
        detail: String,
    },

    /// The device was lost at runtime; the context must re-initialize.
    DeviceLost {
        /// Driver-reported reason, if any.
        reason: String,
    },

    /// Operation on an uninitialized context or a released / stale buffer.
    InvalidState {
        /// What was in the wrong state.
        what: &'static str,
    },

    /// A transfer exceeded the physical capacity of its buffer.
    SizeMismatch {
        /// Logical type driving the layout.
        data_type: DataType,
        /// Bytes the operation required.
        required: usize,
        /// Bytes physically available.
        available: usize,
    },

    /// The staging-buffer map reported a non-success status.
    MapFailed {
        /// Driver-reported detail.
        detail: String,
    },

    /// A dispatch exceeded backend workgroup limits.
    DispatchTooLarge {
        /// Requested workgroup count in the X dimension.
        workgroups: usize,
        /// Maximum workgroups permitted in one dimension.
        max_workgroups: usize,
        /// Total invocations the request implies.
        invocations: usize,
        /// Maximum total invocations permitted.
        max_invocations: usize,
    },

    /// An enqueue was attempted after worker teardown.
    WorkerStopped,

    /// A malformed argument was rejected before reaching the driver.
    InvalidArgument {
        /// Short description of the offending argument.
        what: &'static str,
    },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::DriverUnavailable { stage, detail } => {
                write!(f, "gpu driver unavailable: {stage} request failed ({detail})")
            }
            GpuError::DeviceLost { reason } => {
                write!(f, "gpu device lost: {reason}")
            }
            GpuError::InvalidState { what } => {
                write!(f, "invalid state: {what}")
            }
            GpuError::SizeMismatch {
                data_type,
                required,
                available,
            } => {
                write!(
                    f,
                    "size mismatch for {data_type}: {required} bytes required, {available} available"
                )
            }
            GpuError::MapFailed { detail } => {
                write!(f, "staging buffer map failed: {detail}")
            }
            GpuError::DispatchTooLarge {
                workgroups,
                max_workgroups,
                invocations,
                max_invocations,
            } => {
                write!(
                    f,
                    "dispatch too large: {workgroups} workgroups (max {max_workgroups}), \
                     {invocations} invocations (max {max_invocations})"
                )
            }
            GpuError::WorkerStopped => f.write_str("worker stopped; enqueue rejected"),
            GpuError::InvalidArgument { what } => {
                write!(f, "invalid argument: {what}")
            }
        }
    }
}

impl std::error::Error for GpuError {}
