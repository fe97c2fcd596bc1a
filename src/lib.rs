//! Stochastic simulation of disease spread across a metapopulation.
//!
//! A metapopulation is a set of geographically distinct nodes, each holding
//! integer compartment counts (e.g. susceptible/infected/recovered, possibly
//! per age class) together with a vector of node-local continuous state.
//! Within each node time evolves by a continuous-time Markov chain simulated
//! with Gillespie's direct method, interleaved with externally scheduled
//! demographic and movement events and a per-day hook that updates the
//! continuous state (infectious pressure, seasonal forcing).
//!
//! The simulation advances one day at a time. Each day the solver runs the
//! per-node Markov chain up to the day boundary, applies the scheduled
//! intra-node events, then the inter-node transfer events, invokes the
//! post-time-step hook, and snapshots the state into the trajectory whenever
//! a requested output time has passed. Nodes are partitioned across worker
//! threads; each partition owns an independent random number stream so a run
//! is reproducible for a fixed `(seed, threads)` pair.
//!
//! Model dynamics are supplied as plain function pointers: one propensity
//! function per transition and one post-time-step hook, both operating on
//! flat per-node state slices. See [`models`] for complete examples.

use thiserror::Error;

pub mod events;
pub mod model;
pub mod models;
pub mod output;
pub mod sampler;
pub mod solver;
pub mod sparse;

pub use events::{EventKind, EventList};
pub use model::Model;
pub use output::{OutputRequest, OutputSkeleton, StateMatrix, Trajectory};
pub use solver::{SimOptions, run};
pub use sparse::CscMatrix;

/// Propensity function for one transition.
///
/// Arguments are the node's compartment counts, its continuous state, its
/// local parameter row, the global parameters, and the node-local time.
/// The returned rate must be finite and non-negative.
pub type PropensityFn = fn(u: &[i32], v: &[f64], ldata: &[f64], gdata: &[f64], t: f64) -> f64;

/// Hook invoked for every node once per simulated day.
///
/// Writes the node's next continuous state into `v_new` given the current
/// compartment counts `u` and continuous state `v`. Returns a negative value
/// to abort the simulation, a positive value to force a recalculation of the
/// node's transition rates, or zero for no further action.
pub type PostTimeStepFn = fn(
    v_new: &mut [f64],
    u: &[i32],
    v: &[f64],
    ldata: &[f64],
    gdata: &[f64],
    node: usize,
    t: f64,
) -> i32;

/// Post-time-step hook that leaves the continuous state untouched.
pub fn no_post_step(
    _v_new: &mut [f64],
    _u: &[i32],
    _v: &[f64],
    _ldata: &[f64],
    _gdata: &[f64],
    _node: usize,
    _t: f64,
) -> i32 {
    0
}

/// Simulation failure.
///
/// Every variant except [`SimError::PostTimeStep`] maps to a stable positive
/// integer code via [`SimError::code`]; the absence of an error is code `0`.
/// A failing post-time-step hook surfaces its own negative return value.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("negative state detected")]
    NegativeState,
    #[error("unable to allocate memory buffer")]
    AllocMemoryBuffer,
    #[error("unsupported parallelization strategy")]
    UnsupportedParallelization,
    #[error("unable to sample individuals from the selected compartments")]
    SampleSelect,
    #[error("invalid rate detected (non-finite or negative)")]
    InvalidRate,
    #[error("undefined event type")]
    UndefinedEvent,
    #[error("post-time-step function failed (code {0})")]
    PostTimeStep(i32),
}

impl SimError {
    /// Stable integer code of this error.
    pub fn code(&self) -> i32 {
        match self {
            SimError::NegativeState => 1,
            SimError::AllocMemoryBuffer => 2,
            SimError::UnsupportedParallelization => 3,
            SimError::SampleSelect => 4,
            SimError::InvalidRate => 5,
            SimError::UndefinedEvent => 6,
            SimError::PostTimeStep(code) => *code,
        }
    }
}

/// Amount of feedback emitted while a simulation runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// One percent-complete line per simulated day.
    Progress,
    /// Progress plus per-day event counters.
    Debug,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SimError::NegativeState.code(), 1);
        assert_eq!(SimError::AllocMemoryBuffer.code(), 2);
        assert_eq!(SimError::UnsupportedParallelization.code(), 3);
        assert_eq!(SimError::SampleSelect.code(), 4);
        assert_eq!(SimError::InvalidRate.code(), 5);
        assert_eq!(SimError::UndefinedEvent.code(), 6);
        assert_eq!(SimError::PostTimeStep(-3).code(), -3);
    }

    #[test]
    fn verbosity_levels_are_ordered() {
        assert!(Verbosity::Silent < Verbosity::Progress);
        assert!(Verbosity::Progress < Verbosity::Debug);
        assert_eq!(Verbosity::default(), Verbosity::Silent);
    }
}
