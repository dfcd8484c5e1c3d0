//! # Minimum time optimisation
//!
//! Computes the fastest way around a track for the double-track vehicle
//! model. The lap is transcribed into a nonlinear program by direct
//! collocation on the track's arc-length grid, solved by an [`NlpSolver`] and
//! converted back into a [`Trajectory`].
//!
//! A solver failure is not fatal: the best point found by the solver is
//! reconstructed and the outcome is marked as degraded.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod builder;
mod constraints;
mod layout;
mod params;
mod reconstruct;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};

use crate::nlp::{IterationRecord, NlpSolver, SolverError};
use crate::race_track::RaceTrack;
use crate::trajectory::Trajectory;
use crate::vehicle::DoubleTrack;

pub use builder::{BuildError, BuiltProblem, ProblemBuilder, WarmStart};
pub use constraints::{ControlRateBlock, DefectBlock, LapTimeObjective, PathBlock};
pub use layout::{ScaleFactors, VariableLayout};
pub use params::OptimizerParams;
pub use reconstruct::{reconstruct, Reconstruction, ReconstructError, YawSource};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub reconstruction: Reconstruction,

    /// Sum of the interval durations.
    ///
    /// Units: seconds
    pub lap_time: f64,

    pub status: OptimizationStatus,

    /// Solver progress per outer iteration.
    pub history: Vec<IterationRecord>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizationStatus {
    /// The solver converged.
    Optimal,

    /// The solver failed and the result is the best point it found, which is
    /// not optimal and may violate the constraints.
    Degraded { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("Could not build the problem: {0}")]
    Build(#[from] BuildError),

    #[error("The solver failed without a usable result: {0}")]
    Solver(SolverError),

    #[error("Could not reconstruct the trajectory: {0}")]
    Reconstruct(#[from] ReconstructError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OptimizationStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, OptimizationStatus::Optimal)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Optimise the lap.
///
/// `trajectory` has one sample per track grid point. It is the template of
/// the optimised trajectory and, with [`WarmStart::FromTrajectory`], the
/// source of the initial speed profile.
pub fn optimize(
    trajectory: &Trajectory,
    track: &RaceTrack,
    model: &DoubleTrack,
    params: &OptimizerParams,
    warm_start: WarmStart,
    solver: &dyn NlpSolver,
) -> Result<OptimizationOutcome, OptimizeError> {
    let BuiltProblem {
        layout,
        scale,
        problem,
    } = ProblemBuilder::new(track, model, params).build(trajectory, warm_start)?;

    info!(
        "Optimising {} samples on the {} track {:?}",
        layout.num_samples,
        if layout.closed { "closed" } else { "open" },
        track.name()
    );

    let (solution, status) = match solver.solve(&problem) {
        Ok(s) => (s, OptimizationStatus::Optimal),
        Err(e) => {
            let reason = e.to_string();

            match e {
                SolverError::NotConverged { best, .. } | SolverError::Cancelled { best } => {
                    warn!("{}, continuing with the best iterate", reason);
                    (*best, OptimizationStatus::Degraded { reason })
                }
                SolverError::InvalidProblem(msg) => {
                    return Err(OptimizeError::Solver(SolverError::InvalidProblem(msg)))
                }
            }
        }
    };

    let reconstruction = reconstruct(
        &solution.x,
        &layout,
        &scale,
        track,
        trajectory,
        params.yaw_source,
    )?;
    let lap_time = reconstruction.t.sum();

    info!(
        "Lap time {:.3} s after {} iterations, max violation {:.3e}",
        lap_time, solution.iterations, solution.max_violation
    );

    Ok(OptimizationOutcome {
        reconstruction,
        lap_time,
        status,
        history: solution.history,
    })
}
