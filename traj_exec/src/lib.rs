//! # Trajectory library.
//!
//! Minimum lap time trajectory generation for a race vehicle. The library is
//! used by the `traj_exec` executable and by the benchmarks.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Track-trajectory records - the column layout shared by every trajectory file
pub mod trajectory;

/// Race track geometry - centerline, boundaries and Frenet frame conversions
pub mod race_track;

/// Vehicle models - performance estimates and double-track dynamics
pub mod vehicle;

/// Speed profile simulator - builds the initial speed profile along a path
pub mod simulator;

/// Nonlinear programs - problem description and the default solver
pub mod nlp;

/// Minimum time optimisation - transcription, solve and reconstruction
pub mod min_time_optm;

/// Executable parameters
pub mod params;
