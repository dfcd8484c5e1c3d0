//! # Trajectory Executable Parameters
//!
//! This module provides the parameters of the trajectory optimisation
//! executable.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::min_time_optm::OptimizerParams;
use crate::simulator::SimulatorParams;
use crate::vehicle::VehicleParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajExecParams {
    /// Spacing of the track's arc-length grid.
    ///
    /// Units: meters
    pub interval: f64,

    /// Track-trajectory file of the left boundary.
    pub left_boundary: PathBuf,

    /// Track-trajectory file of the right boundary.
    pub right_boundary: PathBuf,

    /// Track-trajectory file of the centerline.
    pub centerline: PathBuf,

    /// Performance estimates used to simulate the initial speed profile.
    /// Required when no warm start arrays are given.
    #[serde(default)]
    pub estimates: Option<VehicleParams>,

    /// Warm start states, controls and interval times from a previous run.
    #[serde(default)]
    pub x0: Option<PathBuf>,
    #[serde(default)]
    pub u0: Option<PathBuf>,
    #[serde(default)]
    pub t0: Option<PathBuf>,

    /// Output track-trajectory file of the optimised lap.
    pub output: PathBuf,

    /// Direction of travel along the input curves, 1 to follow them and -1
    /// to reverse them.
    #[serde(default = "default_direction")]
    pub direction: f64,

    /// Forces a closed (true) or open (false) track instead of detecting it
    /// from the centerline.
    #[serde(default)]
    pub closed_loop: Option<bool>,

    /// Parameters file of the double-track vehicle model.
    pub vehicle: PathBuf,

    #[serde(default)]
    pub simulator: SimulatorParams,

    #[serde(default)]
    pub optimizer: OptimizerParams,

    /// Diagnostic outputs, written when set.
    #[serde(default)]
    pub x_output: Option<PathBuf>,
    #[serde(default)]
    pub u_output: Option<PathBuf>,
    #[serde(default)]
    pub t_output: Option<PathBuf>,

    /// Output of the initial trajectory given to the optimiser.
    #[serde(default)]
    pub ttl_input_output: Option<PathBuf>,

    /// Output of the optimised trajectory with every column.
    #[serde(default)]
    pub ttl_output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("The warm start files x0, u0 and t0 must be given together")]
    PartialWarmStart,

    #[error("The vehicle estimates are required when no warm start is given")]
    MissingEstimates,

    #[error("The interval must be finite and positive, found {0}")]
    InvalidInterval(f64),

    #[error("The direction must be 1 or -1, found {0}")]
    InvalidDirection(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajExecParams {
    /// Check the consistency of the parameters.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(ParamsError::InvalidInterval(self.interval));
        }

        if self.direction.abs() != 1.0 {
            return Err(ParamsError::InvalidDirection(self.direction));
        }

        let given = [&self.x0, &self.u0, &self.t0]
            .iter()
            .filter(|p| p.is_some())
            .count();

        match given {
            0 if self.estimates.is_none() => Err(ParamsError::MissingEstimates),
            0 | 3 => Ok(()),
            _ => Err(ParamsError::PartialWarmStart),
        }
    }

    /// True if the warm start is read from files.
    pub fn has_warm_start(&self) -> bool {
        self.x0.is_some() && self.u0.is_some() && self.t0.is_some()
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn default_direction() -> f64 {
    1.0
}
