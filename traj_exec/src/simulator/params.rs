//! Parameters structure for the speed profile simulator

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorParams {
    /// Speed at the first sample of an open track, or of the first lap of a
    /// closed track.
    ///
    /// Units: meters/second
    pub start_speed_mps: f64,

    /// Closed loop iterations stop once the largest speed change between two
    /// laps is below this.
    ///
    /// Units: meters/second
    pub convergence_tol_mps: f64,

    /// Maximum number of closed loop iterations.
    pub max_iterations: usize,

    /// If true the merged profile is also limited by the vehicle's maximum
    /// jerk.
    pub jerk_limited: bool,
}

impl Default for SimulatorParams {
    fn default() -> Self {
        Self {
            start_speed_mps: 1.0,
            convergence_tol_mps: 1e-3,
            max_iterations: 20,
            jerk_limited: false,
        }
    }
}
