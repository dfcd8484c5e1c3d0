//! Parameters structure for the minimum time optimiser

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::nlp::AugLagParams;
use super::reconstruct::YawSource;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerParams {
    /// Shortest time allowed for a single interval.
    ///
    /// Units: seconds
    pub min_interval_time_s: f64,

    /// Largest accepted product of the scaled drive and brake forces.
    pub complementarity_tol: f64,

    /// Largest load transfer input as a multiple of the vehicle's weight.
    pub max_load_transfer_ratio: f64,

    /// How the yaw of the optimised trajectory is computed.
    pub yaw_source: YawSource,

    /// Parameters of the default solver.
    pub solver: AugLagParams,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            min_interval_time_s: 1e-3,
            complementarity_tol: 1e-3,
            max_load_transfer_ratio: 2.0,
            yaw_source: YawSource::Model,
            solver: AugLagParams::default(),
        }
    }
}
