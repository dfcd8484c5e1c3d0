//! # Vehicle
//!
//! Two descriptions of the vehicle are used:
//!
//! - [`Vehicle`] wraps the performance estimates (acceleration and
//!   deceleration against speed, lateral limits) used to build the speed
//!   profile of the warm start.
//! - [`DoubleTrack`] is the physical double-track dynamics model used by the
//!   optimiser.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod double_track;
pub mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths::{interp_clamped, is_strictly_increasing};

pub use double_track::{Auxiliary, Control, CornerForces, DoubleTrack, State, StateRate};
pub use params::{DoubleTrackParams, TireParams, VehicleParams};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Gravitational acceleration.
///
/// Units: meters/second^2
pub const GRAVITY_MPSS: f64 = 9.81;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The vehicle's performance estimates with validated lookup tables.
#[derive(Debug, Clone)]
pub struct Vehicle {
    params: VehicleParams,

    acc_speeds: Vec<f64>,
    acc_values: Vec<f64>,
    dcc_speeds: Vec<f64>,
    dcc_values: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("The {0} lookup table is empty")]
    EmptyLookup(&'static str),

    #[error("The speeds of the {0} lookup table are not strictly increasing")]
    NonMonotonicLookup(&'static str),

    #[error("The parameter {name} must be finite and positive, found {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("The parameter {name} must be between 0 and 1, found {value}")]
    NotAFraction { name: &'static str, value: f64 },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Vehicle {
    pub fn new(params: VehicleParams) -> Result<Self, VehicleError> {
        let (acc_speeds, acc_values) = split_lookup("acceleration", &params.acc_speed_lookup)?;
        let (dcc_speeds, dcc_values) = split_lookup("deceleration", &params.dcc_speed_lookup)?;

        check_positive("max_lon_acc_mpss", params.max_lon_acc_mpss)?;
        check_positive("max_lon_dcc_mpss", params.max_lon_dcc_mpss)?;
        check_positive("max_left_acc_mpss", params.max_left_acc_mpss)?;
        check_positive("max_right_acc_mpss", params.max_right_acc_mpss)?;
        check_positive("max_speed_mps", params.max_speed_mps)?;
        check_positive("max_jerk_mpsc", params.max_jerk_mpsc)?;

        Ok(Self {
            params,
            acc_speeds,
            acc_values,
            dcc_speeds,
            dcc_values: dcc_values.into_iter().map(f64::abs).collect(),
        })
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    /// Maximum longitudinal acceleration at the given speed.
    pub fn lon_acc(&self, speed_mps: f64) -> f64 {
        interp_clamped(speed_mps, &self.acc_speeds, &self.acc_values)
            .unwrap_or(self.params.max_lon_acc_mpss)
            .min(self.params.max_lon_acc_mpss)
            .max(0.0)
    }

    /// Maximum longitudinal deceleration magnitude at the given speed.
    pub fn lon_dcc(&self, speed_mps: f64) -> f64 {
        interp_clamped(speed_mps, &self.dcc_speeds, &self.dcc_values)
            .unwrap_or(self.params.max_lon_dcc_mpss)
            .min(self.params.max_lon_dcc_mpss)
            .max(0.0)
    }

    /// Lateral acceleration limit when following the given curvature, using
    /// the left limit for left hand turns.
    pub fn lat_acc_limit(&self, curvature_m: f64) -> f64 {
        if curvature_m >= 0.0 {
            self.params.max_left_acc_mpss
        } else {
            self.params.max_right_acc_mpss
        }
    }

    /// Highest speed at which the given curvature can be followed.
    pub fn corner_speed(&self, curvature_m: f64) -> f64 {
        let k = curvature_m.abs();

        if k > 0.0 {
            (self.lat_acc_limit(curvature_m) / k).sqrt().min(self.params.max_speed_mps)
        } else {
            self.params.max_speed_mps
        }
    }

    pub fn max_speed(&self) -> f64 {
        self.params.max_speed_mps
    }

    pub fn max_jerk(&self) -> f64 {
        self.params.max_jerk_mpsc
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn split_lookup(
    name: &'static str,
    table: &[[f64; 2]],
) -> Result<(Vec<f64>, Vec<f64>), VehicleError> {
    if table.is_empty() {
        return Err(VehicleError::EmptyLookup(name));
    }

    let speeds: Vec<f64> = table.iter().map(|r| r[0]).collect();
    let values: Vec<f64> = table.iter().map(|r| r[1]).collect();

    if !is_strictly_increasing(&speeds) {
        return Err(VehicleError::NonMonotonicLookup(name));
    }

    Ok((speeds, values))
}

pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<(), VehicleError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(VehicleError::NonPositive { name, value })
    }
}

pub(crate) fn check_fraction(name: &'static str, value: f64) -> Result<(), VehicleError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(VehicleError::NotAFraction { name, value })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) use super::double_track::test::params as double_track_params;

    pub(crate) fn estimates() -> VehicleParams {
        VehicleParams {
            acc_speed_lookup: vec![[0.0, 8.0], [20.0, 6.0], [40.0, 3.0]],
            dcc_speed_lookup: vec![[0.0, -10.0], [40.0, -12.0]],
            max_lon_acc_mpss: 7.0,
            max_lon_dcc_mpss: 11.0,
            max_left_acc_mpss: 15.0,
            max_right_acc_mpss: 12.0,
            max_speed_mps: 50.0,
            max_jerk_mpsc: 50.0,
        }
    }

    #[test]
    fn test_lookups() {
        let v = Vehicle::new(estimates()).unwrap();

        // Clamped by the maximum then interpolated
        assert_eq!(v.lon_acc(0.0), 7.0);
        assert!((v.lon_acc(30.0) - 4.5).abs() < 1e-12);
        // Never extrapolated
        assert_eq!(v.lon_acc(100.0), 3.0);

        assert!((v.lon_dcc(0.0) - 10.0).abs() < 1e-12);
        assert!((v.lon_dcc(40.0) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_lateral_limits() {
        let v = Vehicle::new(estimates()).unwrap();

        assert_eq!(v.lat_acc_limit(0.01), 15.0);
        assert_eq!(v.lat_acc_limit(-0.01), 12.0);
        assert!((v.corner_speed(-0.12) - 10.0).abs() < 1e-12);
        assert_eq!(v.corner_speed(0.0), 50.0);
    }

    #[test]
    fn test_invalid_lookups() {
        let mut p = estimates();
        p.acc_speed_lookup = vec![[0.0, 8.0], [0.0, 7.0]];
        assert!(matches!(
            Vehicle::new(p),
            Err(VehicleError::NonMonotonicLookup("acceleration"))
        ));

        let mut p = estimates();
        p.dcc_speed_lookup.clear();
        assert!(matches!(Vehicle::new(p), Err(VehicleError::EmptyLookup(_))));

        let mut p = estimates();
        p.max_speed_mps = 0.0;
        assert!(matches!(Vehicle::new(p), Err(VehicleError::NonPositive { .. })));
    }

    #[test]
    fn test_deserialise_legacy_key() {
        let toml = r#"
            acc_speed_loopup = [[0.0, 5.0], [50.0, 5.0]]
            dcc_speed_lookup = [[0.0, 5.0], [50.0, 5.0]]
            max_lon_acc_mpss = 5.0
            max_lon_dcc_mpss = 5.0
            max_left_acc_mpss = 10.0
            max_right_acc_mpss = 10.0
            max_speed_mps = 50.0
            max_jerk_mpsc = 20.0
        "#;
        let p: VehicleParams = util::params::from_str(toml).unwrap();
        assert_eq!(p.acc_speed_lookup.len(), 2);
    }
}
