//! Parameters structures for the vehicle models

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Performance estimates used by the speed profile simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleParams {
    /// Maximum longitudinal acceleration as a function of speed, as
    /// `[speed, acceleration]` rows with strictly increasing speed.
    ///
    /// Units: [meters/second, meters/second^2]
    #[serde(alias = "acc_speed_loopup")]
    pub acc_speed_lookup: Vec<[f64; 2]>,

    /// Maximum longitudinal deceleration as a function of speed, as
    /// `[speed, deceleration]` rows with strictly increasing speed. The sign
    /// of the deceleration is ignored.
    ///
    /// Units: [meters/second, meters/second^2]
    pub dcc_speed_lookup: Vec<[f64; 2]>,

    /// Units: meters/second^2
    pub max_lon_acc_mpss: f64,

    /// Units: meters/second^2
    pub max_lon_dcc_mpss: f64,

    /// Maximum lateral acceleration when turning left.
    ///
    /// Units: meters/second^2
    pub max_left_acc_mpss: f64,

    /// Maximum lateral acceleration when turning right.
    ///
    /// Units: meters/second^2
    pub max_right_acc_mpss: f64,

    /// Units: meters/second
    pub max_speed_mps: f64,

    /// Units: meters/second^3
    pub max_jerk_mpsc: f64,
}

/// Physical parameters of the double-track model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubleTrackParams {
    // ---- MASS ----

    /// Units: kilograms
    pub mass_kg: f64,

    /// Moment of inertia about the vertical axis.
    ///
    /// Units: kilograms*meters^2
    pub yaw_inertia_kgm2: f64,

    // ---- GEOMETRY ----

    /// Distance from the centre of gravity to the front axle.
    ///
    /// Units: meters
    pub cog_to_front_m: f64,

    /// Distance from the centre of gravity to the rear axle.
    ///
    /// Units: meters
    pub cog_to_rear_m: f64,

    /// Units: meters
    pub track_width_front_m: f64,

    /// Units: meters
    pub track_width_rear_m: f64,

    /// Height of the centre of gravity above the ground.
    ///
    /// Units: meters
    pub cog_height_m: f64,

    /// Half of the vehicle's width plus a safety margin, kept clear of the
    /// track boundaries.
    ///
    /// Units: meters
    pub half_width_m: f64,

    // ---- RESISTANCES ----

    /// Aerodynamic drag coefficient, the drag force is this times the speed
    /// squared.
    ///
    /// Units: newtons/(meters/second)^2
    pub drag_coeff: f64,

    /// Downforce coefficient on the front axle.
    ///
    /// Units: newtons/(meters/second)^2
    pub lift_coeff_front: f64,

    /// Downforce coefficient on the rear axle.
    ///
    /// Units: newtons/(meters/second)^2
    pub lift_coeff_rear: f64,

    /// Rolling resistance coefficient.
    pub rolling_resistance: f64,

    // ---- DISTRIBUTIONS ----

    /// Share of the drive force acting on the front axle.
    pub drive_split_front: f64,

    /// Share of the brake force acting on the front axle.
    pub brake_split_front: f64,

    /// Share of the roll stiffness on the front axle, distributing the lateral
    /// load transfer between the axles.
    pub roll_stiffness_front: f64,

    // ---- TIRES ----

    /// Longitudinal friction coefficient.
    pub mu_lon: f64,

    /// Lateral friction coefficient.
    pub mu_lat: f64,

    pub tire_front: TireParams,

    pub tire_rear: TireParams,

    // ---- ACTUATORS ----

    /// Units: newtons
    pub max_drive_force_n: f64,

    /// Magnitude of the largest brake force.
    ///
    /// Units: newtons
    pub max_brake_force_n: f64,

    /// Units: radians
    pub max_steer_rad: f64,

    /// Units: watts
    pub max_power_w: f64,

    /// Units: newtons/second
    #[serde(default)]
    pub max_drive_rate_nps: Option<f64>,

    /// Units: newtons/second
    #[serde(default)]
    pub max_brake_rate_nps: Option<f64>,

    /// Units: radians/second
    #[serde(default)]
    pub max_steer_rate_radps: Option<f64>,

    // ---- STATE LIMITS ----

    /// Units: radians/second
    pub max_yaw_rate_rads: f64,

    /// Units: radians
    pub max_slip_rad: f64,

    /// Largest heading deviation from the centerline.
    ///
    /// Units: radians
    pub max_heading_dev_rad: f64,

    /// Units: meters/second
    pub min_speed_mps: f64,

    /// Units: meters/second
    pub max_speed_mps: f64,
}

/// Simplified Magic Formula coefficients for one axle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TireParams {
    /// Stiffness factor
    pub b: f64,

    /// Shape factor
    pub c: f64,

    /// Curvature factor
    pub e: f64,

    /// Load sensitivity, the change in friction per nominal load.
    pub load_sensitivity: f64,

    /// Nominal normal load.
    ///
    /// Units: newtons
    pub nominal_load_n: f64,
}
