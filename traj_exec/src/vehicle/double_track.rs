//! Double-track vehicle dynamics in the Frenet frame
//!
//! The model has four corners with a steered front axle. Longitudinal forces
//! are the drive and brake forces split between the axles, lateral forces
//! come from a simplified Magic Formula with load sensitivity. Normal loads
//! include the static distribution, longitudinal load transfer, downforce
//! and a lateral load transfer `gamma` that is an input of the model and is
//! made consistent with the lateral forces through the residual returned in
//! [`Auxiliary`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use util::maths::clamp;

use super::{check_fraction, check_positive, DoubleTrackParams, TireParams, VehicleError, GRAVITY_MPSS};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Speeds below this are floored inside the model.
///
/// Units: meters/second
const MIN_MODEL_SPEED_MPS: f64 = 0.5;

/// Lower bound on the Frenet scaling factor `1 - n*kappa`.
const MIN_FRENET_SCALE: f64 = 0.05;

/// Normal loads below this are floored when computing friction usage.
///
/// Units: newtons
const MIN_NORMAL_LOAD_N: f64 = 1.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The state of the vehicle in the Frenet frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct State {
    /// Arc-length along the centerline.
    ///
    /// Units: meters
    pub s_m: f64,

    /// Lateral offset, positive to the left.
    ///
    /// Units: meters
    pub n_m: f64,

    /// Heading deviation from the centerline tangent.
    ///
    /// Units: radians
    pub xi_rad: f64,

    /// Units: radians/second
    pub yaw_rate_rads: f64,

    /// Side slip angle at the centre of gravity.
    ///
    /// Units: radians
    pub slip_rad: f64,

    /// Magnitude of the velocity at the centre of gravity.
    ///
    /// Units: meters/second
    pub speed_mps: f64,
}

/// Time derivative of a [`State`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StateRate {
    pub s_mps: f64,
    pub n_mps: f64,
    pub xi_rads: f64,
    pub yaw_acc_radss: f64,
    pub slip_rads: f64,
    pub acc_mpss: f64,
}

/// The control inputs of the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Control {
    /// Total drive force, non-negative.
    ///
    /// Units: newtons
    pub drive_force_n: f64,

    /// Total brake force, non-positive.
    ///
    /// Units: newtons
    pub brake_force_n: f64,

    /// Front steering angle.
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// Lateral load transfer, positive moving load onto the right wheels.
    ///
    /// Units: newtons
    pub load_transfer_n: f64,
}

/// Forces and slip angle at a single corner, in the wheel frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CornerForces {
    pub fx_n: f64,
    pub fy_n: f64,
    pub fz_n: f64,
    pub alpha_rad: f64,
}

/// Additional model outputs used by the path constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Auxiliary {
    /// Front left, front right, rear left, rear right.
    pub corners: [CornerForces; 4],

    /// Difference between the load transfer input and the load transfer
    /// implied by the lateral forces.
    ///
    /// Units: newtons
    pub load_transfer_residual_n: f64,

    /// Friction ellipse usage of the front and rear axles, at most 1 when
    /// the tires are within their limits.
    pub friction_usage: [f64; 2],

    /// Units: watts
    pub drive_power_w: f64,

    /// Lateral force acting on the body.
    ///
    /// Units: newtons
    pub body_lateral_force_n: f64,
}

/// The double-track dynamics model.
#[derive(Debug, Clone)]
pub struct DoubleTrack {
    params: DoubleTrackParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State {
    pub const DIM: usize = 6;

    pub fn from_array(x: [f64; Self::DIM]) -> Self {
        Self {
            s_m: x[0],
            n_m: x[1],
            xi_rad: x[2],
            yaw_rate_rads: x[3],
            slip_rad: x[4],
            speed_mps: x[5],
        }
    }

    pub fn to_array(&self) -> [f64; Self::DIM] {
        [
            self.s_m,
            self.n_m,
            self.xi_rad,
            self.yaw_rate_rads,
            self.slip_rad,
            self.speed_mps,
        ]
    }
}

impl StateRate {
    pub fn to_array(&self) -> [f64; State::DIM] {
        [
            self.s_mps,
            self.n_mps,
            self.xi_rads,
            self.yaw_acc_radss,
            self.slip_rads,
            self.acc_mpss,
        ]
    }
}

impl Control {
    pub const DIM: usize = 4;

    pub fn from_array(u: [f64; Self::DIM]) -> Self {
        Self {
            drive_force_n: u[0],
            brake_force_n: u[1],
            steer_rad: u[2],
            load_transfer_n: u[3],
        }
    }

    pub fn to_array(&self) -> [f64; Self::DIM] {
        [
            self.drive_force_n,
            self.brake_force_n,
            self.steer_rad,
            self.load_transfer_n,
        ]
    }
}

impl DoubleTrack {
    pub fn new(params: DoubleTrackParams) -> Result<Self, VehicleError> {
        check_positive("mass_kg", params.mass_kg)?;
        check_positive("yaw_inertia_kgm2", params.yaw_inertia_kgm2)?;
        check_positive("cog_to_front_m", params.cog_to_front_m)?;
        check_positive("cog_to_rear_m", params.cog_to_rear_m)?;
        check_positive("track_width_front_m", params.track_width_front_m)?;
        check_positive("track_width_rear_m", params.track_width_rear_m)?;
        check_positive("mu_lon", params.mu_lon)?;
        check_positive("mu_lat", params.mu_lat)?;
        check_positive("tire_front.nominal_load_n", params.tire_front.nominal_load_n)?;
        check_positive("tire_rear.nominal_load_n", params.tire_rear.nominal_load_n)?;
        check_positive("max_drive_force_n", params.max_drive_force_n)?;
        check_positive("max_brake_force_n", params.max_brake_force_n)?;
        check_positive("max_steer_rad", params.max_steer_rad)?;
        check_positive("max_power_w", params.max_power_w)?;
        check_positive("max_yaw_rate_rads", params.max_yaw_rate_rads)?;
        check_positive("max_slip_rad", params.max_slip_rad)?;
        check_positive("max_heading_dev_rad", params.max_heading_dev_rad)?;
        check_positive("max_speed_mps", params.max_speed_mps)?;
        check_fraction("drive_split_front", params.drive_split_front)?;
        check_fraction("brake_split_front", params.brake_split_front)?;
        check_fraction("roll_stiffness_front", params.roll_stiffness_front)?;

        Ok(Self { params })
    }

    pub fn params(&self) -> &DoubleTrackParams {
        &self.params
    }

    /// Distance between the axles.
    pub fn wheelbase(&self) -> f64 {
        self.params.cog_to_front_m + self.params.cog_to_rear_m
    }

    /// Weight of the vehicle.
    ///
    /// Units: newtons
    pub fn weight(&self) -> f64 {
        self.params.mass_kg * GRAVITY_MPSS
    }

    /// Combined drag and rolling resistance at the given speed.
    pub fn resistance(&self, speed_mps: f64) -> f64 {
        self.params.drag_coeff * speed_mps * speed_mps
            + self.params.rolling_resistance * self.weight()
    }

    /// Height of the centre of gravity over the mean track width, the ratio
    /// between lateral force and lateral load transfer.
    fn load_transfer_ratio(&self) -> f64 {
        self.params.cog_height_m
            / (0.5 * (self.params.track_width_front_m + self.params.track_width_rear_m))
    }

    /// Evaluate the state derivative and the auxiliary outputs.
    ///
    /// `curvature_m` is the centerline curvature at the state's arc-length.
    pub fn derivative(
        &self,
        state: &State,
        control: &Control,
        curvature_m: f64,
    ) -> (StateRate, Auxiliary) {
        let p = &self.params;

        let v = state.speed_mps.max(MIN_MODEL_SPEED_MPS);
        let beta = state.slip_rad;
        let omega = state.yaw_rate_rads;
        let delta = control.steer_rad;
        let f_drive = control.drive_force_n;
        let f_brake = control.brake_force_n;
        let gamma = control.load_transfer_n;

        let (lf, lr) = (p.cog_to_front_m, p.cog_to_rear_m);
        let (twf, twr) = (p.track_width_front_m, p.track_width_rear_m);
        let l = lf + lr;

        // ---- LONGITUDINAL FORCES ----

        let fx_front = 0.5 * (p.drive_split_front * f_drive + p.brake_split_front * f_brake);
        let fx_rear =
            0.5 * ((1.0 - p.drive_split_front) * f_drive + (1.0 - p.brake_split_front) * f_brake);
        let f_res = self.resistance(v);

        // ---- NORMAL LOADS ----

        let weight = self.weight();
        let lon_transfer = p.cog_height_m / l * (f_drive + f_brake - f_res);
        let fz_front = 0.5 * (weight * lr / l - lon_transfer + p.lift_coeff_front * v * v);
        let fz_rear = 0.5 * (weight * lf / l + lon_transfer + p.lift_coeff_rear * v * v);
        let gamma_front = p.roll_stiffness_front * gamma;
        let gamma_rear = (1.0 - p.roll_stiffness_front) * gamma;

        let fz = [
            fz_front - gamma_front,
            fz_front + gamma_front,
            fz_rear - gamma_rear,
            fz_rear + gamma_rear,
        ];

        // ---- SLIP ANGLES ----

        let (vx_b, vy_b) = (v * beta.cos(), v * beta.sin());
        let alpha = [
            delta - ((lf * omega + vy_b) / (vx_b - 0.5 * twf * omega)).atan(),
            delta - ((lf * omega + vy_b) / (vx_b + 0.5 * twf * omega)).atan(),
            ((lr * omega - vy_b) / (vx_b - 0.5 * twr * omega)).atan(),
            ((lr * omega - vy_b) / (vx_b + 0.5 * twr * omega)).atan(),
        ];

        // ---- LATERAL FORCES ----

        let fy = [
            tire_lateral_force(&p.tire_front, p.mu_lat, fz[0], alpha[0]),
            tire_lateral_force(&p.tire_front, p.mu_lat, fz[1], alpha[1]),
            tire_lateral_force(&p.tire_rear, p.mu_lat, fz[2], alpha[2]),
            tire_lateral_force(&p.tire_rear, p.mu_lat, fz[3], alpha[3]),
        ];

        let fx_f_sum = 2.0 * fx_front;
        let fx_r_sum = 2.0 * fx_rear;
        let fy_f_sum = fy[0] + fy[1];
        let fy_r_sum = fy[2] + fy[3];

        // ---- BODY DYNAMICS ----

        let acc = (fx_r_sum * beta.cos() + fx_f_sum * (delta - beta).cos() + fy_r_sum * beta.sin()
            - fy_f_sum * (delta - beta).sin()
            - f_res * beta.cos())
            / p.mass_kg;

        let slip_rate = -omega
            + (-fx_r_sum * beta.sin() + fx_f_sum * (delta - beta).sin() + fy_r_sum * beta.cos()
                + fy_f_sum * (delta - beta).cos()
                + f_res * beta.sin())
                / (p.mass_kg * v);

        // Left and right longitudinal forces are equal and give no yaw moment
        let yaw_acc = ((fy[0] - fy[1]) * delta.sin() * 0.5 * twf
            - fy_r_sum * lr
            + (fy_f_sum * delta.cos() + fx_f_sum * delta.sin()) * lf)
            / p.yaw_inertia_kgm2;

        // ---- FRENET COUPLING ----

        let frenet_scale = (1.0 - state.n_m * curvature_m).max(MIN_FRENET_SCALE);
        let s_rate = v * (state.xi_rad + beta).cos() / frenet_scale;
        let n_rate = v * (state.xi_rad + beta).sin();
        let xi_rate = omega - curvature_m * s_rate;

        // ---- AUXILIARY ----

        let body_lateral = fy_r_sum + fx_f_sum * delta.sin() + fy_f_sum * delta.cos();

        let friction_usage = [
            axle_friction_usage(p, fx_f_sum, fy_f_sum, fz[0] + fz[1]),
            axle_friction_usage(p, fx_r_sum, fy_r_sum, fz[2] + fz[3]),
        ];

        let fx = [fx_front, fx_front, fx_rear, fx_rear];
        let mut corners = [CornerForces::default(); 4];
        for i in 0..4 {
            corners[i] = CornerForces {
                fx_n: fx[i],
                fy_n: fy[i],
                fz_n: fz[i],
                alpha_rad: alpha[i],
            };
        }

        let rate = StateRate {
            s_mps: s_rate,
            n_mps: n_rate,
            xi_rads: xi_rate,
            yaw_acc_radss: yaw_acc,
            slip_rads: slip_rate,
            acc_mpss: acc,
        };

        let aux = Auxiliary {
            corners,
            load_transfer_residual_n: gamma - self.load_transfer_ratio() * body_lateral,
            friction_usage,
            drive_power_w: f_drive * v,
            body_lateral_force_n: body_lateral,
        };

        (rate, aux)
    }

    /// Controls holding a quasi steady state at the given speed, longitudinal
    /// acceleration and path curvature.
    ///
    /// Used to seed the optimiser from a speed profile.
    pub fn quasi_steady_control(&self, speed_mps: f64, lon_acc_mpss: f64, curvature_m: f64) -> Control {
        let p = &self.params;
        let force = p.mass_kg * lon_acc_mpss + self.resistance(speed_mps);
        let lateral = p.mass_kg * speed_mps * speed_mps * curvature_m;

        Control {
            drive_force_n: clamp(force, 0.0, p.max_drive_force_n),
            brake_force_n: clamp(force, -p.max_brake_force_n, 0.0),
            steer_rad: clamp((self.wheelbase() * curvature_m).atan(), -p.max_steer_rad, p.max_steer_rad),
            load_transfer_n: self.load_transfer_ratio() * lateral,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Simplified Magic Formula lateral force with load sensitivity.
fn tire_lateral_force(tire: &TireParams, mu: f64, fz: f64, alpha: f64) -> f64 {
    let ba = tire.b * alpha;
    let shape = (tire.c * (ba - tire.e * (ba - ba.atan())).atan()).sin();

    mu * fz * (1.0 + tire.load_sensitivity * fz / tire.nominal_load_n) * shape
}

fn axle_friction_usage(p: &DoubleTrackParams, fx: f64, fy: f64, fz: f64) -> f64 {
    let fz = fz.max(MIN_NORMAL_LOAD_N);
    let lon = fx / (p.mu_lon * fz);
    let lat = fy / (p.mu_lat * fz);

    lon * lon + lat * lat
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn params() -> DoubleTrackParams {
        let tire = TireParams {
            b: 10.0,
            c: 1.6,
            e: 0.9,
            load_sensitivity: -0.05,
            nominal_load_n: 3000.0,
        };

        DoubleTrackParams {
            mass_kg: 1200.0,
            yaw_inertia_kgm2: 1500.0,
            cog_to_front_m: 1.2,
            cog_to_rear_m: 1.4,
            track_width_front_m: 1.6,
            track_width_rear_m: 1.5,
            cog_height_m: 0.4,
            half_width_m: 1.0,
            drag_coeff: 0.4,
            lift_coeff_front: 0.3,
            lift_coeff_rear: 0.4,
            rolling_resistance: 0.01,
            drive_split_front: 0.0,
            brake_split_front: 0.6,
            roll_stiffness_front: 0.5,
            mu_lon: 1.2,
            mu_lat: 1.2,
            tire_front: tire,
            tire_rear: tire,
            max_drive_force_n: 6000.0,
            max_brake_force_n: 15000.0,
            max_steer_rad: 0.4,
            max_power_w: 200_000.0,
            max_drive_rate_nps: None,
            max_brake_rate_nps: None,
            max_steer_rate_radps: None,
            max_yaw_rate_rads: 1.5,
            max_slip_rad: 0.3,
            max_heading_dev_rad: 1.2,
            min_speed_mps: 1.0,
            max_speed_mps: 60.0,
        }
    }

    fn straight_state(speed: f64) -> State {
        State {
            speed_mps: speed,
            ..Default::default()
        }
    }

    #[test]
    fn test_straight_line_acceleration() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = straight_state(20.0);
        let control = Control {
            drive_force_n: 3000.0,
            ..Default::default()
        };

        let (rate, aux) = model.derivative(&state, &control, 0.0);
        let expected = (3000.0 - model.resistance(20.0)) / 1200.0;

        assert!((rate.acc_mpss - expected).abs() < 1e-9);
        assert!(rate.yaw_acc_radss.abs() < 1e-9);
        assert!(rate.slip_rads.abs() < 1e-9);
        assert!((rate.s_mps - 20.0).abs() < 1e-12);
        assert!(rate.n_mps.abs() < 1e-12);
        assert!((aux.drive_power_w - 60_000.0).abs() < 1e-9);
        assert!(aux.load_transfer_residual_n.abs() < 1e-9);
    }

    #[test]
    fn test_load_distribution() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = straight_state(0.5);
        let (_, aux) = model.derivative(&state, &Control::default(), 0.0);

        let total: f64 = aux.corners.iter().map(|c| c.fz_n).sum();
        let downforce = (0.3 + 0.4) * 0.25;
        assert!((total - (model.weight() + downforce)).abs() < 1e-6);

        // Braking moves load onto the front axle
        let braking = Control {
            brake_force_n: -5000.0,
            ..Default::default()
        };
        let (_, aux_b) = model.derivative(&state, &braking, 0.0);
        assert!(aux_b.corners[0].fz_n > aux.corners[0].fz_n);
        assert!(aux_b.corners[2].fz_n < aux.corners[2].fz_n);
    }

    #[test]
    fn test_symmetric_steering() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = straight_state(15.0);
        let left = Control {
            steer_rad: 0.05,
            ..Default::default()
        };
        let right = Control {
            steer_rad: -0.05,
            ..Default::default()
        };

        let (rate_l, _) = model.derivative(&state, &left, 0.0);
        let (rate_r, _) = model.derivative(&state, &right, 0.0);

        assert!(rate_l.yaw_acc_radss > 0.0);
        assert!((rate_l.yaw_acc_radss + rate_r.yaw_acc_radss).abs() < 1e-9);
        assert!((rate_l.slip_rads + rate_r.slip_rads).abs() < 1e-9);
    }

    #[test]
    fn test_consistent_load_transfer() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = State {
            speed_mps: 20.0,
            yaw_rate_rads: 0.3,
            slip_rad: -0.02,
            ..Default::default()
        };
        let mut control = Control {
            steer_rad: 0.08,
            ..Default::default()
        };

        // Fixed point iteration on the load transfer input
        for _ in 0..50 {
            let (_, aux) = model.derivative(&state, &control, 0.0);
            control.load_transfer_n -= aux.load_transfer_residual_n;
        }

        let (_, aux) = model.derivative(&state, &control, 0.0);
        assert!(control.load_transfer_n > 0.0);
        assert!(aux.load_transfer_residual_n.abs() < 1e-6);
        assert!(aux.corners[1].fz_n > aux.corners[0].fz_n);
    }

    #[test]
    fn test_frenet_coupling() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = State {
            n_m: 2.0,
            xi_rad: 0.1,
            speed_mps: 10.0,
            yaw_rate_rads: 0.2,
            ..Default::default()
        };
        let kappa = 0.05;

        let (rate, _) = model.derivative(&state, &Control::default(), kappa);
        let s_rate = 10.0 * 0.1f64.cos() / (1.0 - 2.0 * kappa);

        assert!((rate.s_mps - s_rate).abs() < 1e-12);
        assert!((rate.n_mps - 10.0 * 0.1f64.sin()).abs() < 1e-12);
        assert!((rate.xi_rads - (0.2 - kappa * s_rate)).abs() < 1e-12);
    }

    #[test]
    fn test_guards() {
        let model = DoubleTrack::new(params()).unwrap();
        let state = State {
            n_m: 100.0,
            speed_mps: 0.0,
            ..Default::default()
        };
        let (rate, _) = model.derivative(&state, &Control::default(), 0.1);

        for r in rate.to_array().iter() {
            assert!(r.is_finite());
        }
    }

    #[test]
    fn test_quasi_steady_control() {
        let model = DoubleTrack::new(params()).unwrap();

        let c = model.quasi_steady_control(20.0, -5.0, 0.01);
        assert_eq!(c.drive_force_n, 0.0);
        assert!(c.brake_force_n < 0.0);
        assert!(c.steer_rad > 0.0);
        assert!(c.load_transfer_n > 0.0);

        let c = model.quasi_steady_control(20.0, 2.0, 0.0);
        assert!((c.drive_force_n - (2400.0 + model.resistance(20.0))).abs() < 1e-9);
        assert_eq!(c.brake_force_n, 0.0);
    }
}
