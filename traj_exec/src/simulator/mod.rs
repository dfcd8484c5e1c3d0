//! # Speed profile simulator
//!
//! Builds a feasible speed profile along a fixed path, used as the warm start
//! of the optimiser. The profile is the minimum of a forward pass, limited by
//! the vehicle's acceleration, and a backward pass, limited by its
//! deceleration. Both passes are capped by the speed at which the local
//! curvature can be followed and share the tire grip with the lateral
//! acceleration through a traction ellipse.
//!
//! On a closed track the passes run across the start/finish line, and laps
//! are repeated until the profile stops changing.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};

use crate::trajectory::{Column, Trajectory};
use crate::vehicle::Vehicle;
pub use params::SimulatorParams;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// The jerk limit never lowers a speed below this.
///
/// Units: meters/second
const JERK_MIN_SPEED_MPS: f64 = 0.5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct Simulator {
    vehicle: Vehicle,
    params: SimulatorParams,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Copy of the input trajectory with SPEED, TIME, LON_ACC, LAT_ACC and
    /// DISTANCE filled.
    pub trajectory: Trajectory,

    /// False if a closed loop simulation hit its iteration limit.
    pub converged: bool,

    /// Number of laps simulated.
    pub iterations: usize,
}

/// Path quantities used by the passes.
struct Path {
    /// Distance from each sample to the next, the last entry being the
    /// closing interval of a closed track (zero on an open track).
    ds: Vec<f64>,
    curvature: Vec<f64>,
    cap: Vec<f64>,
    closed: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("A speed profile needs at least 2 samples, found {0}")]
    TooFewSamples(usize),

    #[error("Sample {0} has a non-finite curvature or position")]
    NonFinite(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Simulator {
    pub fn new(vehicle: Vehicle) -> Self {
        Self::with_params(vehicle, SimulatorParams::default())
    }

    pub fn with_params(vehicle: Vehicle, params: SimulatorParams) -> Self {
        Self { vehicle, params }
    }

    pub fn params(&self) -> &SimulatorParams {
        &self.params
    }

    /// Simulate the speed profile along the trajectory's path.
    ///
    /// The input is not modified. Only X, Y and CURVATURE are read.
    pub fn run_simulation(
        &self,
        trajectory: &Trajectory,
        closed_loop: bool,
    ) -> Result<SimulationResult, SimulationError> {
        let n = trajectory.len();
        if n < 2 {
            return Err(SimulationError::TooFewSamples(n));
        }

        let mut traj = trajectory.clone();
        traj.fill_distance();

        let path = self.path(&traj, closed_loop)?;

        // ---- FORWARD/BACKWARD ITERATIONS ----

        let mut speed = self.merged_pass(&path, None);
        let mut iterations = 1;
        let mut converged = !closed_loop;

        while closed_loop && iterations < self.params.max_iterations {
            let next = self.merged_pass(&path, Some(&speed));
            iterations += 1;

            let change = speed
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            speed = next;

            debug!("Closed loop iteration {}: max speed change {:.3e} m/s", iterations, change);

            if change < self.params.convergence_tol_mps {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Closed loop speed profile did not converge after {} iterations",
                iterations
            );
        }

        // ---- JERK LIMIT ----

        if self.params.jerk_limited {
            self.jerk_pass(&path, &mut speed);
            self.decel_pass(&path, &mut speed);
        }

        // ---- OUTPUT ----

        for (i, v) in speed.iter().enumerate() {
            traj.set(i, Column::Speed, *v);
            traj.set(i, Column::LatAcc, v * v * path.curvature[i]);
        }

        for i in 0..n {
            let (next, ds) = match (i + 1 < n, path.closed) {
                (true, _) => (i + 1, path.ds[i]),
                (false, true) => (0, path.ds[i]),
                (false, false) => (i, 0.0),
            };
            let acc = if ds > 0.0 {
                (speed[next] * speed[next] - speed[i] * speed[i]) / (2.0 * ds)
            } else if i > 0 {
                traj.get(i - 1, Column::LonAcc)
            } else {
                0.0
            };
            traj.set(i, Column::LonAcc, acc);
        }

        traj.fill_time_from_speed();

        info!(
            "Simulated speed profile: lap time {:.3} s, {} iteration(s)",
            traj.lap_time(closed_loop),
            iterations
        );

        Ok(SimulationResult {
            trajectory: traj,
            converged,
            iterations,
        })
    }

    fn path(&self, traj: &Trajectory, closed: bool) -> Result<Path, SimulationError> {
        let n = traj.len();
        let dist = traj.column(Column::Distance);
        let curvature: Vec<f64> = traj.column(Column::Curvature).to_vec();

        let mut ds: Vec<f64> = (0..n - 1).map(|i| dist[i + 1] - dist[i]).collect();
        ds.push(if closed { traj.closing_length() } else { 0.0 });

        for i in 0..n {
            if !curvature[i].is_finite() || !ds[i].is_finite() {
                return Err(SimulationError::NonFinite(i));
            }
        }

        let cap = curvature.iter().map(|k| self.vehicle.corner_speed(*k)).collect();

        Ok(Path { ds, curvature, cap, closed })
    }

    /// One forward pass, one backward pass and their minimum.
    ///
    /// On a closed track `previous` is the profile of the previous lap, whose
    /// end and start speeds seed the passes across the closing interval.
    fn merged_pass(&self, path: &Path, previous: Option<&[f64]>) -> Vec<f64> {
        let n = path.cap.len();

        // Forward
        let start = match previous {
            Some(prev) => self.accelerate(prev[n - 1], path.curvature[n - 1], path.ds[n - 1]),
            None => self.params.start_speed_mps,
        };

        let mut forward = vec![0.0; n];
        forward[0] = start.max(0.0).min(path.cap[0]);
        for i in 0..n - 1 {
            forward[i + 1] = self
                .accelerate(forward[i], path.curvature[i], path.ds[i])
                .min(path.cap[i + 1]);
        }

        // Backward
        let mut speed = forward;
        if let Some(prev) = previous {
            let end = self.decelerate(prev[0], path.curvature[0], path.ds[n - 1]);
            speed[n - 1] = speed[n - 1].min(end);
        }
        self.decel_pass(path, &mut speed);

        speed
    }

    /// Lower speeds so that no interval needs more than the available
    /// deceleration.
    fn decel_pass(&self, path: &Path, speed: &mut [f64]) {
        for i in (0..speed.len() - 1).rev() {
            let limit = self.decelerate(speed[i + 1], path.curvature[i + 1], path.ds[i]);
            speed[i] = speed[i].min(limit);
        }
    }

    /// Lower speeds so that the acceleration never rises faster than the
    /// maximum jerk.
    fn jerk_pass(&self, path: &Path, speed: &mut [f64]) {
        let jerk = self.vehicle.max_jerk();
        let mut prev_acc: Option<f64> = None;

        for i in 0..speed.len() - 1 {
            let ds = path.ds[i];
            if ds <= 0.0 {
                continue;
            }

            let (v0, v1) = (speed[i], speed[i + 1]);
            let acc = (v1 * v1 - v0 * v0) / (2.0 * ds);

            let acc = match prev_acc {
                Some(a_prev) => {
                    let v_mean = (0.5 * (v0 + v1)).max(JERK_MIN_SPEED_MPS);
                    let limit = a_prev + jerk * ds / v_mean;

                    if acc > limit {
                        let limited = (v0 * v0 + 2.0 * limit * ds).max(0.0).sqrt();
                        speed[i + 1] = limited.max(v1.min(JERK_MIN_SPEED_MPS));
                        (speed[i + 1] * speed[i + 1] - v0 * v0) / (2.0 * ds)
                    } else {
                        acc
                    }
                }
                None => acc,
            };

            prev_acc = Some(acc);
        }
    }

    /// Speed reached after accelerating over `ds` from `speed`.
    fn accelerate(&self, speed: f64, curvature: f64, ds: f64) -> f64 {
        let acc = self.vehicle.lon_acc(speed) * self.ellipse_factor(speed, curvature);

        (speed * speed + 2.0 * acc * ds).sqrt().min(self.vehicle.max_speed())
    }

    /// Highest speed from which `speed` can be reached by braking over `ds`.
    fn decelerate(&self, speed: f64, curvature: f64, ds: f64) -> f64 {
        let dcc = self.vehicle.lon_dcc(speed) * self.ellipse_factor(speed, curvature);

        (speed * speed + 2.0 * dcc * ds).sqrt()
    }

    /// Share of the longitudinal grip left after the lateral acceleration.
    fn ellipse_factor(&self, speed: f64, curvature: f64) -> f64 {
        let lat = speed * speed * curvature.abs();
        let usage = (lat / self.vehicle.lat_acc_limit(curvature)).min(1.0);

        (1.0 - usage * usage).sqrt()
    }
}
