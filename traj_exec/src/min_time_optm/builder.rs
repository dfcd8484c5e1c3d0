//! Transcription of the minimum time problem into a nonlinear program

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;

use log::{debug, warn};
use ndarray::{Array1, Array2};

use super::constraints::{ControlRateBlock, DefectBlock, LapTimeObjective, PathBlock};
use super::layout::{ScaleFactors, VariableLayout};
use super::params::OptimizerParams;
use crate::nlp::{Block, Constraint, Problem, Variable};
use crate::race_track::{RaceTrack, TrackError};
use crate::trajectory::{Column, Trajectory};
use crate::vehicle::{Control, DoubleTrack, State};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Lowest speed used when seeding the states from a speed profile.
///
/// Units: meters/second
const MIN_GUESS_SPEED_MPS: f64 = 0.5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Builds the nonlinear program of a minimum time lap on a track.
pub struct ProblemBuilder<'a> {
    track: &'a RaceTrack,
    model: Arc<DoubleTrack>,
    params: &'a OptimizerParams,
}

/// A built problem with the layout and scaling needed to read its solution.
pub struct BuiltProblem {
    pub layout: VariableLayout,
    pub scale: ScaleFactors,
    pub problem: Problem,
}

/// Unscaled initial values of the decision variables.
struct Guess {
    x: Vec<[f64; State::DIM]>,
    u: Vec<[f64; Control::DIM]>,
    t: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Source of the initial values of the decision variables.
#[derive(Debug, Clone)]
pub enum WarmStart {
    /// Follow the track's centerline at the trajectory's speed profile.
    FromTrajectory,

    /// Physical values from a previous solve.
    ///
    /// `x` has one row of states per sample, with the absolute arc-length in
    /// the first column. `u` has one row of controls per interval and `t`
    /// one duration per interval.
    Arrays {
        x: Array2<f64>,
        u: Array2<f64>,
        t: Array1<f64>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("The warm start {what} has shape {found:?}, expected {expected:?}")]
    WarmStartShape {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("The trajectory has {found} samples but the track has {expected}")]
    TrajectoryLength { expected: usize, found: usize },

    #[error(transparent)]
    Track(#[from] TrackError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> ProblemBuilder<'a> {
    pub fn new(track: &'a RaceTrack, model: &DoubleTrack, params: &'a OptimizerParams) -> Self {
        Self {
            track,
            model: Arc::new(model.clone()),
            params,
        }
    }

    /// Build the problem.
    ///
    /// The trajectory holds one sample per track grid point and provides the
    /// speed and longitudinal acceleration of the warm start when
    /// [`WarmStart::FromTrajectory`] is used.
    pub fn build(&self, trajectory: &Trajectory, warm_start: WarmStart) -> Result<BuiltProblem, BuildError> {
        let n = self.track.len();
        if trajectory.len() != n {
            return Err(BuildError::TrajectoryLength {
                expected: n,
                found: trajectory.len(),
            });
        }

        let layout = VariableLayout::new(n, self.track.is_closed());
        let scale = ScaleFactors::new(self.track, &self.model);

        let guess = match warm_start {
            WarmStart::FromTrajectory => self.guess_from_trajectory(&layout, trajectory),
            WarmStart::Arrays { x, u, t } => guess_from_arrays(&layout, self.track, &x, &u, &t)?,
        };

        let variables = self.variables(&layout, &scale, &guess);
        let constraints = self.constraints(&layout, &scale);

        debug!(
            "Built problem with {} variables and {} constraint blocks ({} intervals)",
            variables.len(),
            constraints.len(),
            layout.num_intervals
        );

        Ok(BuiltProblem {
            layout,
            scale,
            problem: Problem {
                variables,
                objective: vec![Box::new(LapTimeObjective::new(&layout))],
                constraints,
            },
        })
    }

    /// Steady cornering along the centerline at the trajectory's speeds.
    fn guess_from_trajectory(&self, layout: &VariableLayout, trajectory: &Trajectory) -> Guess {
        let p = self.model.params();
        let kappa = self.track.curvature();
        let speed: Vec<f64> = trajectory
            .column(Column::Speed)
            .iter()
            .map(|v| v.max(p.min_speed_mps).max(MIN_GUESS_SPEED_MPS))
            .collect();

        let x = (0..layout.num_samples)
            .map(|k| {
                let v = speed[k];
                [self.track.abscissa()[k], 0.0, 0.0, v * kappa[k], 0.0, v]
            })
            .collect();

        let u = (0..layout.num_intervals)
            .map(|k| {
                self.model
                    .quasi_steady_control(speed[k], trajectory.get(k, Column::LonAcc), kappa[k])
                    .to_array()
            })
            .collect();

        let t = (0..layout.num_intervals)
            .map(|k| {
                let v_mean = 0.5 * (speed[k] + speed[layout.next_sample(k)]);
                (self.track.interval_length(k) / v_mean).max(self.params.min_interval_time_s)
            })
            .collect();

        Guess { x, u, t }
    }

    fn variables(&self, layout: &VariableLayout, scale: &ScaleFactors, guess: &Guess) -> Vec<Variable> {
        let p = self.model.params();
        let mut vars = vec![Variable::free(0.0); layout.num_variables()];

        // ---- STATES ----

        for k in 0..layout.num_samples {
            let x = scale.scale_x(&relative(guess.x[k], self.track.abscissa()[k]));

            let left = self.track.left_offsets()[k] - p.half_width_m;
            let right = self.track.right_offsets()[k] - p.half_width_m;
            let (mut n_lo, mut n_hi) = (-right / scale.x[1], left / scale.x[1]);
            if n_lo > n_hi {
                warn!(
                    "The track is narrower than the vehicle at sample {}, centering the vehicle",
                    k
                );
                let mid = 0.5 * (n_lo + n_hi);
                n_lo = mid;
                n_hi = mid;
            }

            vars[layout.x(k, 0)] = Variable::fixed(0.0);
            vars[layout.x(k, 1)] = Variable::new(n_lo, n_hi, x[1]);
            vars[layout.x(k, 2)] = Variable::new(-1.0, 1.0, x[2]);
            vars[layout.x(k, 3)] = Variable::new(-1.0, 1.0, x[3]);
            vars[layout.x(k, 4)] = Variable::new(-1.0, 1.0, x[4]);
            vars[layout.x(k, 5)] = Variable::new(p.min_speed_mps / scale.x[5], 1.0, x[5]);
        }

        // Boundary values are pinned inside the box of the free variable they
        // replace, otherwise an off-track warm start would be locked in.
        if !layout.closed {
            let first = scale.scale_x(&relative(guess.x[0], self.track.abscissa()[0]));
            for j in 1..State::DIM {
                let i = layout.x(0, j);
                vars[i] = pinned(&vars[i], first[j]);
            }

            let k = layout.num_samples - 1;
            let last = scale.scale_x(&relative(guess.x[k], self.track.abscissa()[k]));
            for j in 1..=2 {
                let i = layout.x(k, j);
                vars[i] = pinned(&vars[i], last[j]);
            }
        }

        // ---- CONTROLS AND TIMES ----

        let gamma = self.params.max_load_transfer_ratio;
        let t_min = scale.scale_t(self.params.min_interval_time_s);

        for k in 0..layout.num_intervals {
            let u = scale.scale_u(&guess.u[k]);

            vars[layout.u(k, 0)] = Variable::new(0.0, 1.0, u[0]);
            vars[layout.u(k, 1)] = Variable::new(-1.0, 0.0, u[1]);
            vars[layout.u(k, 2)] = Variable::new(-1.0, 1.0, u[2]);
            vars[layout.u(k, 3)] = Variable::new(-gamma, gamma, u[3]);
            vars[layout.t(k)] = Variable::new(t_min, f64::INFINITY, scale.scale_t(guess.t[k]));
        }

        vars
    }

    fn constraints(&self, layout: &VariableLayout, scale: &ScaleFactors) -> Vec<Constraint> {
        let kappa = self.track.curvature();
        let (path_lower, path_upper) = PathBlock::bounds(self.params.complementarity_tol);
        let mut constraints = Vec::with_capacity(3 * layout.num_intervals);

        for k in 0..layout.num_intervals {
            let next = layout.next_sample(k);

            let defect = DefectBlock::new(
                layout,
                k,
                self.model.clone(),
                *scale,
                self.track.interval_length(k),
                [kappa[k], kappa[next]],
            );
            constraints.push(Constraint::equality(Box::new(defect)));

            let path = PathBlock::new(layout, k, self.model.clone(), *scale, kappa[k]);
            constraints.push(Constraint::ranged(
                Box::new(path),
                path_lower.clone(),
                path_upper.clone(),
            ));

            // The last interval of an open track has no successor
            if layout.closed || k + 1 < layout.num_intervals {
                if let Some(rate) = ControlRateBlock::new(layout, k, &self.model, *scale) {
                    let dim = rate.dim();
                    constraints.push(Constraint::ranged(
                        Box::new(rate),
                        vec![f64::NEG_INFINITY; dim],
                        vec![0.0; dim],
                    ));
                }
            }
        }

        constraints
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn guess_from_arrays(
    layout: &VariableLayout,
    track: &RaceTrack,
    x: &Array2<f64>,
    u: &Array2<f64>,
    t: &Array1<f64>,
) -> Result<Guess, BuildError> {
    check_shape("x0", &[layout.num_samples, State::DIM], x.shape())?;
    check_shape("u0", &[layout.num_intervals, Control::DIM], u.shape())?;
    check_shape("t0", &[layout.num_intervals], t.shape())?;

    // The arc-length of each sample is the grid, whatever the array holds
    let x = x
        .outer_iter()
        .enumerate()
        .map(|(k, row)| {
            let mut out = [0.0; State::DIM];
            out.iter_mut().zip(row.iter()).for_each(|(o, v)| *o = *v);
            out[0] = track.abscissa()[k];
            out
        })
        .collect();

    let u = u
        .outer_iter()
        .map(|row| {
            let mut out = [0.0; Control::DIM];
            out.iter_mut().zip(row.iter()).for_each(|(o, v)| *o = *v);
            out
        })
        .collect();

    Ok(Guess {
        x,
        u,
        t: t.to_vec(),
    })
}

fn check_shape(what: &'static str, expected: &[usize], found: &[usize]) -> Result<(), BuildError> {
    if expected == found {
        Ok(())
    } else {
        Err(BuildError::WarmStartShape {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}

/// Fix a variable at `value` moved into its bounds.
fn pinned(var: &Variable, value: f64) -> Variable {
    Variable::fixed(value.max(var.lower).min(var.upper))
}

/// Replace the absolute arc-length of a state by its offset from the grid.
fn relative(mut x: [f64; State::DIM], abscissa: f64) -> [f64; State::DIM] {
    x[0] -= abscissa;
    x
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::race_track::test::{circle_track, straight_track};
    use crate::vehicle::test::double_track_params;

    fn constant_speed(track: &RaceTrack, speed: f64) -> Trajectory {
        let mut traj = track.center_trajectory();
        traj.column_mut(Column::Speed).fill(speed);
        traj
    }

    #[test]
    fn test_constant_speed_warm_start_is_feasible() {
        let track = straight_track(20.0, 1.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();
        let traj = constant_speed(&track, 20.0);

        let built = ProblemBuilder::new(&track, &model, &params)
            .build(&traj, WarmStart::FromTrajectory)
            .unwrap();

        assert!(!built.layout.closed);
        assert_eq!(built.layout.num_samples, 21);
        assert_eq!(built.layout.num_intervals, 20);
        assert!(built.problem.validate().is_ok());

        let z = built.problem.initial();
        let viol = built.problem.max_violation_at(&z);
        assert!(viol < 1e-9, "violation {}", viol);

        // Each interval takes 1 m at 20 m/s
        let lap = built.problem.objective_at(&z) * built.scale.t;
        assert!((lap - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_track_boundary_conditions() {
        let track = straight_track(10.0, 1.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();
        let traj = constant_speed(&track, 10.0);

        let built = ProblemBuilder::new(&track, &model, &params)
            .build(&traj, WarmStart::FromTrajectory)
            .unwrap();
        let (layout, vars) = (built.layout, &built.problem.variables);
        let last = layout.num_samples - 1;

        for j in 0..State::DIM {
            assert!(vars[layout.x(0, j)].is_fixed());
        }
        assert!(vars[layout.x(last, 1)].is_fixed());
        assert!(vars[layout.x(last, 2)].is_fixed());
        assert!(!vars[layout.x(last, 5)].is_fixed());

        // Lateral offset within the track less the vehicle's half width
        let n = vars[layout.x(3, 1)];
        assert!((n.upper * built.scale.x[1] - 4.0).abs() < 1e-12);
        assert!((n.lower * built.scale.x[1] + 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_closed_track_has_closing_interval() {
        let track = circle_track(50.0, 5.0, 2.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();
        let traj = constant_speed(&track, 15.0);

        let built = ProblemBuilder::new(&track, &model, &params)
            .build(&traj, WarmStart::FromTrajectory)
            .unwrap();

        assert!(built.layout.closed);
        assert_eq!(built.layout.num_intervals, built.layout.num_samples);
        assert!(!built.problem.variables[built.layout.x(0, 1)].is_fixed());
        assert!(built.problem.validate().is_ok());
    }

    #[test]
    fn test_warm_start_from_arrays() {
        let track = straight_track(10.0, 1.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();
        let traj = constant_speed(&track, 10.0);
        let builder = ProblemBuilder::new(&track, &model, &params);

        let mut x = Array2::zeros((11, State::DIM));
        x.column_mut(5).fill(12.0);
        let u = Array2::zeros((10, Control::DIM));
        let t = Array1::from_elem(10, 0.1);

        let built = builder
            .build(
                &traj,
                WarmStart::Arrays {
                    x: x.clone(),
                    u: u.clone(),
                    t: t.clone(),
                },
            )
            .unwrap();
        let v = built.problem.variables[built.layout.x(4, 5)].initial;
        assert!((v * built.scale.x[5] - 12.0).abs() < 1e-12);

        let bad = builder.build(
            &traj,
            WarmStart::Arrays {
                x: Array2::zeros((10, State::DIM)),
                u,
                t,
            },
        );
        assert!(matches!(bad, Err(BuildError::WarmStartShape { what: "x0", .. })));
    }

    #[test]
    fn test_off_track_boundary_values_are_pinned_inside() {
        let track = straight_track(10.0, 1.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();
        let traj = constant_speed(&track, 10.0);

        let mut x = Array2::zeros((11, State::DIM));
        x.column_mut(1).fill(5.0);
        x.column_mut(5).fill(10.0);
        x[[0, 1]] = 6.0;
        x[[10, 1]] = -7.0;
        x[[0, 2]] = 3.0;
        x[[0, 5]] = 0.0;

        let built = ProblemBuilder::new(&track, &model, &params)
            .build(
                &traj,
                WarmStart::Arrays {
                    x,
                    u: Array2::zeros((10, Control::DIM)),
                    t: Array1::from_elem(10, 0.1),
                },
            )
            .unwrap();
        let (layout, scale, vars) = (built.layout, built.scale, &built.problem.variables);

        let start = vars[layout.x(0, 1)];
        assert!(start.is_fixed());
        assert!((start.initial * scale.x[1] - 4.0).abs() < 1e-12);

        let end = vars[layout.x(10, 1)];
        assert!(end.is_fixed());
        assert!((end.initial * scale.x[1] + 4.0).abs() < 1e-12);

        assert!((vars[layout.x(0, 2)].initial - 1.0).abs() < 1e-12);
        let v = vars[layout.x(0, 5)].initial * scale.x[5];
        assert!((v - model.params().min_speed_mps).abs() < 1e-12);

        // Free samples keep the warm start, the solver moves them inside
        let inner = vars[layout.x(5, 1)];
        assert!(!inner.is_fixed());
        assert!((inner.initial * scale.x[1] - 5.0).abs() < 1e-12);
        assert!(built.problem.validate().is_ok());
    }

    #[test]
    fn test_trajectory_length_mismatch() {
        let track = straight_track(10.0, 1.0);
        let model = DoubleTrack::new(double_track_params()).unwrap();
        let params = OptimizerParams::default();

        let res = ProblemBuilder::new(&track, &model, &params)
            .build(&Trajectory::zeros(5), WarmStart::FromTrajectory);
        assert!(matches!(res, Err(BuildError::TrajectoryLength { expected: 11, found: 5 })));
    }
}
