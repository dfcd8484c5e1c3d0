//! Reconstruction of a trajectory from the solution of the nonlinear program

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use util::maths::wrap_to_pi;

use super::layout::{ScaleFactors, VariableLayout};
use crate::race_track::{RaceTrack, TrackError};
use crate::trajectory::{Column, Trajectory};
use crate::vehicle::State;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Speeds below this are floored when computing the path curvature.
///
/// Units: meters/second
const MIN_CURVATURE_SPEED_MPS: f64 = 0.1;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An optimised trajectory with the physical decision variables.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub trajectory: Trajectory,

    /// States, one row per sample, with the absolute arc-length.
    pub x: Array2<f64>,

    /// Controls, one row per interval.
    pub u: Array2<f64>,

    /// Interval durations.
    pub t: Array1<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the yaw of the optimised trajectory is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YawSource {
    /// Centerline heading plus the heading deviation.
    Model,

    /// Direction from the previous position, wrapping around the trajectory.
    FiniteDifference,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconstructError {
    #[error("Non-finite {what} in the solution at index {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error("The template has {found} samples but the solution has {expected}")]
    TemplateLength { expected: usize, found: usize },

    #[error(transparent)]
    Track(#[from] TrackError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the optimised trajectory from a scaled solution vector.
///
/// Columns not computed from the solution (altitude, bank) are copied from
/// `template`.
pub fn reconstruct(
    raw: &[f64],
    layout: &VariableLayout,
    scale: &ScaleFactors,
    track: &RaceTrack,
    template: &Trajectory,
    yaw_source: YawSource,
) -> Result<Reconstruction, ReconstructError> {
    let n = layout.num_samples;
    if template.len() != n {
        return Err(ReconstructError::TemplateLength {
            expected: n,
            found: template.len(),
        });
    }

    // ---- UNSCALE ----

    let mut x = layout.states(raw);
    for (k, mut row) in x.outer_iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v *= scale.x[j];
        }
        row[0] += track.abscissa()[k];
    }

    let mut u = layout.controls(raw);
    for mut row in u.outer_iter_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v *= scale.u[j];
        }
    }

    let t = layout.times(raw).mapv(|v| scale.unscale_t(v));

    check_finite("state", x.iter())?;
    check_finite("control", u.iter())?;
    check_finite("interval time", t.iter())?;

    // ---- POSES ----

    let s: Vec<f64> = x.column(0).to_vec();
    let offset: Vec<f64> = x.column(1).to_vec();
    let xi: Vec<f64> = x.column(2).to_vec();
    let poses = track.frenet_to_global(&s, &offset, &xi)?;

    let mut traj = template.clone();
    for (k, pose) in poses.iter().enumerate() {
        traj.set(k, Column::X, pose.x_m);
        traj.set(k, Column::Y, pose.y_m);
    }

    match yaw_source {
        YawSource::Model => {
            for (k, pose) in poses.iter().enumerate() {
                traj.set(k, Column::Yaw, pose.yaw_rad);
            }
        }
        YawSource::FiniteDifference => {
            for k in 0..n {
                // The first sample of an open track looks forward instead
                let (from, to) = match k {
                    0 if layout.closed => (n - 1, 0),
                    0 => (0, 1.min(n - 1)),
                    _ => (k - 1, k),
                };
                let dx = poses[to].x_m - poses[from].x_m;
                let dy = poses[to].y_m - poses[from].y_m;
                traj.set(k, Column::Yaw, wrap_to_pi(dy.atan2(dx)));
            }
        }
    }

    // ---- KINEMATICS ----

    for k in 0..n {
        let mut row = [0.0; State::DIM];
        row.iter_mut().zip(x.row(k).iter()).for_each(|(r, v)| *r = *v);
        let state = State::from_array(row);
        let v = state.speed_mps;

        traj.set(k, Column::Speed, v * state.slip_rad.cos());
        traj.set(k, Column::Vy, v * state.slip_rad.sin());
        traj.set(k, Column::YawRate, state.yaw_rate_rads);
        traj.set(k, Column::Curvature, state.yaw_rate_rads / v.max(MIN_CURVATURE_SPEED_MPS));
        traj.set(k, Column::LatAcc, v * state.yaw_rate_rads);
    }

    // ---- TIME AND ACCELERATION ----

    let mut time = 0.0;
    for k in 0..n {
        if k > 0 {
            time += t[k - 1];
        }
        traj.set(k, Column::Time, time);
    }

    for k in 0..n {
        let acc = if k < layout.num_intervals {
            let next = layout.next_sample(k);
            (traj.get(next, Column::Speed) - traj.get(k, Column::Speed)) / t[k]
        } else if k > 0 {
            traj.get(k - 1, Column::LonAcc)
        } else {
            0.0
        };
        traj.set(k, Column::LonAcc, acc);
    }

    track.fill_trajectory_boundaries(&mut traj)?;
    traj.fill_distance();

    Ok(Reconstruction {
        trajectory: traj,
        x,
        u,
        t,
    })
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_finite<'a, I>(what: &'static str, values: I) -> Result<(), ReconstructError>
where
    I: Iterator<Item = &'a f64>,
{
    match values.enumerate().find(|(_, v)| !v.is_finite()) {
        Some((index, _)) => Err(ReconstructError::NonFinite { what, index }),
        None => Ok(()),
    }
}
