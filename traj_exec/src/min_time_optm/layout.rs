//! Decision variable layout and scaling
//!
//! The decision vector holds, in order:
//!
//! - `X`, the state at every sample (N x 6),
//! - `U`, the control over every interval (K x 4),
//! - `T`, the duration of every interval (K).
//!
//! K is N on a closed track, where the last interval closes the lap, and
//! N - 1 on an open track.
//!
//! Every variable is scaled by a fixed factor so that the solver works with
//! values of order one. The first state is the arc-length progress relative
//! to the sample's abscissa, so the physical arc-length of sample `k` is
//! `abscissa[k] + scale.x[0] * X[k, 0]`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::race_track::RaceTrack;
use crate::vehicle::{Control, DoubleTrack, State};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Indexing of the decision vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VariableLayout {
    /// Number of samples.
    pub num_samples: usize,

    /// Number of intervals.
    pub num_intervals: usize,

    pub closed: bool,
}

/// Fixed scale factors of the decision variables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleFactors {
    pub x: [f64; State::DIM],
    pub u: [f64; Control::DIM],
    pub t: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VariableLayout {
    pub fn new(num_samples: usize, closed: bool) -> Self {
        let num_intervals = if closed {
            num_samples
        } else {
            num_samples.saturating_sub(1)
        };

        Self {
            num_samples,
            num_intervals,
            closed,
        }
    }

    /// Index of state `j` of sample `k`.
    pub fn x(&self, k: usize, j: usize) -> usize {
        k * State::DIM + j
    }

    /// Index of control `j` of interval `k`.
    pub fn u(&self, k: usize, j: usize) -> usize {
        self.num_samples * State::DIM + k * Control::DIM + j
    }

    /// Index of the duration of interval `k`.
    pub fn t(&self, k: usize) -> usize {
        self.num_samples * State::DIM + self.num_intervals * Control::DIM + k
    }

    pub fn num_variables(&self) -> usize {
        self.num_samples * State::DIM + self.num_intervals * (Control::DIM + 1)
    }

    /// Sample at the end of interval `k`.
    pub fn next_sample(&self, k: usize) -> usize {
        (k + 1) % self.num_samples
    }

    /// Copy the states out of a decision vector, one row per sample.
    pub fn states(&self, z: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((self.num_samples, State::DIM), |(k, j)| z[self.x(k, j)])
    }

    /// Copy the controls out of a decision vector, one row per interval.
    pub fn controls(&self, z: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((self.num_intervals, Control::DIM), |(k, j)| z[self.u(k, j)])
    }

    /// Copy the interval durations out of a decision vector.
    pub fn times(&self, z: &[f64]) -> Array1<f64> {
        Array1::from_shape_fn(self.num_intervals, |k| z[self.t(k)])
    }
}

impl ScaleFactors {
    /// Scale factors from the track and the vehicle's limits.
    ///
    /// - arc-length: the sample interval,
    /// - lateral offset: the widest half width of the track,
    /// - heading deviation, yaw rate, slip and speed: their limits,
    /// - drive force, brake force, steering: their limits,
    /// - load transfer: the vehicle's weight,
    /// - time: the time to cover one interval at the maximum speed.
    pub fn new(track: &RaceTrack, model: &DoubleTrack) -> Self {
        let p = model.params();
        let half_width = track
            .left_offsets()
            .iter()
            .chain(track.right_offsets().iter())
            .cloned()
            .fold(0.0, f64::max)
            .max(1.0);

        Self {
            x: [
                track.interval(),
                half_width,
                p.max_heading_dev_rad,
                p.max_yaw_rate_rads,
                p.max_slip_rad,
                p.max_speed_mps,
            ],
            u: [
                p.max_drive_force_n,
                p.max_brake_force_n,
                p.max_steer_rad,
                model.weight(),
            ],
            t: track.interval() / p.max_speed_mps,
        }
    }

    pub fn scale_x(&self, x: &[f64; State::DIM]) -> [f64; State::DIM] {
        let mut out = [0.0; State::DIM];
        for j in 0..State::DIM {
            out[j] = x[j] / self.x[j];
        }
        out
    }

    pub fn unscale_x(&self, x: &[f64; State::DIM]) -> [f64; State::DIM] {
        let mut out = [0.0; State::DIM];
        for j in 0..State::DIM {
            out[j] = x[j] * self.x[j];
        }
        out
    }

    pub fn scale_u(&self, u: &[f64; Control::DIM]) -> [f64; Control::DIM] {
        let mut out = [0.0; Control::DIM];
        for j in 0..Control::DIM {
            out[j] = u[j] / self.u[j];
        }
        out
    }

    pub fn unscale_u(&self, u: &[f64; Control::DIM]) -> [f64; Control::DIM] {
        let mut out = [0.0; Control::DIM];
        for j in 0..Control::DIM {
            out[j] = u[j] * self.u[j];
        }
        out
    }

    pub fn scale_t(&self, t: f64) -> f64 {
        t / self.t
    }

    pub fn unscale_t(&self, t: f64) -> f64 {
        t * self.t
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::race_track::test::straight_track;
    use crate::vehicle::test::double_track_params as params;
    use std::collections::HashSet;

    #[test]
    fn test_layout_indices_are_unique() {
        for closed in [false, true].iter() {
            let layout = VariableLayout::new(7, *closed);
            let mut seen = HashSet::new();

            for k in 0..layout.num_samples {
                for j in 0..State::DIM {
                    assert!(seen.insert(layout.x(k, j)));
                }
            }
            for k in 0..layout.num_intervals {
                for j in 0..Control::DIM {
                    assert!(seen.insert(layout.u(k, j)));
                }
                assert!(seen.insert(layout.t(k)));
            }

            assert_eq!(seen.len(), layout.num_variables());
            assert!(seen.iter().all(|&i| i < layout.num_variables()));
        }

        assert_eq!(VariableLayout::new(7, true).num_intervals, 7);
        assert_eq!(VariableLayout::new(7, false).num_intervals, 6);
        assert_eq!(VariableLayout::new(7, true).next_sample(6), 0);
    }

    #[test]
    fn test_scale_round_trip() {
        let track = straight_track(50.0, 2.0);
        let model = DoubleTrack::new(params()).unwrap();
        let scale = ScaleFactors::new(&track, &model);

        assert_eq!(scale.x[0], 2.0);
        assert_eq!(scale.x[1], 5.0);
        assert!((scale.t - 2.0 / 60.0).abs() < 1e-15);

        let x = [0.3, -2.0, 0.1, 0.4, -0.05, 33.0];
        let u = [2500.0, -800.0, 0.02, 1500.0];

        let x_rt = scale.unscale_x(&scale.scale_x(&x));
        let u_rt = scale.unscale_u(&scale.scale_u(&u));
        for j in 0..State::DIM {
            assert!((x_rt[j] - x[j]).abs() <= 1e-12 * x[j].abs().max(1.0));
        }
        for j in 0..Control::DIM {
            assert!((u_rt[j] - u[j]).abs() <= 1e-12 * u[j].abs().max(1.0));
        }
        assert!((scale.unscale_t(scale.scale_t(0.25)) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_extract_arrays() {
        let layout = VariableLayout::new(3, false);
        let z: Vec<f64> = (0..layout.num_variables()).map(|i| i as f64).collect();

        let x = layout.states(&z);
        let u = layout.controls(&z);
        let t = layout.times(&z);

        assert_eq!(x.shape(), &[3, 6]);
        assert_eq!(x[[2, 5]], 17.0);
        assert_eq!(u.shape(), &[2, 4]);
        assert_eq!(u[[0, 0]], 18.0);
        assert_eq!(t.len(), 2);
        assert_eq!(t[1], 27.0);
    }
}
