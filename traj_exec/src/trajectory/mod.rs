//! # Trajectory
//!
//! A trajectory is an ordered sequence of samples, each one a fixed record of
//! the fields listed in [`Column`]. Every trajectory in the pipeline (the
//! track centerline, the simulated warm start and the optimised result) uses
//! the same layout so that they can be exported and compared column by
//! column.
//!
//! Each stage owns the columns it writes:
//!
//! - `RaceTrack` writes X, Y, YAW, CURVATURE and BANK of the initial
//!   trajectory and the boundary columns of any trajectory,
//! - the simulator writes SPEED, LON_ACC, LAT_ACC and TIME,
//! - the reconstructor rewrites everything except Z and BANK after a solve,
//! - [`Trajectory::fill_distance`] writes DISTANCE.
//!
//! Stages never share a trajectory, they take a clone of their input.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod column;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::ops::Range;
use std::path::Path;
use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use serde::Serialize;

// Internal
pub use column::Column;
use util::archive::{self, ArchiveError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Mean speeds below this are floored when timing an interval.
///
/// Units: meters/second
const MIN_TIMING_SPEED_MPS: f64 = 0.1;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A sequence of trajectory samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    points: Array2<f64>,
}

/// A single trajectory sample with named fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    pub x_m: f64,
    pub y_m: f64,
    pub z_m: f64,
    pub yaw_rad: f64,
    pub speed_ms: f64,
    pub curvature_m: f64,
    pub distance_m: f64,
    pub left_bound_x_m: f64,
    pub left_bound_y_m: f64,
    pub right_bound_x_m: f64,
    pub right_bound_y_m: f64,
    pub bank_rad: f64,
    pub lon_acc_mss: f64,
    pub lat_acc_mss: f64,
    pub time_s: f64,
    pub yaw_rate_rads: f64,
    pub vy_ms: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TrajectoryError {
    #[error("Expected at most {max} columns in a trajectory array, found {found}")]
    TooManyColumns { max: usize, found: usize },

    #[error("Row range {0:?} is outside of a trajectory of length {1}")]
    RangeOutOfBounds(Range<usize>, usize),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Trajectory {
    /// Create a trajectory of `len` samples with every field zeroed.
    pub fn zeros(len: usize) -> Self {
        Self {
            points: Array2::zeros((len, Column::COUNT)),
        }
    }

    /// Build a trajectory from a bulk array.
    ///
    /// Arrays with fewer columns than the full layout (truncated
    /// track-trajectory files) are zero extended.
    pub fn from_array(array: Array2<f64>) -> Result<Self, TrajectoryError> {
        let (rows, cols) = array.dim();

        if cols > Column::COUNT {
            return Err(TrajectoryError::TooManyColumns {
                max: Column::COUNT,
                found: cols,
            });
        }

        if cols == Column::COUNT {
            return Ok(Self { points: array });
        }

        let mut points = Array2::zeros((rows, Column::COUNT));
        points.slice_mut(s![.., ..cols]).assign(&array);

        Ok(Self { points })
    }

    /// Build a trajectory from a sequence of x/y positions.
    ///
    /// Only X, Y and DISTANCE are filled.
    pub fn from_positions(positions: &[(f64, f64)]) -> Self {
        let mut traj = Self::zeros(positions.len());

        for (i, (x, y)) in positions.iter().enumerate() {
            traj.points[[i, Column::X.index()]] = *x;
            traj.points[[i, Column::Y.index()]] = *y;
        }
        traj.fill_distance();

        traj
    }

    /// Load a track-trajectory file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrajectoryError> {
        Self::from_array(archive::load_array(path)?)
    }

    /// Save the trajectory to a track-trajectory file, keeping the columns up
    /// to and including `last`.
    pub fn save_through<P: AsRef<Path>>(&self, path: P, last: Column) -> Result<(), TrajectoryError> {
        archive::save_array(path, self.through(last).view())?;
        Ok(())
    }

    /// Number of samples in the trajectory.
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bulk numeric view of the trajectory, one row per sample.
    pub fn points(&self) -> ArrayView2<f64> {
        self.points.view()
    }

    /// Mutable bulk numeric view of the trajectory.
    pub fn points_mut(&mut self) -> ArrayViewMut2<f64> {
        self.points.view_mut()
    }

    /// View of a single column.
    pub fn column(&self, column: Column) -> ArrayView1<f64> {
        self.points.column(column.index())
    }

    /// Mutable view of a single column.
    pub fn column_mut(&mut self, column: Column) -> ArrayViewMut1<f64> {
        self.points.column_mut(column.index())
    }

    /// Get the value of a field of a sample.
    ///
    /// # Panics
    /// - If `row` is out of bounds.
    pub fn get(&self, row: usize, column: Column) -> f64 {
        self.points[[row, column.index()]]
    }

    /// Set the value of a field of a sample.
    ///
    /// # Panics
    /// - If `row` is out of bounds.
    pub fn set(&mut self, row: usize, column: Column, value: f64) {
        self.points[[row, column.index()]] = value;
    }

    /// Get a sample as a record with named fields.
    ///
    /// # Panics
    /// - If `row` is out of bounds.
    pub fn point(&self, row: usize) -> TrajectoryPoint {
        let r = self.points.row(row);
        TrajectoryPoint {
            x_m: r[Column::X.index()],
            y_m: r[Column::Y.index()],
            z_m: r[Column::Z.index()],
            yaw_rad: r[Column::Yaw.index()],
            speed_ms: r[Column::Speed.index()],
            curvature_m: r[Column::Curvature.index()],
            distance_m: r[Column::Distance.index()],
            left_bound_x_m: r[Column::LeftBoundX.index()],
            left_bound_y_m: r[Column::LeftBoundY.index()],
            right_bound_x_m: r[Column::RightBoundX.index()],
            right_bound_y_m: r[Column::RightBoundY.index()],
            bank_rad: r[Column::Bank.index()],
            lon_acc_mss: r[Column::LonAcc.index()],
            lat_acc_mss: r[Column::LatAcc.index()],
            time_s: r[Column::Time.index()],
            yaw_rate_rads: r[Column::YawRate.index()],
            vy_ms: r[Column::Vy.index()],
        }
    }

    /// Copy a range of samples into a new, independent trajectory.
    pub fn slice(&self, rows: Range<usize>) -> Result<Self, TrajectoryError> {
        if rows.start > rows.end || rows.end > self.len() {
            return Err(TrajectoryError::RangeOutOfBounds(rows, self.len()));
        }

        Ok(Self {
            points: self.points.slice(s![rows, ..]).to_owned(),
        })
    }

    /// Copy of the bulk array truncated after the `last` column.
    pub fn through(&self, last: Column) -> Array2<f64> {
        self.points.slice(s![.., ..=last.index()]).to_owned()
    }

    /// Recompute the cumulative distance column from the x/y positions.
    ///
    /// The first sample has a distance of zero.
    pub fn fill_distance(&mut self) {
        let mut dist = 0.0;

        for i in 0..self.len() {
            if i > 0 {
                dist += self.segment_length(i - 1, i);
            }
            self.points[[i, Column::Distance.index()]] = dist;
        }
    }

    /// Recompute the time column from the distance and speed columns.
    ///
    /// The time between two samples is the distance between them over their
    /// mean speed, floored at a small positive speed so that samples at rest
    /// keep the time finite.
    pub fn fill_time_from_speed(&mut self) {
        let mut time = 0.0;

        for i in 0..self.len() {
            if i > 0 {
                let ds = self.get(i, Column::Distance) - self.get(i - 1, Column::Distance);
                time += ds / self.mean_speed(i - 1, i);
            }
            self.points[[i, Column::Time.index()]] = time;
        }
    }

    /// Length of the interval closing a lap, from the last sample back to the
    /// first.
    pub fn closing_length(&self) -> f64 {
        match self.len() {
            0 | 1 => 0.0,
            n => self.segment_length(n - 1, 0),
        }
    }

    /// Total traversal time of the trajectory.
    ///
    /// For a closed trajectory the time to travel from the last sample back
    /// to the first is included, at the mean of their speeds.
    pub fn lap_time(&self, closed: bool) -> f64 {
        let n = self.len();
        if n == 0 {
            return 0.0;
        }

        let mut time = self.get(n - 1, Column::Time) - self.get(0, Column::Time);

        if closed && n > 1 {
            time += self.closing_length() / self.mean_speed(n - 1, 0);
        }

        time
    }

    /// Mean speed of two samples, floored for timing.
    fn mean_speed(&self, from: usize, to: usize) -> f64 {
        (0.5 * (self.get(from, Column::Speed) + self.get(to, Column::Speed))).max(MIN_TIMING_SPEED_MPS)
    }

    /// Straight-line distance between two samples.
    fn segment_length(&self, from: usize, to: usize) -> f64 {
        let dx = self.get(to, Column::X) - self.get(from, Column::X);
        let dy = self.get(to, Column::Y) - self.get(from, Column::Y);
        dx.hypot(dy)
    }
}
