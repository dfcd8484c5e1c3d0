//! # Race track
//!
//! The race track is the corridor the vehicle must stay within. It is built
//! from three polylines (left boundary, right boundary and centerline) which
//! are resampled onto a common, uniform arc-length grid along the
//! centerline.
//!
//! The track defines the Frenet frame used by the optimiser. A point is
//! described by its arc-length `s` along the centerline (the abscissa) and
//! its signed lateral offset `n`, positive to the left of the direction of
//! travel. Orientations are described by the heading deviation `xi` from the
//! local centerline tangent. The track is the only place where Frenet and
//! global coordinates are converted.
//!
//! Between grid samples the centerline position is interpolated linearly and
//! the tangent heading is interpolated along the shortest angular path, so
//! the Frenet frame is continuous along the whole track.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod polyline;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

// Internal
use crate::trajectory::{Column, Trajectory};
use util::maths::{rem_euclid, unwrap_angles, wrap_to_pi};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A centerline whose end point is within this many of its longest segments
/// of the start point is considered to be a closed loop.
const CLOSURE_SEGMENT_FACTOR: f64 = 1.5;

/// Points closer than this are treated as duplicates.
///
/// Units: meters
const DUPLICATE_POINT_TOL_M: f64 = 1e-9;

/// Maximum number of refinement steps when projecting onto the centerline.
const MAX_PROJECTION_ITERS: usize = 20;

/// Arc-length tolerance on the projection refinement.
///
/// Units: meters
const PROJECTION_TOL_M: f64 = 1e-10;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The track corridor and its Frenet geometry.
///
/// Immutable once constructed, and safe to share between threads.
#[derive(Debug, Clone)]
pub struct RaceTrack {
    name: String,

    topology: Topology,

    /// Spacing of the arc-length grid.
    ///
    /// Units: meters
    interval: f64,

    /// Length of the arc-length domain. For a closed track this includes the
    /// interval closing the loop.
    ///
    /// Units: meters
    length: f64,

    /// Arc-length of each sample.
    abscissa: Vec<f64>,

    center: Vec<Vector2<f64>>,
    left: Vec<Vector2<f64>>,
    right: Vec<Vector2<f64>>,

    /// Unwrapped tangent heading of the centerline at each sample.
    heading: Vec<f64>,

    /// Centerline curvature at each sample, positive turning left.
    curvature: Vec<f64>,

    /// Distance from the centerline to the left boundary along the normal.
    left_offset: Vec<f64>,

    /// Distance from the centerline to the right boundary along the normal.
    right_offset: Vec<f64>,

    /// Bank angle at each sample.
    bank: Vec<f64>,
}

/// A pose in the global frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalPose {
    pub x_m: f64,
    pub y_m: f64,
    pub yaw_rad: f64,
}

/// A position in the Frenet frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrenetPoint {
    /// Arc-length along the centerline.
    pub s_m: f64,

    /// Lateral offset from the centerline, positive to the left.
    pub n_m: f64,
}

/// Location of an arc-length on the sample grid.
#[derive(Debug, Clone, Copy)]
struct GridLocation {
    from: usize,
    to: usize,
    fraction: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Whether the track is a closed loop or an open corridor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    Open,
    Closed,
}

/// Errors raised by the race track.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("The {curve} needs at least 2 distinct points, found {found}")]
    TooFewPoints { curve: &'static str, found: usize },

    #[error("The sample interval must be finite and positive, found {0}")]
    InvalidInterval(f64),

    #[error("The direction sign must be non-zero, found {0}")]
    InvalidDirection(f64),

    #[error("The centerline has zero length")]
    ZeroLength,

    #[error("The centerline ({length_m} m) is shorter than one sample interval ({interval_m} m)")]
    TooShort { length_m: f64, interval_m: f64 },

    #[error("Arc-length {s_m} m is outside of the track domain [0, {max_m}] m")]
    OutOfDomain { s_m: f64, max_m: f64 },

    #[error("Frenet inputs have mismatched lengths (s: {s}, n: {n}, xi: {xi})")]
    LengthMismatch { s: usize, n: usize, xi: usize },

    #[error("The bank angle input has {found} values but the centerline has {expected} points")]
    BankLengthMismatch { found: usize, expected: usize },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RaceTrack {
    /// Build a new track from its boundaries and centerline.
    ///
    /// - `direction` is the sign of the direction of travel along the
    ///   polylines. A negative sign drives the polylines backwards, in which
    ///   case the left and right boundaries swap roles.
    /// - `interval` is the arc-length spacing of the sample grid.
    ///
    /// The topology is detected from the centerline: if its end point is
    /// close to its start point (relative to the polyline's segment lengths)
    /// the track is a closed loop. Use [`RaceTrack::with_topology`] to force
    /// it.
    pub fn new(
        name: &str,
        left: &[Vector2<f64>],
        right: &[Vector2<f64>],
        centerline: &[Vector2<f64>],
        direction: f64,
        interval: f64,
    ) -> Result<Self, TrackError> {
        Self::build(name, left, right, centerline, None, direction, interval, None)
    }

    /// Build a new track with an explicit topology.
    pub fn with_topology(
        name: &str,
        left: &[Vector2<f64>],
        right: &[Vector2<f64>],
        centerline: &[Vector2<f64>],
        direction: f64,
        interval: f64,
        topology: Topology,
    ) -> Result<Self, TrackError> {
        Self::build(name, left, right, centerline, None, direction, interval, Some(topology))
    }

    /// Build a new track from loaded track-trajectory files.
    ///
    /// Only the X and Y columns of the boundaries are used. The BANK column of
    /// the centerline is interpolated onto the sample grid.
    pub fn from_trajectories(
        name: &str,
        left: &Trajectory,
        right: &Trajectory,
        centerline: &Trajectory,
        direction: f64,
        interval: f64,
        topology: Option<Topology>,
    ) -> Result<Self, TrackError> {
        let bank: Vec<f64> = centerline.column(Column::Bank).to_vec();

        Self::build(
            name,
            &positions(left),
            &positions(right),
            &positions(centerline),
            Some(&bank),
            direction,
            interval,
            topology,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &str,
        left: &[Vector2<f64>],
        right: &[Vector2<f64>],
        centerline: &[Vector2<f64>],
        bank: Option<&[f64]>,
        direction: f64,
        interval: f64,
        topology: Option<Topology>,
    ) -> Result<Self, TrackError> {
        if !interval.is_finite() || interval <= 0.0 {
            return Err(TrackError::InvalidInterval(interval));
        }
        if !(direction.is_finite() && direction != 0.0) {
            return Err(TrackError::InvalidDirection(direction));
        }
        if let Some(b) = bank {
            if b.len() != centerline.len() {
                return Err(TrackError::BankLengthMismatch {
                    found: b.len(),
                    expected: centerline.len(),
                });
            }
        }

        // ---- ORIENT ----

        let mut center: Vec<Vector2<f64>> = centerline.to_vec();
        let mut bank_in: Vec<f64> = bank.map_or_else(|| vec![0.0; center.len()], |b| b.to_vec());
        let (mut left, mut right) = (left.to_vec(), right.to_vec());

        if direction < 0.0 {
            center.reverse();
            bank_in.reverse();
            left.reverse();
            right.reverse();
            std::mem::swap(&mut left, &mut right);
        }

        // Drop repeated points so that every segment has a direction
        let keep = polyline::dedup_indices(&center, DUPLICATE_POINT_TOL_M);
        let mut center: Vec<Vector2<f64>> = keep.iter().map(|&i| center[i]).collect();
        let mut bank_in: Vec<f64> = keep.iter().map(|&i| bank_in[i]).collect();

        if center.len() < 2 {
            return Err(TrackError::TooFewPoints { curve: "centerline", found: center.len() });
        }
        if left.len() < 2 {
            return Err(TrackError::TooFewPoints { curve: "left boundary", found: left.len() });
        }
        if right.len() < 2 {
            return Err(TrackError::TooFewPoints { curve: "right boundary", found: right.len() });
        }

        // ---- TOPOLOGY ----

        let start_end_gap = (center[center.len() - 1] - center[0]).norm();
        let topology = topology.unwrap_or_else(|| {
            let segments: Vec<f64> = center.windows(2).map(|w| (w[1] - w[0]).norm()).collect();
            let longest = segments.iter().cloned().fold(0.0, f64::max);
            let open_length: f64 = segments.iter().sum();

            // The gap must also be small compared to the whole polyline, so
            // that a coarse open polyline is not mistaken for a loop
            if center.len() > 2
                && start_end_gap <= CLOSURE_SEGMENT_FACTOR * longest
                && start_end_gap < 0.5 * open_length
            {
                Topology::Closed
            } else {
                Topology::Open
            }
        });
        let closed = topology == Topology::Closed;

        // A closed loop given with its start point repeated at the end
        if closed && start_end_gap <= DUPLICATE_POINT_TOL_M && center.len() > 2 {
            center.pop();
            bank_in.pop();
        }

        // ---- RESAMPLE ----

        let lengths = polyline::cumulative_lengths(&center, closed);
        let total = lengths.last().copied().unwrap_or(0.0);

        if total <= DUPLICATE_POINT_TOL_M {
            return Err(TrackError::ZeroLength);
        }

        let (num_samples, spacing) = if closed {
            // Adjust the spacing so that the grid closes exactly
            let m = ((total / interval).round() as usize).max(3);
            (m, total / m as f64)
        } else {
            let m = (total / interval + 1e-9).floor() as usize + 1;
            if m < 2 {
                return Err(TrackError::TooShort { length_m: total, interval_m: interval });
            }
            (m, interval)
        };

        let abscissa: Vec<f64> = (0..num_samples).map(|i| i as f64 * spacing).collect();
        let length = if closed {
            total
        } else {
            abscissa[num_samples - 1]
        };

        let center_rs = polyline::resample(&center, &lengths, closed, &abscissa);
        let bank_values: Vec<[f64; 1]> = bank_in.iter().map(|b| [*b]).collect();
        let bank_rs: Vec<f64> = polyline::resample_values(&bank_values, &lengths, closed, &abscissa)
            .into_iter()
            .map(|b| b[0])
            .collect();

        // ---- HEADING AND CURVATURE ----

        let heading = sample_headings(&center_rs, closed);
        let curvature = sample_curvatures(&heading, spacing, closed);

        // ---- BOUNDARIES ----

        let mut left_offset = Vec::with_capacity(num_samples);
        let mut right_offset = Vec::with_capacity(num_samples);
        let mut left_rs = Vec::with_capacity(num_samples);
        let mut right_rs = Vec::with_capacity(num_samples);

        for (i, c) in center_rs.iter().enumerate() {
            let normal = normal_of(heading[i]);

            // Both boundaries have at least 2 points so a projection exists
            let l = polyline::project(&left, closed, c).map_or(0.0, |p| (p.point - c).dot(&normal));
            let r = polyline::project(&right, closed, c).map_or(0.0, |p| -(p.point - c).dot(&normal));

            left_offset.push(l);
            right_offset.push(r);
            left_rs.push(c + normal * l);
            right_rs.push(c - normal * r);
        }

        debug!(
            "RaceTrack \"{}\": {:?}, {} samples at {:.4} m, length {:.3} m",
            name, topology, num_samples, spacing, length
        );

        Ok(Self {
            name: name.to_string(),
            topology,
            interval: spacing,
            length,
            abscissa,
            center: center_rs,
            left: left_rs,
            right: right_rs,
            heading,
            curvature,
            left_offset,
            right_offset,
            bank: bank_rs,
        })
    }

    // ---- ACCESSORS ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn is_closed(&self) -> bool {
        self.topology == Topology::Closed
    }

    /// Number of samples on the arc-length grid.
    pub fn len(&self) -> usize {
        self.abscissa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abscissa.is_empty()
    }

    /// Spacing of the arc-length grid in meters.
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Length of the arc-length domain in meters.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn abscissa(&self) -> &[f64] {
        &self.abscissa
    }

    pub fn centerline(&self) -> &[Vector2<f64>] {
        &self.center
    }

    pub fn left_boundary(&self) -> &[Vector2<f64>] {
        &self.left
    }

    pub fn right_boundary(&self) -> &[Vector2<f64>] {
        &self.right
    }

    /// Centerline curvature at each sample.
    pub fn curvature(&self) -> &[f64] {
        &self.curvature
    }

    /// Distance from the centerline to the left boundary at each sample.
    pub fn left_offsets(&self) -> &[f64] {
        &self.left_offset
    }

    /// Distance from the centerline to the right boundary at each sample.
    pub fn right_offsets(&self) -> &[f64] {
        &self.right_offset
    }

    pub fn bank(&self) -> &[f64] {
        &self.bank
    }

    /// Arc-length increment between sample `k` and the next sample, wrapping
    /// on a closed track.
    pub fn interval_length(&self, k: usize) -> f64 {
        let next = k + 1;
        if next < self.len() {
            self.abscissa[next] - self.abscissa[k]
        } else {
            self.length - self.abscissa[k]
        }
    }

    // ---- QUERIES ----

    /// Convert Frenet coordinates into global poses.
    ///
    /// The three slices are per-sample values of the arc-length, lateral
    /// offset and heading deviation and must have the same length.
    pub fn frenet_to_global(
        &self,
        s_m: &[f64],
        n_m: &[f64],
        xi_rad: &[f64],
    ) -> Result<Vec<GlobalPose>, TrackError> {
        if s_m.len() != n_m.len() || s_m.len() != xi_rad.len() {
            return Err(TrackError::LengthMismatch {
                s: s_m.len(),
                n: n_m.len(),
                xi: xi_rad.len(),
            });
        }

        s_m.iter()
            .zip(n_m.iter())
            .zip(xi_rad.iter())
            .map(|((s, n), xi)| self.frenet_to_global_single(*s, *n, *xi))
            .collect()
    }

    /// Convert a single Frenet coordinate into a global pose.
    pub fn frenet_to_global_single(
        &self,
        s_m: f64,
        n_m: f64,
        xi_rad: f64,
    ) -> Result<GlobalPose, TrackError> {
        let (center, heading) = self.frame_at(self.locate(s_m)?);
        let pos = center + normal_of(heading) * n_m;

        Ok(GlobalPose {
            x_m: pos.x,
            y_m: pos.y,
            yaw_rad: wrap_to_pi(heading + xi_rad),
        })
    }

    /// Project a global position into the Frenet frame.
    ///
    /// The projection is the arc-length at which the offset from the
    /// interpolated centerline is perpendicular to the interpolated tangent.
    pub fn global_to_frenet(&self, point: &Vector2<f64>) -> FrenetPoint {
        let closed = self.is_closed();

        // Initial guess from the closest chord of the sampled centerline. The
        // grid always has at least 2 samples so a projection exists.
        let mut s = match polyline::project(&self.center, closed, point) {
            Some(p) => self.abscissa[p.segment] + p.fraction * self.interval_length(p.segment),
            None => 0.0,
        };

        let mut offset = Vector2::zeros();
        let mut heading = 0.0;

        for _ in 0..MAX_PROJECTION_ITERS {
            let loc = match self.locate(s) {
                Ok(l) => l,
                Err(_) => break,
            };
            let (center, h) = self.frame_at(loc);
            offset = point - center;
            heading = h;

            let tangent = tangent_of(h);
            let err = offset.dot(&tangent);

            // Derivative of the tangential error along the segment
            let seg_len = self.interval_length(loc.from);
            let chord = (self.center[loc.to] - self.center[loc.from]) / seg_len;
            let dh_ds = wrap_to_pi(self.heading[loc.to] - self.heading[loc.from]) / seg_len;
            let d_err = chord.dot(&tangent) - dh_ds * offset.dot(&normal_of(h));

            let step = err / d_err.max(0.1);
            s += step;

            if !closed {
                s = s.max(0.0).min(self.length);
            }

            if step.abs() < PROJECTION_TOL_M {
                break;
            }
        }

        if let Ok(loc) = self.locate(s) {
            let (center, h) = self.frame_at(loc);
            offset = point - center;
            heading = h;
        }

        FrenetPoint {
            s_m: if closed { rem_euclid(s, self.length) } else { s },
            n_m: offset.dot(&normal_of(heading)),
        }
    }

    /// Centerline curvature at the given arc-length.
    pub fn curvature_at(&self, s_m: f64) -> Result<f64, TrackError> {
        let loc = self.locate(s_m)?;
        Ok(lerp(self.curvature[loc.from], self.curvature[loc.to], loc.fraction))
    }

    /// Tangent heading of the centerline at the given arc-length.
    pub fn heading_at(&self, s_m: f64) -> Result<f64, TrackError> {
        let (_, h) = self.frame_at(self.locate(s_m)?);
        Ok(wrap_to_pi(h))
    }

    /// Left and right boundary distances from the centerline at the given
    /// arc-length.
    pub fn offsets_at(&self, s_m: f64) -> Result<(f64, f64), TrackError> {
        let loc = self.locate(s_m)?;
        Ok((
            lerp(self.left_offset[loc.from], self.left_offset[loc.to], loc.fraction),
            lerp(self.right_offset[loc.from], self.right_offset[loc.to], loc.fraction),
        ))
    }

    /// Global positions of the left and right boundaries at the given
    /// arc-length.
    pub fn boundaries_at(&self, s_m: f64) -> Result<(Vector2<f64>, Vector2<f64>), TrackError> {
        let loc = self.locate(s_m)?;
        let (center, heading) = self.frame_at(loc);
        let normal = normal_of(heading);
        let l = lerp(self.left_offset[loc.from], self.left_offset[loc.to], loc.fraction);
        let r = lerp(self.right_offset[loc.from], self.right_offset[loc.to], loc.fraction);

        Ok((center + normal * l, center - normal * r))
    }

    /// Write the boundary columns of a trajectory.
    ///
    /// Each sample's position is projected onto the track and the global
    /// coordinates of the boundaries at that arc-length are written into the
    /// sample. The result depends only on the sample positions, so calling
    /// this more than once gives the same boundary columns.
    pub fn fill_trajectory_boundaries(&self, trajectory: &mut Trajectory) -> Result<(), TrackError> {
        for i in 0..trajectory.len() {
            let point = Vector2::new(trajectory.get(i, Column::X), trajectory.get(i, Column::Y));
            let frenet = self.global_to_frenet(&point);
            let (left, right) = self.boundaries_at(frenet.s_m)?;

            trajectory.set(i, Column::LeftBoundX, left.x);
            trajectory.set(i, Column::LeftBoundY, left.y);
            trajectory.set(i, Column::RightBoundX, right.x);
            trajectory.set(i, Column::RightBoundY, right.y);
        }

        Ok(())
    }

    /// Trajectory following the centerline at each grid sample.
    ///
    /// Position, yaw, curvature, bank, distance and boundary columns are
    /// filled, all other columns are zero.
    pub fn center_trajectory(&self) -> Trajectory {
        let mut traj = Trajectory::zeros(self.len());

        for i in 0..self.len() {
            traj.set(i, Column::X, self.center[i].x);
            traj.set(i, Column::Y, self.center[i].y);
            traj.set(i, Column::Yaw, wrap_to_pi(self.heading[i]));
            traj.set(i, Column::Curvature, self.curvature[i]);
            traj.set(i, Column::Bank, self.bank[i]);
            traj.set(i, Column::LeftBoundX, self.left[i].x);
            traj.set(i, Column::LeftBoundY, self.left[i].y);
            traj.set(i, Column::RightBoundX, self.right[i].x);
            traj.set(i, Column::RightBoundY, self.right[i].y);
        }
        traj.fill_distance();

        traj
    }

    // ---- PRIVATE ----

    /// Find the grid samples bracketing an arc-length.
    fn locate(&self, s_m: f64) -> Result<GridLocation, TrackError> {
        let out_of_domain = TrackError::OutOfDomain { s_m, max_m: self.length };

        if !s_m.is_finite() {
            return Err(out_of_domain);
        }

        let m = self.len();

        match self.topology {
            Topology::Closed => {
                let s = rem_euclid(s_m, self.length);
                let from = ((s / self.interval).floor() as usize).min(m - 1);
                let to = (from + 1) % m;
                let fraction = ((s - self.abscissa[from]) / self.interval).max(0.0).min(1.0);

                Ok(GridLocation { from, to, fraction })
            }
            Topology::Open => {
                let tol = 1e-9 * self.length.max(1.0);
                if s_m < -tol || s_m > self.length + tol {
                    return Err(out_of_domain);
                }

                let s = s_m.max(0.0).min(self.length);
                let from = ((s / self.interval).floor() as usize).min(m - 2);
                let fraction = ((s - self.abscissa[from]) / self.interval).max(0.0).min(1.0);

                Ok(GridLocation { from, to: from + 1, fraction })
            }
        }
    }

    /// Interpolated centerline position and tangent heading.
    fn frame_at(&self, loc: GridLocation) -> (Vector2<f64>, f64) {
        let center = self.center[loc.from].lerp(&self.center[loc.to], loc.fraction);
        let dh = wrap_to_pi(self.heading[loc.to] - self.heading[loc.from]);

        (center, self.heading[loc.from] + loc.fraction * dh)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn positions(traj: &Trajectory) -> Vec<Vector2<f64>> {
    traj.column(Column::X)
        .iter()
        .zip(traj.column(Column::Y).iter())
        .map(|(x, y)| Vector2::new(*x, *y))
        .collect()
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

fn tangent_of(heading: f64) -> Vector2<f64> {
    Vector2::new(heading.cos(), heading.sin())
}

/// Unit normal pointing to the left of the heading.
fn normal_of(heading: f64) -> Vector2<f64> {
    Vector2::new(-heading.sin(), heading.cos())
}

/// Tangent headings from central differences of the sample positions.
fn sample_headings(points: &[Vector2<f64>], closed: bool) -> Vec<f64> {
    let m = points.len();
    let mut heading: Vec<f64> = (0..m)
        .map(|i| {
            let (prev, next) = match (closed, i) {
                (true, _) => ((i + m - 1) % m, (i + 1) % m),
                (false, 0) => (0, 1),
                (false, i) if i == m - 1 => (m - 2, m - 1),
                (false, i) => (i - 1, i + 1),
            };
            let d = points[next] - points[prev];
            d.y.atan2(d.x)
        })
        .collect();

    unwrap_angles(&mut heading);
    heading
}

/// Curvature as the rate of change of the heading along the arc-length.
fn sample_curvatures(heading: &[f64], spacing: f64, closed: bool) -> Vec<f64> {
    let m = heading.len();

    (0..m)
        .map(|i| {
            let (prev, next) = match (closed, i) {
                (true, _) => ((i + m - 1) % m, (i + 1) % m),
                (false, 0) => (0, 1),
                (false, i) if i == m - 1 => (m - 2, m - 1),
                (false, i) => (i - 1, i + 1),
            };
            let steps = if closed || (i > 0 && i < m - 1) { 2.0 } else { 1.0 };
            wrap_to_pi(heading[next] - heading[prev]) / (steps * spacing)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::f64::consts::PI;

    /// A straight open track along +x, `length` long and 10 m wide.
    pub(crate) fn straight_track(length: f64, interval: f64) -> RaceTrack {
        let center = vec![Vector2::new(0.0, 0.0), Vector2::new(length, 0.0)];
        let left = vec![Vector2::new(0.0, 5.0), Vector2::new(length, 5.0)];
        let right = vec![Vector2::new(0.0, -5.0), Vector2::new(length, -5.0)];

        RaceTrack::new("straight", &left, &right, &center, 1.0, interval).unwrap()
    }

    /// A closed anti-clockwise circular track of the given centerline radius
    /// and half width.
    pub(crate) fn circle_track(radius: f64, half_width: f64, interval: f64) -> RaceTrack {
        let circle = |r: f64| -> Vec<Vector2<f64>> {
            (0..360)
                .map(|i| {
                    let a = i as f64 * PI / 180.0;
                    Vector2::new(r * a.cos(), r * a.sin())
                })
                .collect()
        };

        RaceTrack::new(
            "circle",
            &circle(radius - half_width),
            &circle(radius + half_width),
            &circle(radius),
            1.0,
            interval,
        )
        .unwrap()
    }

    #[test]
    fn test_straight_grid() {
        let track = straight_track(100.0, 1.0);

        assert_eq!(track.topology(), Topology::Open);
        assert_eq!(track.len(), 101);
        assert_eq!(track.abscissa()[100], 100.0);
        assert!(track.curvature().iter().all(|k| k.abs() < 1e-12));
        assert!((track.left_offsets()[50] - 5.0).abs() < 1e-12);
        assert!((track.right_offsets()[50] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_circle_geometry() {
        let track = circle_track(50.0, 5.0, 1.0);
        let circumference = 2.0 * PI * 50.0;

        assert!(track.is_closed());
        // The polygon is slightly shorter than the true circle
        assert!((track.length() - circumference).abs() / circumference < 1e-3);
        assert!((track.interval_length(track.len() - 1) - track.interval()).abs() < 1e-9);

        for k in track.curvature() {
            assert!((k - 1.0 / 50.0).abs() < 2e-3, "curvature {}", k);
        }
        for (l, r) in track.left_offsets().iter().zip(track.right_offsets()) {
            assert!((l - 5.0).abs() < 0.01);
            assert!((r - 5.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_frenet_to_global_straight() {
        let track = straight_track(100.0, 1.0);
        let poses = track
            .frenet_to_global(&[10.5, 99.0], &[2.0, -1.0], &[0.1, 0.0])
            .unwrap();

        assert!((poses[0].x_m - 10.5).abs() < 1e-12);
        assert!((poses[0].y_m - 2.0).abs() < 1e-12);
        assert!((poses[0].yaw_rad - 0.1).abs() < 1e-12);
        assert!((poses[1].y_m + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_open_track_domain() {
        let track = straight_track(100.0, 1.0);

        assert!(matches!(
            track.frenet_to_global_single(100.5, 0.0, 0.0),
            Err(TrackError::OutOfDomain { .. })
        ));
        assert!(track.frenet_to_global_single(-0.1, 0.0, 0.0).is_err());
        assert!(track.frenet_to_global_single(100.0, 0.0, 0.0).is_ok());
        assert!(matches!(
            track.frenet_to_global(&[1.0], &[0.0, 1.0], &[0.0]),
            Err(TrackError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_closed_track_wraps() {
        let track = circle_track(50.0, 5.0, 1.0);
        let a = track.frenet_to_global_single(10.0, 1.0, 0.0).unwrap();
        let b = track
            .frenet_to_global_single(10.0 + 2.0 * track.length(), 1.0, 0.0)
            .unwrap();
        let c = track
            .frenet_to_global_single(10.0 - track.length(), 1.0, 0.0)
            .unwrap();

        assert!((a.x_m - b.x_m).abs() < 1e-9 && (a.y_m - b.y_m).abs() < 1e-9);
        assert!((a.x_m - c.x_m).abs() < 1e-9 && (a.y_m - c.y_m).abs() < 1e-9);
    }

    #[test]
    fn test_frenet_round_trip() {
        let track = circle_track(50.0, 5.0, 1.0);

        for i in 0..40 {
            let s = i as f64 * track.length() / 40.0 + 0.37;
            for n in [-4.0, -1.5, 0.0, 2.5, 4.0].iter() {
                let pose = track.frenet_to_global_single(s, *n, 0.0).unwrap();
                let f = track.global_to_frenet(&Vector2::new(pose.x_m, pose.y_m));

                let ds = wrap_to_pi((f.s_m - s) / track.length() * 2.0 * PI) * track.length()
                    / (2.0 * PI);
                assert!(ds.abs() < 1e-6, "s {} -> {}", s, f.s_m);
                assert!((f.n_m - n).abs() < 1e-6, "n {} -> {}", n, f.n_m);
            }
        }
    }

    #[test]
    fn test_fill_boundaries_idempotent() {
        let track = circle_track(50.0, 5.0, 2.0);
        let mut traj = track.center_trajectory();
        // Move the samples off the centerline
        for i in 0..traj.len() {
            let x = traj.get(i, Column::X);
            traj.set(i, Column::X, x * 1.02);
        }

        track.fill_trajectory_boundaries(&mut traj).unwrap();
        let first = traj.clone();
        track.fill_trajectory_boundaries(&mut traj).unwrap();

        assert_eq!(first, traj);
    }

    #[test]
    fn test_center_trajectory_boundaries() {
        let track = straight_track(20.0, 2.0);
        let traj = track.center_trajectory();

        assert_eq!(traj.len(), 11);
        assert!((traj.get(3, Column::LeftBoundY) - 5.0).abs() < 1e-12);
        assert!((traj.get(3, Column::RightBoundY) + 5.0).abs() < 1e-12);
        assert!((traj.get(10, Column::Distance) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_reverse_direction_swaps_sides() {
        let center = vec![Vector2::new(0.0, 0.0), Vector2::new(50.0, 0.0)];
        let left = vec![Vector2::new(0.0, 3.0), Vector2::new(50.0, 3.0)];
        let right = vec![Vector2::new(0.0, -6.0), Vector2::new(50.0, -6.0)];
        let track = RaceTrack::new("rev", &left, &right, &center, -1.0, 1.0).unwrap();

        // Travelling along -x the old right boundary (y = -6) is on the left
        assert!((track.left_offsets()[0] - 6.0).abs() < 1e-12);
        assert!((track.right_offsets()[0] - 3.0).abs() < 1e-12);
        assert!((track.centerline()[0].x - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_construction_errors() {
        let p = vec![Vector2::new(0.0, 0.0), Vector2::new(0.0, 0.0)];
        let b = vec![Vector2::new(0.0, 1.0), Vector2::new(1.0, 1.0)];

        assert!(matches!(
            RaceTrack::new("degenerate", &b, &b, &p, 1.0, 1.0),
            Err(TrackError::TooFewPoints { .. })
        ));
        assert!(matches!(
            RaceTrack::new("bad", &b, &b, &b, 1.0, 0.0),
            Err(TrackError::InvalidInterval(_))
        ));
        assert!(matches!(
            RaceTrack::new("bad", &b, &b, &b, 0.0, 1.0),
            Err(TrackError::InvalidDirection(_))
        ));
        assert!(matches!(
            RaceTrack::with_topology("short", &b, &b, &b, 1.0, 5.0, Topology::Open),
            Err(TrackError::TooShort { .. })
        ));
    }
}
