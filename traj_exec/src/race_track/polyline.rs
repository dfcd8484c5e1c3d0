//! Polyline helpers used to build the race track geometry

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The result of projecting a point onto a polyline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Projection {
    /// The closest point on the polyline
    pub point: Vector2<f64>,

    /// Index of the segment containing the closest point (segment `i` joins
    /// point `i` to point `i + 1`, wrapping on closed polylines).
    pub segment: usize,

    /// Fraction along the segment, between 0 and 1.
    pub fraction: f64,

    /// Distance from the projected point to the polyline.
    pub distance: f64,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Number of segments in a polyline with `len` points.
pub(crate) fn num_segments(len: usize, closed: bool) -> usize {
    match (len, closed) {
        (0, _) | (1, _) => 0,
        (n, true) => n,
        (n, false) => n - 1,
    }
}

/// Cumulative length at each point of the polyline, starting at zero.
///
/// For a closed polyline the returned vector has one extra element, the
/// total length including the closing segment.
pub(crate) fn cumulative_lengths(points: &[Vector2<f64>], closed: bool) -> Vec<f64> {
    let mut lengths = Vec::with_capacity(points.len() + 1);
    let mut total = 0.0;

    if points.is_empty() {
        return lengths;
    }

    lengths.push(0.0);
    for seg in 0..num_segments(points.len(), closed) {
        let (a, b) = segment(points, seg);
        total += (b - a).norm();
        lengths.push(total);
    }

    lengths
}

/// Remove consecutive duplicate points, keeping the first of each run.
///
/// Returns the indices of the points which were kept.
pub(crate) fn dedup_indices(points: &[Vector2<f64>], tol: f64) -> Vec<usize> {
    let mut keep: Vec<usize> = Vec::with_capacity(points.len());

    for (i, p) in points.iter().enumerate() {
        match keep.last() {
            Some(&j) if (p - points[j]).norm() <= tol => (),
            _ => keep.push(i),
        }
    }

    keep
}

/// Resample a polyline at the given arc-length stations.
///
/// `lengths` must be the output of [`cumulative_lengths`] for the same
/// polyline and `closed` flag, and every station must lie inside
/// `[0, total]`.
pub(crate) fn resample(
    points: &[Vector2<f64>],
    lengths: &[f64],
    closed: bool,
    stations: &[f64],
) -> Vec<Vector2<f64>> {
    let values: Vec<[f64; 2]> = points.iter().map(|p| [p.x, p.y]).collect();

    resample_values(&values, lengths, closed, stations)
        .into_iter()
        .map(|v| Vector2::new(v[0], v[1]))
        .collect()
}

/// Linearly interpolate per-point values at the given arc-length stations.
pub(crate) fn resample_values<const D: usize>(
    values: &[[f64; D]],
    lengths: &[f64],
    closed: bool,
    stations: &[f64],
) -> Vec<[f64; D]> {
    let num_segs = num_segments(values.len(), closed);
    let mut out = Vec::with_capacity(stations.len());
    let mut seg = 0;

    for &station in stations {
        // Stations are increasing, so the segment search only moves forward
        while seg + 1 < num_segs && lengths[seg + 1] < station {
            seg += 1;
        }

        let a = values[seg];
        let b = values[(seg + 1) % values.len()];
        let seg_len = lengths[seg + 1] - lengths[seg];
        let t = if seg_len > 0.0 {
            ((station - lengths[seg]) / seg_len).max(0.0).min(1.0)
        } else {
            0.0
        };

        let mut v = [0.0; D];
        for d in 0..D {
            v[d] = a[d] + t * (b[d] - a[d]);
        }
        out.push(v);
    }

    out
}

/// Find the closest point on a polyline to `point`.
///
/// Returns `None` if the polyline has fewer than two points.
pub(crate) fn project(
    points: &[Vector2<f64>],
    closed: bool,
    point: &Vector2<f64>,
) -> Option<Projection> {
    let mut best: Option<Projection> = None;

    for seg in 0..num_segments(points.len(), closed) {
        let (a, b) = segment(points, seg);
        let ab = b - a;
        let len_sq = ab.norm_squared();

        let fraction = if len_sq > 0.0 {
            ((point - a).dot(&ab) / len_sq).max(0.0).min(1.0)
        } else {
            0.0
        };

        let closest = a + fraction * ab;
        let distance = (point - closest).norm();

        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Projection {
                point: closest,
                segment: seg,
                fraction,
                distance,
            });
        }
    }

    best
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn segment(points: &[Vector2<f64>], seg: usize) -> (Vector2<f64>, Vector2<f64>) {
    (points[seg], points[(seg + 1) % points.len()])
}

#[cfg(test)]
mod test {
    use super::*;

    fn square() -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(4.0, 0.0),
            Vector2::new(4.0, 4.0),
            Vector2::new(0.0, 4.0),
        ]
    }

    #[test]
    fn test_cumulative_lengths() {
        let open = cumulative_lengths(&square(), false);
        assert_eq!(open, vec![0.0, 4.0, 8.0, 12.0]);

        let closed = cumulative_lengths(&square(), true);
        assert_eq!(closed.len(), 5);
        assert_eq!(closed[4], 16.0);
    }

    #[test]
    fn test_resample_closed() {
        let pts = square();
        let lengths = cumulative_lengths(&pts, true);
        let stations = [0.0, 2.0, 6.0, 14.0];
        let out = resample(&pts, &lengths, true, &stations);

        assert!((out[1] - Vector2::new(2.0, 0.0)).norm() < 1e-12);
        assert!((out[2] - Vector2::new(4.0, 2.0)).norm() < 1e-12);
        assert!((out[3] - Vector2::new(0.0, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn test_project() {
        let pts = square();
        let p = project(&pts, true, &Vector2::new(-1.0, 1.0)).unwrap();
        assert_eq!(p.segment, 3);
        assert!((p.distance - 1.0).abs() < 1e-12);

        let p = project(&pts, false, &Vector2::new(-1.0, 1.0)).unwrap();
        assert_eq!(p.segment, 0);
        assert!((p.point - Vector2::new(0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_dedup() {
        let pts = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
        ];
        assert_eq!(dedup_indices(&pts, 1e-9), vec![0, 2]);
    }
}
