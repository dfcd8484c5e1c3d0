//! Column schema shared by every trajectory

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The fields of a trajectory sample.
///
/// The discriminant of each variant is the column offset of the field in the
/// bulk numeric view and in persisted track-trajectory files, so the order
/// of the variants must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    /// Global x position.
    ///
    /// Units: meters
    X = 0,

    /// Global y position.
    ///
    /// Units: meters
    Y,

    /// Global z position, passed through from the track input.
    ///
    /// Units: meters
    Z,

    /// Heading of the vehicle, angle to the +ve x axis.
    ///
    /// Units: radians
    Yaw,

    /// Longitudinal (body x) speed.
    ///
    /// Units: meters/second
    Speed,

    /// Curvature of the driven line.
    ///
    /// Units: 1/meters
    Curvature,

    /// Cumulative distance along the driven line from the first sample.
    ///
    /// Units: meters
    Distance,

    LeftBoundX,
    LeftBoundY,
    RightBoundX,
    RightBoundY,

    /// Bank angle of the track surface.
    ///
    /// Units: radians
    Bank,

    /// Longitudinal acceleration.
    ///
    /// Units: meters/second^2
    LonAcc,

    /// Lateral acceleration, positive to the left.
    ///
    /// Units: meters/second^2
    LatAcc,

    /// Elapsed time at the sample, measured from the first sample.
    ///
    /// Units: seconds
    Time,

    /// Yaw rate.
    ///
    /// Units: radians/second
    YawRate,

    /// Lateral (body y) speed.
    ///
    /// Units: meters/second
    Vy,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Column {
    /// Number of columns in a trajectory.
    pub const COUNT: usize = 17;

    /// All columns in offset order.
    pub const ALL: [Column; Column::COUNT] = [
        Column::X,
        Column::Y,
        Column::Z,
        Column::Yaw,
        Column::Speed,
        Column::Curvature,
        Column::Distance,
        Column::LeftBoundX,
        Column::LeftBoundY,
        Column::RightBoundX,
        Column::RightBoundY,
        Column::Bank,
        Column::LonAcc,
        Column::LatAcc,
        Column::Time,
        Column::YawRate,
        Column::Vy,
    ];

    /// Offset of the column in the bulk numeric view.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short upper case name, as used in file headers.
    pub fn name(self) -> &'static str {
        match self {
            Column::X => "X",
            Column::Y => "Y",
            Column::Z => "Z",
            Column::Yaw => "YAW",
            Column::Speed => "SPEED",
            Column::Curvature => "CURVATURE",
            Column::Distance => "DISTANCE",
            Column::LeftBoundX => "LEFT_BOUND_X",
            Column::LeftBoundY => "LEFT_BOUND_Y",
            Column::RightBoundX => "RIGHT_BOUND_X",
            Column::RightBoundY => "RIGHT_BOUND_Y",
            Column::Bank => "BANK",
            Column::LonAcc => "LON_ACC",
            Column::LatAcc => "LAT_ACC",
            Column::Time => "TIME",
            Column::YawRate => "YAW_RATE",
            Column::Vy => "VY",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_column_offsets() {
        for (i, c) in Column::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
        assert_eq!(Column::Vy.index() + 1, Column::COUNT);
        assert!(Column::Bank.index() < Column::Time.index());
    }
}
