//! Objective and constraint blocks of the minimum time problem
//!
//! All blocks work on scaled variables and produce outputs of order one.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::Arc;

use super::layout::{ScaleFactors, VariableLayout};
use crate::nlp::Block;
use crate::vehicle::{Control, DoubleTrack, State};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of outputs of a [`PathBlock`].
pub const NUM_PATH_OUTPUTS: usize = 5;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Sum of the scaled interval durations.
pub struct LapTimeObjective {
    vars: Vec<usize>,
}

/// Trapezoidal collocation defect of one interval.
///
/// The controls are held constant over the interval. Variables are ordered
/// as the start state, the end state, the controls, then the duration.
pub struct DefectBlock {
    vars: Vec<usize>,
    model: Arc<DoubleTrack>,
    scale: ScaleFactors,

    /// Arc-length increment over the interval.
    ///
    /// Units: meters
    ds: f64,

    /// Track curvature at the start and end samples.
    curvature: [f64; 2],
}

/// Tire, power and actuator constraints at the start of one interval.
///
/// Outputs:
/// 0. front axle friction usage, at most 1,
/// 1. rear axle friction usage, at most 1,
/// 2. load transfer residual over the vehicle weight, zero,
/// 3. drive power over the maximum power, at most 1,
/// 4. minus the product of the scaled drive and brake forces, at most a
///    small tolerance.
pub struct PathBlock {
    vars: Vec<usize>,
    model: Arc<DoubleTrack>,
    scale: ScaleFactors,
    curvature: f64,
}

/// Rate limits on the controls between two consecutive intervals.
///
/// For every limited control two outputs are produced, the increase and the
/// decrease of the control minus the allowed change over the interval, both
/// at most zero.
pub struct ControlRateBlock {
    vars: Vec<usize>,
    scale: ScaleFactors,

    /// Limited controls and their rates in physical units per second.
    limits: Vec<(usize, f64)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LapTimeObjective {
    pub fn new(layout: &VariableLayout) -> Self {
        Self {
            vars: (0..layout.num_intervals).map(|k| layout.t(k)).collect(),
        }
    }
}

impl Block for LapTimeObjective {
    fn vars(&self) -> &[usize] {
        &self.vars
    }

    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, x: &[f64], out: &mut [f64]) {
        out[0] = x.iter().sum();
    }

    fn jacobian(&self, _x: &[f64], jac: &mut [f64]) {
        jac.iter_mut().for_each(|j| *j = 1.0);
    }

    fn has_hessian(&self) -> bool {
        false
    }
}

impl DefectBlock {
    pub fn new(
        layout: &VariableLayout,
        k: usize,
        model: Arc<DoubleTrack>,
        scale: ScaleFactors,
        ds: f64,
        curvature: [f64; 2],
    ) -> Self {
        let next = layout.next_sample(k);
        let mut vars = Vec::with_capacity(2 * State::DIM + Control::DIM + 1);
        vars.extend((0..State::DIM).map(|j| layout.x(k, j)));
        vars.extend((0..State::DIM).map(|j| layout.x(next, j)));
        vars.extend((0..Control::DIM).map(|j| layout.u(k, j)));
        vars.push(layout.t(k));

        Self {
            vars,
            model,
            scale,
            ds,
            curvature,
        }
    }
}

impl Block for DefectBlock {
    fn vars(&self) -> &[usize] {
        &self.vars
    }

    fn dim(&self) -> usize {
        State::DIM
    }

    fn eval(&self, x: &[f64], out: &mut [f64]) {
        let (start, rest) = x.split_at(State::DIM);
        let (end, rest) = rest.split_at(State::DIM);
        let (control, time) = rest.split_at(Control::DIM);

        let x0 = self.scale.unscale_x(&to_state(start));
        let x1 = self.scale.unscale_x(&to_state(end));
        let u = Control::from_array(self.scale.unscale_u(&to_control(control)));
        let dt = self.scale.unscale_t(time[0]);

        let (f0, _) = self.model.derivative(&State::from_array(x0), &u, self.curvature[0]);
        let (f1, _) = self.model.derivative(&State::from_array(x1), &u, self.curvature[1]);
        let (f0, f1) = (f0.to_array(), f1.to_array());

        for j in 0..State::DIM {
            // The arc-length state is relative to each sample's abscissa
            let progress = if j == 0 { self.ds } else { 0.0 };
            let defect = x1[j] + progress - x0[j] - 0.5 * dt * (f0[j] + f1[j]);
            out[j] = defect / self.scale.x[j];
        }
    }

    // Modelled to first order by the solver
    fn has_hessian(&self) -> bool {
        false
    }
}

impl PathBlock {
    pub fn new(
        layout: &VariableLayout,
        k: usize,
        model: Arc<DoubleTrack>,
        scale: ScaleFactors,
        curvature: f64,
    ) -> Self {
        let mut vars = Vec::with_capacity(State::DIM + Control::DIM);
        vars.extend((0..State::DIM).map(|j| layout.x(k, j)));
        vars.extend((0..Control::DIM).map(|j| layout.u(k, j)));

        Self {
            vars,
            model,
            scale,
            curvature,
        }
    }

    /// Lower and upper bounds of the outputs.
    pub fn bounds(complementarity_tol: f64) -> (Vec<f64>, Vec<f64>) {
        let inf = f64::INFINITY;
        (
            vec![-inf, -inf, 0.0, -inf, -inf],
            vec![1.0, 1.0, 0.0, 1.0, complementarity_tol],
        )
    }
}

impl Block for PathBlock {
    fn vars(&self) -> &[usize] {
        &self.vars
    }

    fn dim(&self) -> usize {
        NUM_PATH_OUTPUTS
    }

    fn eval(&self, x: &[f64], out: &mut [f64]) {
        let (state, control) = x.split_at(State::DIM);
        let s = State::from_array(self.scale.unscale_x(&to_state(state)));
        let u = Control::from_array(self.scale.unscale_u(&to_control(control)));

        let (_, aux) = self.model.derivative(&s, &u, self.curvature);
        let p = self.model.params();

        out[0] = aux.friction_usage[0];
        out[1] = aux.friction_usage[1];
        out[2] = aux.load_transfer_residual_n / self.model.weight();
        out[3] = aux.drive_power_w / p.max_power_w;
        out[4] = -control[0] * control[1];
    }

    fn has_hessian(&self) -> bool {
        false
    }
}

impl ControlRateBlock {
    /// Create the rate block between interval `k` and the next one, or
    /// `None` if no control is rate limited.
    pub fn new(
        layout: &VariableLayout,
        k: usize,
        model: &DoubleTrack,
        scale: ScaleFactors,
    ) -> Option<Self> {
        let p = model.params();
        let limits: Vec<(usize, f64)> = [
            (0, p.max_drive_rate_nps),
            (1, p.max_brake_rate_nps),
            (2, p.max_steer_rate_radps),
        ]
        .iter()
        .filter_map(|(j, rate)| rate.map(|r| (*j, r)))
        .collect();

        if limits.is_empty() {
            return None;
        }

        let next = (k + 1) % layout.num_intervals;
        let mut vars: Vec<usize> = limits.iter().map(|(j, _)| layout.u(k, *j)).collect();
        vars.extend(limits.iter().map(|(j, _)| layout.u(next, *j)));
        vars.push(layout.t(k));

        Some(Self { vars, scale, limits })
    }
}

impl Block for ControlRateBlock {
    fn vars(&self) -> &[usize] {
        &self.vars
    }

    fn dim(&self) -> usize {
        2 * self.limits.len()
    }

    fn eval(&self, x: &[f64], out: &mut [f64]) {
        let m = self.limits.len();
        let dt = self.scale.unscale_t(x[2 * m]);

        for (i, (j, rate)) in self.limits.iter().enumerate() {
            let change = x[m + i] - x[i];
            let allowed = rate * dt / self.scale.u[*j];

            out[2 * i] = change - allowed;
            out[2 * i + 1] = -change - allowed;
        }
    }

    fn has_hessian(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn to_state(x: &[f64]) -> [f64; State::DIM] {
    let mut out = [0.0; State::DIM];
    out.copy_from_slice(&x[..State::DIM]);
    out
}

fn to_control(x: &[f64]) -> [f64; Control::DIM] {
    let mut out = [0.0; Control::DIM];
    out.copy_from_slice(&x[..Control::DIM]);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nlp::eval_block;
    use crate::vehicle::test::double_track_params;

    fn scale() -> ScaleFactors {
        ScaleFactors {
            x: [1.0, 5.0, 1.0, 1.5, 0.3, 60.0],
            u: [6000.0, 15000.0, 0.4, 12000.0],
            t: 1.0 / 60.0,
        }
    }

    #[test]
    fn test_defect_zero_at_steady_straight_line() {
        let model = Arc::new(DoubleTrack::new(double_track_params()).unwrap());
        let layout = VariableLayout::new(2, false);
        let scale = scale();
        let v = 20.0;
        let ds = 1.0;

        let block = DefectBlock::new(&layout, 0, model.clone(), scale, ds, [0.0, 0.0]);

        let mut z = vec![0.0; layout.num_variables()];
        z[layout.x(0, 5)] = v / scale.x[5];
        z[layout.x(1, 5)] = v / scale.x[5];
        z[layout.u(0, 0)] = model.resistance(v) / scale.u[0];
        z[layout.t(0)] = scale.scale_t(ds / v);

        let out = eval_block(&block, &z);
        for d in out.iter() {
            assert!(d.abs() < 1e-9, "defect {:?}", out);
        }

        // Too short an interval leaves a positive arc-length defect
        z[layout.t(0)] *= 0.5;
        let out = eval_block(&block, &z);
        assert!(out[0] > 0.1);
    }

    #[test]
    fn test_path_outputs() {
        let model = Arc::new(DoubleTrack::new(double_track_params()).unwrap());
        let layout = VariableLayout::new(2, false);
        let scale = scale();
        let block = PathBlock::new(&layout, 0, model, scale, 0.0);

        let mut z = vec![0.0; layout.num_variables()];
        z[layout.x(0, 5)] = 30.0 / scale.x[5];
        z[layout.u(0, 0)] = 0.5;
        z[layout.u(0, 1)] = -0.4;

        let out = eval_block(&block, &z);
        assert!(out[0] > 0.0 && out[1] > 0.0);
        assert!(out[2].abs() < 1e-12);
        assert!((out[3] - 3000.0 * 30.0 / 200_000.0).abs() < 1e-12);
        assert!((out[4] - 0.2).abs() < 1e-12);

        let (lower, upper) = PathBlock::bounds(1e-3);
        assert_eq!(lower.len(), NUM_PATH_OUTPUTS);
        assert_eq!(upper[4], 1e-3);
    }

    #[test]
    fn test_control_rate() {
        let mut p = double_track_params();
        p.max_steer_rate_radps = Some(0.4);
        let model = DoubleTrack::new(p).unwrap();
        let layout = VariableLayout::new(3, true);
        let scale = scale();

        let unlimited = DoubleTrack::new(double_track_params()).unwrap();
        assert!(ControlRateBlock::new(&layout, 0, &unlimited, scale).is_none());

        let block = ControlRateBlock::new(&layout, 2, &model, scale).unwrap();
        assert_eq!(block.dim(), 2);
        // Wraps to the first interval on a closed track
        assert_eq!(block.vars()[1], layout.u(0, 2));

        let mut z = vec![0.0; layout.num_variables()];
        z[layout.t(2)] = scale.scale_t(0.1);
        // 0.04 rad allowed over 0.1 s, a change of 0.02 rad is fine
        z[layout.u(0, 2)] = 0.02 / scale.u[2];
        let out = eval_block(&block, &z);
        assert!(out[0] < 0.0 && out[1] < 0.0);

        z[layout.u(0, 2)] = 0.08 / scale.u[2];
        let out = eval_block(&block, &z);
        assert!(out[0] > 0.0);
    }

    #[test]
    fn test_objective() {
        let layout = VariableLayout::new(4, true);
        let block = LapTimeObjective::new(&layout);
        let mut z = vec![0.0; layout.num_variables()];
        for k in 0..4 {
            z[layout.t(k)] = 1.5;
        }

        assert_eq!(eval_block(&block, &z), vec![6.0]);

        let mut jac = vec![0.0; 4];
        block.jacobian(&[0.0; 4], &mut jac);
        assert_eq!(jac, vec![1.0; 4]);
        assert!(!block.has_hessian());
    }
}
