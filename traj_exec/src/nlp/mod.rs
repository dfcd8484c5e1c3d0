//! # Nonlinear programs
//!
//! A declarative description of a sparse nonlinear program and the interface
//! of the solvers which can solve it.
//!
//! A problem is made of bounded variables, an objective which is the sum of
//! the outputs of a set of [`Block`]s, and constraints bounding the outputs of
//! other blocks. Each block only reads a small subset of the variables, which
//! keeps the evaluation of large problems cheap and lets the blocks be
//! evaluated in parallel.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod aug_lag;
pub mod sparse;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

pub use aug_lag::{AugLagParams, AugLagSolver};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A small vector valued function of some of the problem's variables.
pub trait Block: Send + Sync {
    /// Indices of the variables read by the block, in the order in which
    /// their values are passed to [`Block::eval`].
    fn vars(&self) -> &[usize];

    /// Number of outputs.
    fn dim(&self) -> usize;

    /// Evaluate the block.
    ///
    /// `x` holds the values of the variables listed by [`Block::vars`] and
    /// `out` has [`Block::dim`] elements.
    fn eval(&self, x: &[f64], out: &mut [f64]);

    /// Evaluate the Jacobian of the block into `jac`, stored row major with
    /// one row per output and one column per variable.
    ///
    /// Defaults to central finite differences.
    fn jacobian(&self, x: &[f64], jac: &mut [f64]) {
        let n = x.len();
        let m = self.dim();
        let mut x_work = x.to_vec();
        let mut plus = vec![0.0; m];
        let mut minus = vec![0.0; m];

        for j in 0..n {
            let h = FD_STEP * x[j].abs().max(1.0);

            x_work[j] = x[j] + h;
            self.eval(&x_work, &mut plus);
            x_work[j] = x[j] - h;
            self.eval(&x_work, &mut minus);
            x_work[j] = x[j];

            for i in 0..m {
                jac[i * n + j] = (plus[i] - minus[i]) / (2.0 * h);
            }
        }
    }

    /// Whether [`Block::weighted_hessian`] is worth evaluating.
    ///
    /// Blocks returning `false` are linear or are modelled to first order by
    /// the solvers, which then only use their Jacobian.
    fn has_hessian(&self) -> bool {
        true
    }

    /// Evaluate the Hessian of `sum(weights[r] * out[r])` into `hess`, a
    /// symmetric matrix stored row major with one row per variable.
    ///
    /// Defaults to central finite differences of the Jacobian.
    fn weighted_hessian(&self, x: &[f64], weights: &[f64], hess: &mut [f64]) {
        let n = x.len();
        let m = self.dim();
        let mut x_work = x.to_vec();
        let mut jac = vec![0.0; m * n];

        let mut weighted_grad = |x: &[f64], grad: &mut [f64]| {
            self.jacobian(x, &mut jac);
            for (c, g) in grad.iter_mut().enumerate() {
                *g = (0..m).map(|r| weights[r] * jac[r * n + c]).sum();
            }
        };

        let mut plus = vec![0.0; n];
        let mut minus = vec![0.0; n];

        for j in 0..n {
            let h = HESSIAN_FD_STEP * x[j].abs().max(1.0);

            x_work[j] = x[j] + h;
            weighted_grad(&x_work, &mut plus);
            x_work[j] = x[j] - h;
            weighted_grad(&x_work, &mut minus);
            x_work[j] = x[j];

            for i in 0..n {
                hess[i * n + j] = (plus[i] - minus[i]) / (2.0 * h);
            }
        }

        for i in 0..n {
            for j in 0..i {
                let mean = 0.5 * (hess[i * n + j] + hess[j * n + i]);
                hess[i * n + j] = mean;
                hess[j * n + i] = mean;
            }
        }
    }
}

/// A solver of nonlinear programs.
pub trait NlpSolver {
    /// Solve the problem starting from the variables' initial values.
    ///
    /// On failure the error carries the best point the solver found.
    fn solve(&self, problem: &Problem) -> Result<Solution, SolverError>;
}

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative step of the finite difference Jacobians.
const FD_STEP: f64 = 1e-6;

/// Relative step of the finite difference Hessians, taken over finite
/// difference Jacobians.
const HESSIAN_FD_STEP: f64 = 1e-4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A decision variable.
///
/// The variable is fixed at `lower` when `lower == upper`. Infinite bounds
/// are allowed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    pub lower: f64,
    pub upper: f64,
    pub initial: f64,
}

/// A constraint `lower <= block(x) <= upper`, applied per output.
///
/// Outputs whose bounds are equal are equality constraints.
pub struct Constraint {
    pub block: Box<dyn Block>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// A nonlinear program.
#[derive(Default)]
pub struct Problem {
    pub variables: Vec<Variable>,

    /// The objective to minimise is the sum of every output of every block.
    pub objective: Vec<Box<dyn Block>>,

    pub constraints: Vec<Constraint>,
}

/// The result of a solve.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    /// Value of every variable, fixed ones included.
    pub x: Vec<f64>,

    pub objective: f64,

    /// Largest violation of a constraint or variable bound.
    pub max_violation: f64,

    /// Number of outer iterations performed.
    pub iterations: usize,

    pub history: Vec<IterationRecord>,
}

/// Progress of a solver after one outer iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub inner_iterations: u64,
    pub objective: f64,
    pub max_violation: f64,
    pub penalty: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("The solver did not converge: {reason}")]
    NotConverged { reason: String, best: Box<Solution> },

    #[error("The solve was cancelled")]
    Cancelled { best: Box<Solution> },

    #[error("Invalid problem: {0}")]
    InvalidProblem(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Variable {
    pub fn new(lower: f64, upper: f64, initial: f64) -> Self {
        Self { lower, upper, initial }
    }

    /// A variable fixed at `value`.
    pub fn fixed(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn free(initial: f64) -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY, initial)
    }

    pub fn is_fixed(&self) -> bool {
        self.lower == self.upper
    }
}

impl Constraint {
    /// Constrain every output of the block to zero.
    pub fn equality(block: Box<dyn Block>) -> Self {
        let dim = block.dim();
        Self {
            block,
            lower: vec![0.0; dim],
            upper: vec![0.0; dim],
        }
    }

    /// Constrain every output of the block to be at most `upper`.
    pub fn upper(block: Box<dyn Block>, upper: f64) -> Self {
        let dim = block.dim();
        Self {
            block,
            lower: vec![f64::NEG_INFINITY; dim],
            upper: vec![upper; dim],
        }
    }

    pub fn ranged(block: Box<dyn Block>, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { block, lower, upper }
    }
}

impl Problem {
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Total number of constraint outputs.
    pub fn num_constraints(&self) -> usize {
        self.constraints.iter().map(|c| c.block.dim()).sum()
    }

    /// Initial values of the variables.
    pub fn initial(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.initial).collect()
    }

    /// Check the structure of the problem.
    pub fn validate(&self) -> Result<(), SolverError> {
        let n = self.variables.len();

        for (i, v) in self.variables.iter().enumerate() {
            if v.lower.is_nan() || v.upper.is_nan() || v.lower > v.upper {
                return Err(SolverError::InvalidProblem(format!(
                    "variable {} has invalid bounds [{}, {}]",
                    i, v.lower, v.upper
                )));
            }
            if !v.initial.is_finite() {
                return Err(SolverError::InvalidProblem(format!(
                    "variable {} has a non-finite initial value",
                    i
                )));
            }
        }

        let check_vars = |name: &str, idx: usize, block: &dyn Block| {
            match block.vars().iter().find(|&&j| j >= n) {
                Some(j) => Err(SolverError::InvalidProblem(format!(
                    "{} block {} reads variable {} of {}",
                    name, idx, j, n
                ))),
                None => Ok(()),
            }
        };

        for (i, b) in self.objective.iter().enumerate() {
            check_vars("objective", i, b.as_ref())?;
        }

        for (i, c) in self.constraints.iter().enumerate() {
            check_vars("constraint", i, c.block.as_ref())?;

            let dim = c.block.dim();
            if c.lower.len() != dim || c.upper.len() != dim {
                return Err(SolverError::InvalidProblem(format!(
                    "constraint {} has {} outputs but {}/{} bounds",
                    i,
                    dim,
                    c.lower.len(),
                    c.upper.len()
                )));
            }
            if c.lower.iter().zip(c.upper.iter()).any(|(l, u)| l > u || l.is_nan() || u.is_nan()) {
                return Err(SolverError::InvalidProblem(format!(
                    "constraint {} has invalid bounds",
                    i
                )));
            }
        }

        Ok(())
    }

    /// Evaluate the objective at a full point.
    pub fn objective_at(&self, x: &[f64]) -> f64 {
        self.objective
            .iter()
            .map(|b| eval_block(b.as_ref(), x).iter().sum::<f64>())
            .sum()
    }

    /// Largest violation of a constraint or variable bound at a full point.
    ///
    /// Returns infinity if any constraint output is not finite.
    pub fn max_violation_at(&self, x: &[f64]) -> f64 {
        let mut viol: f64 = 0.0;

        for (v, xi) in self.variables.iter().zip(x.iter()) {
            viol = viol.max(v.lower - xi).max(xi - v.upper);
        }

        for c in self.constraints.iter() {
            let out = eval_block(c.block.as_ref(), x);
            for ((g, l), u) in out.iter().zip(c.lower.iter()).zip(c.upper.iter()) {
                if !g.is_finite() {
                    return f64::INFINITY;
                }
                viol = viol.max(l - g).max(g - u);
            }
        }

        viol
    }
}

impl SolverError {
    /// The best point found before the failure, if any.
    pub fn best(&self) -> Option<&Solution> {
        match self {
            SolverError::NotConverged { best, .. } | SolverError::Cancelled { best } => Some(&**best),
            SolverError::InvalidProblem(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Gather a block's variables from a full point.
pub fn gather(block: &dyn Block, x: &[f64]) -> Vec<f64> {
    block.vars().iter().map(|&i| x[i]).collect()
}

/// Evaluate a block at a full point.
pub fn eval_block(block: &dyn Block, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; block.dim()];
    block.eval(&gather(block, x), &mut out);
    out
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// A block evaluating a closure, used to write small test problems.
    pub(crate) struct FnBlock<F> {
        pub vars: Vec<usize>,
        pub dim: usize,
        pub f: F,
    }

    impl<F> Block for FnBlock<F>
    where
        F: Fn(&[f64], &mut [f64]) + Send + Sync,
    {
        fn vars(&self) -> &[usize] {
            &self.vars
        }

        fn dim(&self) -> usize {
            self.dim
        }

        fn eval(&self, x: &[f64], out: &mut [f64]) {
            (self.f)(x, out)
        }
    }

    pub(crate) fn boxed<F>(vars: Vec<usize>, dim: usize, f: F) -> Box<dyn Block>
    where
        F: Fn(&[f64], &mut [f64]) + Send + Sync + 'static,
    {
        Box::new(FnBlock { vars, dim, f })
    }

    #[test]
    fn test_fd_jacobian() {
        let b = boxed(vec![0, 1], 2, |x, out| {
            out[0] = x[0] * x[0] * x[1];
            out[1] = x[1].sin();
        });

        let mut jac = vec![0.0; 4];
        b.jacobian(&[2.0, 0.5], &mut jac);

        assert!((jac[0] - 2.0).abs() < 1e-6);
        assert!((jac[1] - 4.0).abs() < 1e-6);
        assert!(jac[2].abs() < 1e-9);
        assert!((jac[3] - 0.5f64.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_fd_weighted_hessian() {
        let b = boxed(vec![0, 1], 2, |x, out| {
            out[0] = x[0] * x[1];
            out[1] = x[0] * x[0] * x[0];
        });
        assert!(b.has_hessian());

        // 2 * d2(xy) - 0.5 * d2(x^3) at (1, 3)
        let mut hess = vec![0.0; 4];
        b.weighted_hessian(&[1.0, 3.0], &[2.0, -0.5], &mut hess);

        assert!((hess[0] + 3.0).abs() < 1e-4);
        assert!((hess[1] - 2.0).abs() < 1e-4);
        assert_eq!(hess[1], hess[2]);
        assert!(hess[3].abs() < 1e-4);
    }

    #[test]
    fn test_violation() {
        let problem = Problem {
            variables: vec![Variable::new(0.0, 1.0, 0.5), Variable::free(0.0)],
            objective: vec![],
            constraints: vec![Constraint::equality(boxed(vec![0, 1], 1, |x, out| {
                out[0] = x[0] + x[1] - 1.0
            }))],
        };

        assert!(problem.validate().is_ok());
        assert_eq!(problem.max_violation_at(&[0.5, 0.5]), 0.0);
        assert!((problem.max_violation_at(&[1.5, 0.0]) - 0.5).abs() < 1e-12);
        assert!((problem.max_violation_at(&[0.2, 0.0]) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        let bad_var = Problem {
            variables: vec![Variable::new(1.0, 0.0, 0.5)],
            ..Default::default()
        };
        assert!(matches!(bad_var.validate(), Err(SolverError::InvalidProblem(_))));

        let bad_index = Problem {
            variables: vec![Variable::free(0.0)],
            objective: vec![boxed(vec![3], 1, |x, out| out[0] = x[0])],
            ..Default::default()
        };
        assert!(bad_index.validate().is_err());
    }
}
