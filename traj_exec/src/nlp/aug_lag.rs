//! Augmented Lagrangian solver
//!
//! Constraints are moved into the objective as multiplier and quadratic
//! penalty terms, while the variable bounds are kept by projection so that
//! every iterate lies inside them. Each outer iteration minimises the
//! resulting bound constrained function with projected Newton steps, then
//! updates the multipliers from the constraint values and raises the penalty
//! if the constraint violation did not drop fast enough.
//!
//! The Newton model uses the curvature of the blocks that provide it and a
//! Gauss-Newton term for the others. It is factorised by a skyline Cholesky
//! in reverse Cuthill-McKee order and damped until it is positive definite.
//! Steps are accepted by a backtracking Armijo line search.
//!
//! Fixed variables are removed from the subproblem.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, LineSearch, State};
use argmin::solver::linesearch::{condition::ArmijoCondition, BacktrackingLineSearch};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// Internal
use super::sparse::{invert, reverse_cuthill_mckee, SkylineMatrix};
use super::{gather, Block, IterationRecord, NlpSolver, Problem, Solution, SolverError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// The penalty is raised when the violation is not reduced below this
/// fraction of its previous value.
const VIOLATION_DECREASE: f64 = 0.25;

/// Initial penalty per unit of initial objective, over half the squared
/// initial violation.
const PENALTY_SCALE: f64 = 10.0;

const CANCELLED_MSG: &str = "cancelled";

/// Sufficient decrease constant of the Armijo condition.
const ARMIJO_C: f64 = 1e-4;

/// Step contraction of the line search.
const BACKTRACK_RATIO: f64 = 0.5;

/// Line searches contracting the step at least this many times raise the
/// damping.
const SLOW_LINE_SEARCH: u64 = 3;

const DAMPING_FACTOR: f64 = 10.0;
const MIN_DAMPING: f64 = 1e-10;
const MAX_DAMPING: f64 = 1e12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugLagParams {
    pub max_outer_iterations: usize,

    /// Maximum number of Newton steps per outer iteration.
    pub max_inner_iterations: u64,

    /// Maximum number of step contractions of one line search.
    pub max_line_search_iterations: u64,

    /// Largest accepted constraint violation.
    pub constraint_tol: f64,

    /// Projected gradient of the augmented Lagrangian below which a feasible
    /// point is optimal.
    pub optimality_tol: f64,

    /// Largest relative change of the objective between two outer iterations
    /// at convergence.
    pub objective_tol: f64,

    /// Smallest initial penalty. The initial penalty is otherwise scaled on
    /// the initial objective and violation.
    pub initial_penalty: f64,

    pub penalty_growth: f64,

    pub max_penalty: f64,

    /// Projected gradient at which a subproblem is solved, reached once the
    /// outer iterations tighten their tolerance down to it.
    pub grad_tol: f64,

    /// Relative merit decrease below which a subproblem has stalled.
    pub cost_tol: f64,

    /// Initial diagonal shift of the Newton matrix.
    pub initial_damping: f64,
}

pub struct AugLagSolver {
    params: AugLagParams,
    cancel: Arc<AtomicBool>,
}

/// Lagrange multipliers of every constraint output.
struct Multipliers {
    eq: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

/// Values, and optionally the Jacobian, of a block.
struct BlockEval {
    values: Vec<f64>,
    jac: Option<Vec<f64>>,
}

/// Contribution of one constraint output to the augmented Lagrangian.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RowTerm {
    value: f64,

    /// Derivative with respect to the output.
    weight: f64,

    /// Second derivative with respect to the output.
    curvature: f64,
}

/// Shared, read-only data of the solve.
struct Layout<'a> {
    problem: &'a Problem,

    /// Offset of each constraint's first output in the multiplier vectors.
    offsets: Vec<usize>,

    /// Indices of the variables that are not fixed.
    free: Vec<usize>,

    /// Full point holding the values of the fixed variables.
    base: Vec<f64>,

    /// Bounds of the free variables.
    lower: Vec<f64>,
    upper: Vec<f64>,

    /// Row of each free variable in the Newton matrix.
    rank: Vec<usize>,

    /// Row of every variable in the Newton matrix, `None` if fixed.
    row: Vec<Option<usize>>,

    /// Zero Newton matrix with the sparsity profile of the problem.
    profile: SkylineMatrix,
}

/// Quadratic model of the augmented Lagrangian around a point.
struct NewtonModel {
    merit: f64,

    /// Gradient over the free variables.
    grad: Vec<f64>,

    hess: SkylineMatrix,
}

/// Result of the minimisation of a subproblem.
struct Inner {
    z: Vec<f64>,
    iterations: u64,

    /// Infinity norm of the last projected gradient.
    projected_grad: f64,
}

/// Merit function of the line searches.
struct Subproblem<'a> {
    layout: &'a Layout<'a>,
    mult: &'a Multipliers,
    rho: f64,
    cancel: &'a AtomicBool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for AugLagParams {
    fn default() -> Self {
        Self {
            max_outer_iterations: 50,
            max_inner_iterations: 200,
            max_line_search_iterations: 40,
            constraint_tol: 1e-6,
            optimality_tol: 1e-6,
            objective_tol: 1e-6,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e8,
            grad_tol: 1e-8,
            cost_tol: 1e-12,
            initial_damping: 1e-4,
        }
    }
}

impl AugLagSolver {
    pub fn new(params: AugLagParams) -> Self {
        Self::with_cancel(params, Arc::new(AtomicBool::new(false)))
    }

    /// Create a solver which stops as soon as `cancel` is set.
    pub fn with_cancel(params: AugLagParams, cancel: Arc<AtomicBool>) -> Self {
        Self { params, cancel }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Penalty weighing the initial violation like the initial objective,
    /// within the configured limits.
    fn initial_penalty(&self, layout: &Layout, x: &[f64], objective: f64) -> f64 {
        let evals = layout.constraint_evals(x, false);
        let mut squared = 0.0;

        for (c, eval) in layout.problem.constraints.iter().zip(evals.iter()) {
            for (r, g) in eval.values.iter().enumerate() {
                let v = (c.lower[r] - g).max(g - c.upper[r]).max(0.0);
                squared += v * v;
            }
        }

        let rho = PENALTY_SCALE * objective.abs().max(1.0) / (0.5 * squared).max(1.0);
        if rho.is_finite() {
            rho.max(self.params.initial_penalty).min(self.params.max_penalty)
        } else {
            self.params.initial_penalty
        }
    }

    /// Minimise the augmented Lagrangian from `z0` until its projected
    /// gradient drops below `tol`.
    ///
    /// `damping` carries the diagonal shift of the Newton matrix between
    /// calls.
    fn minimise(
        &self,
        layout: &Layout,
        mult: &Multipliers,
        rho: f64,
        z0: Vec<f64>,
        tol: f64,
        damping: &mut f64,
    ) -> Inner {
        let mut z = z0;
        let mut iterations = 0;
        let mut projected_grad = 0.0;

        if layout.free.is_empty() {
            return Inner {
                z,
                iterations,
                projected_grad,
            };
        }

        while iterations < self.params.max_inner_iterations && !self.is_cancelled() {
            let model = layout.newton_model(&layout.expand(&z), mult, rho);
            if !model.merit.is_finite() || model.grad.iter().any(|g| !g.is_finite()) {
                debug!("Non-finite augmented Lagrangian, stopping the subproblem");
                projected_grad = f64::INFINITY;
                break;
            }

            projected_grad = layout.projected_gradient(&z, &model.grad);
            if projected_grad <= tol {
                break;
            }

            let step = self.newton_step(layout, &z, &model, damping);
            iterations += 1;

            match self.line_search(layout, mult, rho, &z, &model, step) {
                Ok(Some((z_new, merit, contractions))) => {
                    let decrease = model.merit - merit;
                    z = z_new;

                    if contractions == 0 {
                        *damping = (*damping / DAMPING_FACTOR).max(MIN_DAMPING);
                    } else if contractions >= SLOW_LINE_SEARCH {
                        *damping = (*damping * DAMPING_FACTOR).min(MAX_DAMPING);
                    }

                    if decrease <= self.params.cost_tol * (1.0 + merit.abs()) {
                        trace!("Subproblem stalled after {} steps", iterations);
                        break;
                    }
                }
                Ok(None) => {
                    if *damping >= MAX_DAMPING {
                        trace!("No descent at the largest damping, stopping the subproblem");
                        break;
                    }
                    *damping = (*damping * DAMPING_FACTOR).min(MAX_DAMPING);
                }
                Err(e) => {
                    debug!("Line search stopped: {}", e);
                    break;
                }
            }
        }

        Inner {
            z,
            iterations,
            projected_grad,
        }
    }

    /// Projected Newton step from `z`.
    ///
    /// Variables at a bound the gradient pushes against are held. Falls back
    /// to a projected gradient step if the Newton step is not a descent
    /// direction.
    fn newton_step(&self, layout: &Layout, z: &[f64], model: &NewtonModel, damping: &mut f64) -> Vec<f64> {
        let n = z.len();
        let held: Vec<bool> = (0..n)
            .map(|k| {
                (z[k] <= layout.lower[k] && model.grad[k] > 0.0)
                    || (z[k] >= layout.upper[k] && model.grad[k] < 0.0)
            })
            .collect();

        let mut pinned = vec![false; n];
        for k in 0..n {
            pinned[layout.rank[k]] = held[k];
        }

        loop {
            if let Some(factor) = model.hess.shifted(*damping, &pinned).cholesky() {
                let mut rhs = vec![0.0; n];
                for k in (0..n).filter(|&k| !held[k]) {
                    rhs[layout.rank[k]] = -model.grad[k];
                }
                factor.solve(&mut rhs);

                let step: Vec<f64> = (0..n)
                    .map(|k| layout.clamp(k, z[k] + rhs[layout.rank[k]]) - z[k])
                    .collect();
                if dot(&model.grad, &step) < 0.0 {
                    return step;
                }

                trace!("Projected Newton step is not a descent direction");
                break;
            }

            if *damping >= MAX_DAMPING {
                break;
            }
            *damping = (*damping * DAMPING_FACTOR).min(MAX_DAMPING);
            trace!("Newton matrix is not positive definite, damping raised to {:.1e}", damping);
        }

        let scale = model.hess.max_diagonal() + *damping;
        (0..n)
            .map(|k| layout.clamp(k, z[k] - model.grad[k] / scale) - z[k])
            .collect()
    }

    /// Backtracking search from `z` along `step`.
    ///
    /// Returns the point with the lowest merit, its merit and the number of
    /// contractions, or `None` if no point improved on `z`.
    fn line_search(
        &self,
        layout: &Layout,
        mult: &Multipliers,
        rho: f64,
        z: &[f64],
        model: &NewtonModel,
        step: Vec<f64>,
    ) -> Result<Option<(Vec<f64>, f64, u64)>, ArgminError> {
        let sub = Subproblem {
            layout,
            mult,
            rho,
            cancel: &self.cancel,
        };

        let mut search: BacktrackingLineSearch<Vec<f64>, Vec<f64>, ArmijoCondition<f64>, f64> =
            BacktrackingLineSearch::new(ArmijoCondition::new(ARMIJO_C)?).rho(BACKTRACK_RATIO)?;
        search.search_direction(step);

        let (z0, g0, merit0) = (z.to_vec(), model.grad.clone(), model.merit);
        let max_iters = self.params.max_line_search_iterations;

        let res = Executor::new(sub, search)
            .configure(|state| state.param(z0).gradient(g0).cost(merit0).max_iters(max_iters))
            .ctrlc(false)
            .run()?;

        let state = res.state();
        let merit = state.get_best_cost();

        match state.get_best_param() {
            Some(best) if merit < model.merit => Ok(Some((best.clone(), merit, state.get_iter()))),
            _ => Ok(None),
        }
    }

    /// Is the point `(viol, obj)` better than `best`.
    fn is_better(&self, viol: f64, obj: f64, best: &Solution) -> bool {
        if !viol.is_finite() || !obj.is_finite() {
            return false;
        }

        let tol = self.params.constraint_tol;
        match (viol <= tol, best.max_violation <= tol) {
            (true, true) => obj < best.objective,
            (true, false) => true,
            (false, true) => false,
            (false, false) => viol < best.max_violation,
        }
    }
}

impl NlpSolver for AugLagSolver {
    fn solve(&self, problem: &Problem) -> Result<Solution, SolverError> {
        problem.validate()?;

        let layout = Layout::new(problem);
        let num_rows = problem.num_constraints();
        let mut mult = Multipliers::new(num_rows);

        let mut z: Vec<f64> = layout.free.iter().map(|&i| problem.variables[i].initial).collect();
        layout.project(&mut z);

        let x0 = layout.expand(&z);
        let objective0 = problem.objective_at(&x0);
        let mut rho = self.initial_penalty(&layout, &x0, objective0);
        let mut damping = self.params.initial_damping.max(MIN_DAMPING);

        let mut best = Solution {
            objective: objective0,
            max_violation: problem.max_violation_at(&x0),
            x: x0,
            ..Default::default()
        };
        let mut history = Vec::new();
        let mut prev_viol = f64::INFINITY;
        let mut prev_obj: Option<f64> = None;

        info!(
            "Solving NLP: {} variables ({} free, {} stored Newton entries), {} constraint outputs",
            problem.num_variables(),
            layout.free.len(),
            layout.profile.stored(),
            num_rows
        );

        for outer in 1..=self.params.max_outer_iterations {
            if self.is_cancelled() {
                best.history = history;
                return Err(SolverError::Cancelled { best: Box::new(best) });
            }

            let tol = 0.1f64.powi(outer as i32).max(self.params.grad_tol);
            let inner = self.minimise(&layout, &mult, rho, z, tol, &mut damping);
            z = inner.z;

            if self.is_cancelled() {
                best.history = history;
                return Err(SolverError::Cancelled { best: Box::new(best) });
            }

            let x = layout.expand(&z);
            let objective = problem.objective_at(&x);
            let viol = problem.max_violation_at(&x);

            history.push(IterationRecord {
                iteration: outer,
                inner_iterations: inner.iterations,
                objective,
                max_violation: viol,
                penalty: rho,
            });

            debug!(
                "Outer iteration {}: objective {:.6e}, violation {:.3e}, projected gradient {:.3e}, penalty {:.1e}, {} inner",
                outer, objective, viol, inner.projected_grad, rho, inner.iterations
            );

            if self.is_better(viol, objective, &best) {
                best.x = x.clone();
                best.objective = objective;
                best.max_violation = viol;
                best.iterations = outer;
            }

            let settled = prev_obj.map_or(false, |p| {
                (objective - p).abs() <= self.params.objective_tol * (1.0 + objective.abs())
            });

            if viol <= self.params.constraint_tol
                && (inner.projected_grad <= self.params.optimality_tol || settled)
            {
                info!(
                    "NLP converged after {} outer iterations: objective {:.6e}, violation {:.3e}",
                    outer, objective, viol
                );
                return Ok(Solution {
                    x,
                    objective,
                    max_violation: viol,
                    iterations: outer,
                    history,
                });
            }

            mult.update(&layout, &x, rho);

            if viol > VIOLATION_DECREASE * prev_viol {
                rho = (rho * self.params.penalty_growth).min(self.params.max_penalty);
            }
            prev_viol = viol;
            prev_obj = Some(objective);
        }

        warn!(
            "NLP did not converge after {} outer iterations, best violation {:.3e}",
            self.params.max_outer_iterations, best.max_violation
        );

        best.history = history;
        Err(SolverError::NotConverged {
            reason: format!(
                "outer iteration limit ({}) reached",
                self.params.max_outer_iterations
            ),
            best: Box::new(best),
        })
    }
}

impl<'a> Layout<'a> {
    fn new(problem: &'a Problem) -> Self {
        let mut offsets = Vec::with_capacity(problem.constraints.len());
        let mut next_row = 0;
        for c in problem.constraints.iter() {
            offsets.push(next_row);
            next_row += c.block.dim();
        }

        let free: Vec<usize> = problem
            .variables
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_fixed())
            .map(|(i, _)| i)
            .collect();

        let base = problem
            .variables
            .iter()
            .map(|v| if v.is_fixed() { v.lower } else { v.initial })
            .collect();

        let lower = free.iter().map(|&i| problem.variables[i].lower).collect();
        let upper = free.iter().map(|&i| problem.variables[i].upper).collect();

        // ---- SPARSITY ----

        let mut slot = vec![None; problem.num_variables()];
        for (k, &i) in free.iter().enumerate() {
            slot[i] = Some(k);
        }

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); free.len()];
        let coupled = problem
            .constraints
            .iter()
            .map(|c| c.block.vars())
            .chain(problem.objective.iter().filter(|b| b.has_hessian()).map(|b| b.vars()));

        for vars in coupled {
            let local: Vec<usize> = vars.iter().filter_map(|&i| slot[i]).collect();
            for &a in local.iter() {
                adjacency[a].extend(local.iter().cloned().filter(|&b| b != a));
            }
        }
        for a in adjacency.iter_mut() {
            a.sort_unstable();
            a.dedup();
        }

        let order = reverse_cuthill_mckee(&adjacency);
        let rank = invert(&order);
        let neighbours: Vec<Vec<usize>> = order
            .iter()
            .map(|&k| adjacency[k].iter().map(|&j| rank[j]).collect())
            .collect();
        let profile = SkylineMatrix::from_neighbours(&neighbours);
        let row = slot.iter().map(|s| s.map(|k| rank[k])).collect();

        Self {
            problem,
            offsets,
            free,
            base,
            lower,
            upper,
            rank,
            row,
            profile,
        }
    }

    /// Full point from the free variables.
    fn expand(&self, z: &[f64]) -> Vec<f64> {
        let mut x = self.base.clone();
        for (k, &i) in self.free.iter().enumerate() {
            x[i] = z[k];
        }
        x
    }

    /// Free variable `k` at `value` moved into its bounds.
    fn clamp(&self, k: usize, value: f64) -> f64 {
        value.max(self.lower[k]).min(self.upper[k])
    }

    fn project(&self, z: &mut [f64]) {
        for (k, v) in z.iter_mut().enumerate() {
            *v = self.clamp(k, *v);
        }
    }

    /// Infinity norm of the gradient projected on the bounds.
    fn projected_gradient(&self, z: &[f64], grad: &[f64]) -> f64 {
        z.iter()
            .zip(grad.iter())
            .enumerate()
            .map(|(k, (zk, gk))| (zk - self.clamp(k, zk - gk)).abs())
            .fold(0.0, f64::max)
    }

    /// Value of every constraint block, evaluated in parallel.
    fn constraint_evals(&self, x: &[f64], with_jac: bool) -> Vec<BlockEval> {
        self.problem
            .constraints
            .par_iter()
            .map(|c| BlockEval::new(c.block.as_ref(), x, with_jac))
            .collect()
    }

    /// Augmented Lagrangian at a full point, with its gradient over the full
    /// point if requested.
    fn merit(
        &self,
        x: &[f64],
        mult: &Multipliers,
        rho: f64,
        with_grad: bool,
    ) -> (f64, Option<Vec<f64>>) {
        let mut grad = if with_grad { Some(vec![0.0; x.len()]) } else { None };
        let mut merit = 0.0;

        // ---- OBJECTIVE ----

        let objective: Vec<BlockEval> = self
            .problem
            .objective
            .par_iter()
            .map(|b| BlockEval::new(b.as_ref(), x, with_grad))
            .collect();

        for (block, eval) in self.problem.objective.iter().zip(objective.iter()) {
            for (r, value) in eval.values.iter().enumerate() {
                merit += value;
                if let Some(g) = grad.as_mut() {
                    eval.accumulate(block.as_ref(), r, 1.0, g);
                }
            }
        }

        // ---- CONSTRAINTS ----

        let constraints = self.constraint_evals(x, with_grad);

        for (ci, (c, eval)) in self.problem.constraints.iter().zip(constraints.iter()).enumerate() {
            for (r, g_val) in eval.values.iter().enumerate() {
                let term = row_term(*g_val, c.lower[r], c.upper[r], mult, self.offsets[ci] + r, rho);
                merit += term.value;

                if let Some(g) = grad.as_mut() {
                    if term.weight != 0.0 {
                        eval.accumulate(c.block.as_ref(), r, term.weight, g);
                    }
                }
            }
        }

        (merit, grad)
    }

    /// Merit, gradient and Newton matrix at a full point.
    fn newton_model(&self, x: &[f64], mult: &Multipliers, rho: f64) -> NewtonModel {
        let mut grad = vec![0.0; x.len()];
        let mut hess = self.profile.clone();
        let mut merit = 0.0;

        // ---- OBJECTIVE ----

        let objective: Vec<(BlockEval, Option<Vec<f64>>)> = self
            .problem
            .objective
            .par_iter()
            .map(|b| {
                let weights = vec![1.0; b.dim()];
                (BlockEval::new(b.as_ref(), x, true), block_hessian(b.as_ref(), x, &weights))
            })
            .collect();

        for (block, (eval, curvature)) in self.problem.objective.iter().zip(objective.iter()) {
            for (r, value) in eval.values.iter().enumerate() {
                merit += value;
                eval.accumulate(block.as_ref(), r, 1.0, &mut grad);
            }
            if let Some(h) = curvature {
                self.add_local(&mut hess, block.vars(), h);
            }
        }

        // ---- CONSTRAINTS ----

        let constraints: Vec<(BlockEval, Vec<RowTerm>, Option<Vec<f64>>)> = self
            .problem
            .constraints
            .par_iter()
            .enumerate()
            .map(|(ci, c)| {
                let eval = BlockEval::new(c.block.as_ref(), x, true);
                let terms: Vec<RowTerm> = eval
                    .values
                    .iter()
                    .enumerate()
                    .map(|(r, g)| row_term(*g, c.lower[r], c.upper[r], mult, self.offsets[ci] + r, rho))
                    .collect();
                let weights: Vec<f64> = terms.iter().map(|t| t.weight).collect();
                let curvature = block_hessian(c.block.as_ref(), x, &weights);

                (eval, terms, curvature)
            })
            .collect();

        for (c, (eval, terms, curvature)) in self.problem.constraints.iter().zip(constraints.iter()) {
            let block = c.block.as_ref();

            for (r, term) in terms.iter().enumerate() {
                merit += term.value;
                if term.weight != 0.0 {
                    eval.accumulate(block, r, term.weight, &mut grad);
                }
                if term.curvature != 0.0 {
                    if let Some(row) = eval.jac_row(block, r) {
                        self.add_outer(&mut hess, block.vars(), row, term.curvature);
                    }
                }
            }
            if let Some(h) = curvature {
                self.add_local(&mut hess, block.vars(), h);
            }
        }

        NewtonModel {
            merit,
            grad: self.free.iter().map(|&i| grad[i]).collect(),
            hess,
        }
    }

    /// Add `weight * row * row^T` over the block's variables.
    fn add_outer(&self, hess: &mut SkylineMatrix, vars: &[usize], row: &[f64], weight: f64) {
        for (a, &va) in vars.iter().enumerate() {
            let ra = match self.row[va] {
                Some(r) if row[a] != 0.0 => r,
                _ => continue,
            };
            for (b, &vb) in vars.iter().enumerate().take(a + 1) {
                if let Some(rb) = self.row[vb] {
                    hess.add(ra, rb, weight * row[a] * row[b]);
                }
            }
        }
    }

    /// Add a dense block Hessian over the block's variables.
    fn add_local(&self, hess: &mut SkylineMatrix, vars: &[usize], local: &[f64]) {
        let n = vars.len();
        for (a, &va) in vars.iter().enumerate() {
            let ra = match self.row[va] {
                Some(r) => r,
                None => continue,
            };
            for (b, &vb) in vars.iter().enumerate().take(a + 1) {
                if let Some(rb) = self.row[vb] {
                    hess.add(ra, rb, local[a * n + b]);
                }
            }
        }
    }
}

impl Multipliers {
    fn new(num_rows: usize) -> Self {
        Self {
            eq: vec![0.0; num_rows],
            lower: vec![0.0; num_rows],
            upper: vec![0.0; num_rows],
        }
    }

    /// First order multiplier update at the minimiser of a subproblem.
    fn update(&mut self, layout: &Layout, x: &[f64], rho: f64) {
        let evals = layout.constraint_evals(x, false);

        for (ci, (c, eval)) in layout.problem.constraints.iter().zip(evals.iter()).enumerate() {
            for (r, g) in eval.values.iter().enumerate() {
                let row = layout.offsets[ci] + r;
                let (lo, hi) = (c.lower[r], c.upper[r]);

                if lo == hi {
                    self.eq[row] += rho * (g - lo);
                    continue;
                }
                if lo.is_finite() {
                    self.lower[row] = (self.lower[row] + rho * (lo - g)).max(0.0);
                }
                if hi.is_finite() {
                    self.upper[row] = (self.upper[row] + rho * (g - hi)).max(0.0);
                }
            }
        }
    }
}

impl BlockEval {
    fn new(block: &dyn Block, x: &[f64], with_jac: bool) -> Self {
        let local = gather(block, x);
        let mut values = vec![0.0; block.dim()];
        block.eval(&local, &mut values);

        let jac = if with_jac {
            let mut jac = vec![0.0; block.dim() * local.len()];
            block.jacobian(&local, &mut jac);
            Some(jac)
        } else {
            None
        };

        Self { values, jac }
    }

    /// Row `r` of the Jacobian.
    fn jac_row(&self, block: &dyn Block, r: usize) -> Option<&[f64]> {
        let n = block.vars().len();
        self.jac.as_ref().map(|jac| &jac[r * n..(r + 1) * n])
    }

    /// Add `weight` times row `r` of the Jacobian into the full gradient.
    fn accumulate(&self, block: &dyn Block, r: usize, weight: f64, grad: &mut [f64]) {
        if let Some(row) = self.jac_row(block, r) {
            for (&i, d) in block.vars().iter().zip(row.iter()) {
                grad[i] += weight * d;
            }
        }
    }
}

impl Subproblem<'_> {
    fn check_cancel(&self) -> Result<(), ArgminError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(ArgminError::msg(CANCELLED_MSG))
        } else {
            Ok(())
        }
    }
}

impl CostFunction for Subproblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> Result<Self::Output, ArgminError> {
        self.check_cancel()?;

        let x = self.layout.expand(z);
        let (merit, _) = self.layout.merit(&x, self.mult, self.rho, false);

        // Rejected by the line search
        Ok(if merit.is_finite() { merit } else { f64::INFINITY })
    }
}

impl Gradient for Subproblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, z: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        self.check_cancel()?;

        let x = self.layout.expand(z);
        let (merit, grad) = self.layout.merit(&x, self.mult, self.rho, true);
        let grad = grad.unwrap_or_default();

        if !merit.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return Err(ArgminError::msg("non-finite gradient"));
        }

        Ok(self.layout.free.iter().map(|&i| grad[i]).collect())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Weighted Hessian of a block at a full point, `None` if the block has no
/// curvature to offer or every weight is zero.
fn block_hessian(block: &dyn Block, x: &[f64], weights: &[f64]) -> Option<Vec<f64>> {
    if !block.has_hessian() || weights.iter().all(|w| *w == 0.0) {
        return None;
    }

    let local = gather(block, x);
    let mut hess = vec![0.0; local.len() * local.len()];
    block.weighted_hessian(&local, weights, &mut hess);

    if hess.iter().all(|h| h.is_finite()) {
        Some(hess)
    } else {
        None
    }
}

/// Augmented Lagrangian term of a constraint output `g`.
fn row_term(g: f64, lo: f64, hi: f64, mult: &Multipliers, row: usize, rho: f64) -> RowTerm {
    if lo == hi {
        let c = g - lo;
        return RowTerm {
            value: mult.eq[row] * c + 0.5 * rho * c * c,
            weight: mult.eq[row] + rho * c,
            curvature: rho,
        };
    }

    let mut term = RowTerm::default();

    if lo.is_finite() {
        let (value, slope) = inequality_term(lo - g, mult.lower[row], rho);
        term.value += value;
        term.weight -= slope;
        if slope > 0.0 {
            term.curvature += rho;
        }
    }
    if hi.is_finite() {
        let (value, slope) = inequality_term(g - hi, mult.upper[row], rho);
        term.value += value;
        term.weight += slope;
        if slope > 0.0 {
            term.curvature += rho;
        }
    }

    term
}

/// Merit term of an inequality `h <= 0` with multiplier `mu`, and its
/// derivative with respect to `h`.
fn inequality_term(h: f64, mu: f64, rho: f64) -> (f64, f64) {
    let shifted = mu + rho * h;

    if shifted > 0.0 {
        (mu * h + 0.5 * rho * h * h, shifted)
    } else {
        (-0.5 * mu * mu / rho, 0.0)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nlp::test::boxed;
    use crate::nlp::{Constraint, Variable};

    #[test]
    fn test_equality_constrained_quadratic() {
        // min x^2 + y^2 s.t. x + y = 1
        let problem = Problem {
            variables: vec![Variable::free(0.0), Variable::free(3.0)],
            objective: vec![boxed(vec![0, 1], 1, |x, out| out[0] = x[0] * x[0] + x[1] * x[1])],
            constraints: vec![Constraint::equality(boxed(vec![0, 1], 1, |x, out| {
                out[0] = x[0] + x[1] - 1.0
            }))],
        };

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();

        assert!((sol.x[0] - 0.5).abs() < 1e-4);
        assert!((sol.x[1] - 0.5).abs() < 1e-4);
        assert!(sol.max_violation <= 1e-6);
        assert_eq!(sol.history.len(), sol.iterations);
    }

    #[test]
    fn test_inequality_and_bounds() {
        // min x + y s.t. x * y >= 1, 0.1 <= x, y <= 10
        let problem = Problem {
            variables: vec![Variable::new(0.1, 10.0, 3.0), Variable::new(0.1, 10.0, 2.0)],
            objective: vec![boxed(vec![0, 1], 1, |x, out| out[0] = x[0] + x[1])],
            constraints: vec![Constraint::ranged(
                boxed(vec![0, 1], 1, |x, out| out[0] = x[0] * x[1]),
                vec![1.0],
                vec![f64::INFINITY],
            )],
        };

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();

        assert!((sol.x[0] - 1.0).abs() < 1e-3);
        assert!((sol.x[1] - 1.0).abs() < 1e-3);
        assert!((sol.objective - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_active_bound() {
        // min (x - 3)^2 s.t. x <= 1
        let problem = Problem {
            variables: vec![Variable::new(f64::NEG_INFINITY, 1.0, 0.0)],
            objective: vec![boxed(vec![0], 1, |x, out| out[0] = (x[0] - 3.0).powi(2))],
            constraints: vec![],
        };

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();
        assert!((sol.x[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_start_outside_bounds_is_projected() {
        // min (x + 5)^2 + (y - 5)^2 s.t. x + y = 0, -1 <= x, y <= 1
        let problem = Problem {
            variables: vec![Variable::new(-1.0, 1.0, 4.0), Variable::new(-1.0, 1.0, -3.0)],
            objective: vec![boxed(vec![0, 1], 1, |x, out| {
                out[0] = (x[0] + 5.0).powi(2) + (x[1] - 5.0).powi(2)
            })],
            constraints: vec![Constraint::equality(boxed(vec![0, 1], 1, |x, out| {
                out[0] = x[0] + x[1]
            }))],
        };

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();

        assert!((sol.x[0] + 1.0).abs() < 1e-6);
        assert!((sol.x[1] - 1.0).abs() < 1e-6);
        assert_eq!(sol.max_violation, 0.0);
    }

    #[test]
    fn test_fixed_variables_are_kept() {
        // min (x - y)^2 with y fixed at 2
        let problem = Problem {
            variables: vec![Variable::free(0.0), Variable::fixed(2.0)],
            objective: vec![boxed(vec![0, 1], 1, |x, out| out[0] = (x[0] - x[1]).powi(2))],
            constraints: vec![],
        };

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();
        assert_eq!(sol.x[1], 2.0);
        assert!((sol.x[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_chain_is_banded() {
        // min sum (x_i - i)^2 s.t. x_i - x_{i-1} = 1, variables shuffled
        let n = 30;
        let label = move |i: usize| (i * 11) % n;
        let mut variables = vec![Variable::free(0.0); n];
        variables[label(0)] = Variable::fixed(0.0);

        let objective = (0..n)
            .map(|i| boxed(vec![label(i)], 1, move |x, out| out[0] = (x[0] - i as f64).powi(2)))
            .collect();
        let constraints = (1..n)
            .map(|i| {
                Constraint::equality(boxed(vec![label(i - 1), label(i)], 1, |x, out| {
                    out[0] = x[1] - x[0] - 1.0
                }))
            })
            .collect();
        let problem = Problem {
            variables,
            objective,
            constraints,
        };

        let layout = Layout::new(&problem);
        // One neighbour on each side once reordered
        assert_eq!(layout.profile.stored(), 2 * (n - 1) - 1);

        let sol = AugLagSolver::new(AugLagParams::default()).solve(&problem).unwrap();
        for i in 0..n {
            assert!((sol.x[label(i)] - i as f64).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cancelled_returns_best() {
        let problem = Problem {
            variables: vec![Variable::free(5.0)],
            objective: vec![boxed(vec![0], 1, |x, out| out[0] = x[0] * x[0])],
            constraints: vec![],
        };

        let cancel = Arc::new(AtomicBool::new(true));
        let solver = AugLagSolver::with_cancel(AugLagParams::default(), cancel);

        match solver.solve(&problem) {
            Err(SolverError::Cancelled { best }) => assert_eq!(best.x, vec![5.0]),
            other => panic!("expected a cancellation, got {:?}", other.map(|s| s.x)),
        }
    }

    #[test]
    fn test_iteration_limit_returns_best() {
        let problem = Problem {
            variables: vec![Variable::free(0.0), Variable::free(0.0)],
            objective: vec![boxed(vec![0, 1], 1, |x, out| out[0] = x[0] * x[0] + x[1] * x[1])],
            constraints: vec![Constraint::equality(boxed(vec![0, 1], 1, |x, out| {
                out[0] = x[0] + x[1] - 1.0
            }))],
        };
        let params = AugLagParams {
            max_outer_iterations: 1,
            ..Default::default()
        };

        let err = AugLagSolver::new(params).solve(&problem).unwrap_err();
        let best = err.best().unwrap();

        assert!(matches!(err, SolverError::NotConverged { .. }));
        assert_eq!(best.x.len(), 2);
        // Closer to feasible than the start
        assert!(best.max_violation < 1.0);
        assert_eq!(best.history.len(), 1);
    }

    #[test]
    fn test_row_terms() {
        let mult = Multipliers::new(1);

        let eq = row_term(1.5, 1.0, 1.0, &mult, 0, 10.0);
        assert!((eq.value - 1.25).abs() < 1e-12);
        assert!((eq.weight - 5.0).abs() < 1e-12);
        assert_eq!(eq.curvature, 10.0);

        // Inactive sides of a ranged output carry no curvature
        let inside = row_term(0.5, 0.0, 1.0, &mult, 0, 10.0);
        assert_eq!(inside, RowTerm::default());

        let above = row_term(1.2, 0.0, 1.0, &mult, 0, 10.0);
        assert!((above.weight - 2.0).abs() < 1e-12);
        assert_eq!(above.curvature, 10.0);
    }
}
