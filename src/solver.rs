//! Linear programming backend.
//!
//! [`LinearProgram`] is a small builder for minimization problems with
//! bounded variables and `<=`, `>=`, `=` rows. [`SimplexSolver`] solves them
//! with a dense two-phase primal simplex that handles variable bounds
//! implicitly (nonbasic variables sit at either bound), so `0 <= y <= 1`
//! never costs an extra row.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SolverError;

/// Geometric scaling passes applied before the final row equilibration.
const SCALING_PASSES: usize = 4;
/// Two ratios closer than this are a tie (broken by smallest basic index).
const RATIO_TIE_TOLERANCE: f64 = 1e-12;

/// Handle to a variable of a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

impl Relation {
    fn flipped(self) -> Self {
        match self {
            Relation::Le => Relation::Ge,
            Relation::Ge => Relation::Le,
            Relation::Eq => Relation::Eq,
        }
    }
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    cost: f64,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Clone)]
struct Constraint {
    name: String,
    terms: Vec<(VarId, f64)>,
    relation: Relation,
    rhs: f64,
}

/// Minimize `sum(cost_j * v_j)` subject to linear rows and variable bounds.
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    vars: Vec<Variable>,
    constraints: Vec<Constraint>,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable with objective coefficient `cost` and bounds
    /// `lower <= v <= upper`. `upper` may be `f64::INFINITY`.
    pub fn add_var(&mut self, name: impl Into<String>, cost: f64, lower: f64, upper: f64) -> VarId {
        self.vars.push(Variable {
            name: name.into(),
            cost,
            lower,
            upper,
        });
        VarId(self.vars.len() - 1)
    }

    /// Add a row `sum(coef * v) <relation> rhs`. Repeated variables are summed.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: impl IntoIterator<Item = (VarId, f64)>,
        relation: Relation,
        rhs: f64,
    ) {
        self.constraints.push(Constraint {
            name: name.into(),
            terms: terms.into_iter().collect(),
            relation,
            rhs,
        });
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn var_name(&self, var: VarId) -> &str {
        &self.vars[var.0].name
    }

    /// Objective value of an assignment (indexed like the variables).
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.vars.iter().zip(values).map(|(v, x)| v.cost * x).sum()
    }

    fn check(&self) -> Result<(), SolverError> {
        for var in &self.vars {
            if !var.cost.is_finite() {
                return Err(SolverError::Numerical(format!(
                    "variable '{}' has non-finite cost",
                    var.name
                )));
            }
            if !var.lower.is_finite() || var.upper.is_nan() || var.upper < var.lower {
                return Err(SolverError::Numerical(format!(
                    "variable '{}' has invalid bounds [{}, {}]",
                    var.name, var.lower, var.upper
                )));
            }
        }
        for row in &self.constraints {
            let finite = row.rhs.is_finite() && row.terms.iter().all(|(_, c)| c.is_finite());
            if !finite {
                return Err(SolverError::Numerical(format!(
                    "constraint '{}' has non-finite coefficients",
                    row.name
                )));
            }
            if let Some((var, _)) = row.terms.iter().find(|(v, _)| v.0 >= self.vars.len()) {
                return Err(SolverError::Numerical(format!(
                    "constraint '{}' references unknown variable #{}",
                    row.name, var.0
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// Feasible but not proven optimal (backends that stop early).
    Feasible,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub status: SolveStatus,
    pub values: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

impl Solution {
    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }
}

/// Anything that can solve a [`LinearProgram`].
pub trait LinearSolver {
    fn solve(&self, lp: &LinearProgram) -> Result<Solution, SolverError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplexConfig {
    /// Pivots (and bound flips) across both phases.
    pub max_iterations: usize,
    /// Smallest tableau entry accepted as a pivot.
    pub pivot_tolerance: f64,
    /// Phase 1 residual allowed, relative to the largest rhs.
    pub feasibility_tolerance: f64,
    /// Reduced cost magnitude below which a column does not enter.
    pub optimality_tolerance: f64,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            pivot_tolerance: 1e-9,
            feasibility_tolerance: 1e-9,
            optimality_tolerance: 1e-9,
        }
    }
}

/// Dense bounded-variable primal simplex with Bland's rule.
#[derive(Debug, Clone, Default)]
pub struct SimplexSolver {
    config: SimplexConfig,
}

impl SimplexSolver {
    pub fn new(config: SimplexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimplexConfig {
        &self.config
    }
}

impl LinearSolver for SimplexSolver {
    fn solve(&self, lp: &LinearProgram) -> Result<Solution, SolverError> {
        lp.check()?;
        let config = &self.config;
        let n = lp.vars.len();
        let m = lp.constraints.len();

        let lower: Vec<f64> = lp.vars.iter().map(|v| v.lower).collect();
        let upper: Vec<f64> = lp.vars.iter().map(|v| v.upper).collect();

        // Dense rows with lower bounds shifted to zero.
        let mut a = vec![vec![0.0; n]; m];
        let mut b = vec![0.0; m];
        let mut relations = Vec::with_capacity(m);
        for (i, row) in lp.constraints.iter().enumerate() {
            for &(var, coef) in &row.terms {
                a[i][var.0] += coef;
            }
            let shift: f64 = a[i].iter().zip(&lower).map(|(c, l)| c * l).sum();
            b[i] = row.rhs - shift;
            relations.push(row.relation);
        }

        let scaling = Scaling::compute(&a, n);
        let mut rhs: Vec<f64> = b.iter().zip(&scaling.rows).map(|(v, r)| v * r).collect();
        let mut rows: Vec<Vec<f64>> = a
            .iter()
            .zip(&scaling.rows)
            .map(|(row, r)| row.iter().zip(&scaling.cols).map(|(v, c)| v * r * c).collect::<Vec<f64>>())
            .collect();

        let mut costs: Vec<f64> = lp
            .vars
            .iter()
            .zip(&scaling.cols)
            .map(|(v, c)| v.cost * c)
            .collect();
        let cost_max = costs.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
        if cost_max > 0.0 {
            costs.iter_mut().for_each(|c| *c /= cost_max);
        }

        for i in 0..m {
            if rhs[i] < 0.0 {
                rhs[i] = -rhs[i];
                rows[i].iter_mut().for_each(|v| *v = -*v);
                relations[i] = relations[i].flipped();
            }
        }

        // Structural columns, then slack/surplus columns, then artificials.
        let slack_count = relations.iter().filter(|r| **r != Relation::Eq).count();
        let artificial_count = relations.iter().filter(|r| **r != Relation::Le).count();
        let ncols = n + slack_count + artificial_count;

        let mut col_upper: Vec<f64> = upper
            .iter()
            .zip(&lower)
            .zip(&scaling.cols)
            .map(|((u, l), c)| (u - l) / c)
            .collect();
        col_upper.resize(ncols, f64::INFINITY);
        costs.resize(ncols, 0.0);
        rows.iter_mut().for_each(|row| row.resize(ncols, 0.0));

        let mut basis = vec![0; m];
        let mut artificial = vec![false; ncols];
        let mut next = n;
        for i in 0..m {
            match relations[i] {
                Relation::Le => {
                    rows[i][next] = 1.0;
                    basis[i] = next;
                    next += 1;
                }
                Relation::Ge => {
                    rows[i][next] = -1.0;
                    next += 1;
                }
                Relation::Eq => {}
            }
        }
        for i in 0..m {
            if relations[i] != Relation::Le {
                rows[i][next] = 1.0;
                basis[i] = next;
                artificial[next] = true;
                next += 1;
            }
        }

        let rhs_max = rhs.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        let mut tableau = Tableau::new(rows, rhs, basis, col_upper);

        if artificial_count > 0 {
            let phase_one: Vec<f64> = artificial
                .iter()
                .map(|&art| if art { 1.0 } else { 0.0 })
                .collect();
            tableau.optimize(&phase_one, config)?;

            let residual: f64 = tableau
                .basis
                .iter()
                .zip(&tableau.beta)
                .filter(|(col, _)| artificial[**col])
                .map(|(_, value)| *value)
                .sum();
            if residual > config.feasibility_tolerance * (1.0 + rhs_max) {
                debug!(residual, iterations = tableau.iterations, "phase 1 left artificials positive");
                return Err(SolverError::Infeasible { residual });
            }

            for (col, _) in artificial.iter().enumerate().filter(|(_, art)| **art) {
                tableau.upper[col] = 0.0;
                tableau.blocked[col] = true;
            }
            tableau.drive_out(&artificial, config.pivot_tolerance);
        }

        tableau.optimize(&costs, config)?;

        let mut scaled = vec![0.0; ncols];
        for (col, value) in scaled.iter_mut().enumerate() {
            if tableau.at_upper[col] {
                *value = tableau.upper[col];
            }
        }
        for (row, &col) in tableau.basis.iter().enumerate() {
            scaled[col] = tableau.beta[row];
        }

        let values: Vec<f64> = (0..n)
            .map(|j| (lower[j] + scaled[j] * scaling.cols[j]).clamp(lower[j], upper[j]))
            .collect();
        let objective = lp.objective_value(&values);

        debug!(
            rows = m,
            columns = ncols,
            iterations = tableau.iterations,
            objective,
            "simplex converged"
        );

        Ok(Solution {
            status: SolveStatus::Optimal,
            values,
            objective,
            iterations: tableau.iterations,
        })
    }
}

struct Scaling {
    rows: Vec<f64>,
    cols: Vec<f64>,
}

impl Scaling {
    fn compute(a: &[Vec<f64>], n: usize) -> Self {
        let m = a.len();
        let mut rows = vec![1.0; m];
        let mut cols = vec![1.0; n];

        for _ in 0..SCALING_PASSES {
            for i in 0..m {
                let magnitudes = (0..n).filter(|&j| a[i][j] != 0.0).map(|j| (a[i][j] * cols[j]).abs());
                if let Some((lo, hi)) = extremes(magnitudes) {
                    rows[i] = 1.0 / (lo * hi).sqrt();
                }
            }
            for j in 0..n {
                let magnitudes = (0..m).filter(|&i| a[i][j] != 0.0).map(|i| (a[i][j] * rows[i]).abs());
                if let Some((lo, hi)) = extremes(magnitudes) {
                    cols[j] = 1.0 / (lo * hi).sqrt();
                }
            }
        }
        for i in 0..m {
            let magnitudes = (0..n).filter(|&j| a[i][j] != 0.0).map(|j| (a[i][j] * cols[j]).abs());
            if let Some((_, hi)) = extremes(magnitudes) {
                rows[i] = 1.0 / hi;
            }
        }

        Scaling { rows, cols }
    }
}

fn extremes(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Dense tableau `B^-1 A` with basic values kept apart in `beta`.
struct Tableau {
    rows: Vec<Vec<f64>>,
    beta: Vec<f64>,
    basis: Vec<usize>,
    upper: Vec<f64>,
    at_upper: Vec<bool>,
    blocked: Vec<bool>,
    is_basic: Vec<bool>,
    iterations: usize,
}

impl Tableau {
    fn new(rows: Vec<Vec<f64>>, beta: Vec<f64>, basis: Vec<usize>, upper: Vec<f64>) -> Self {
        let ncols = upper.len();
        let mut is_basic = vec![false; ncols];
        for &col in &basis {
            is_basic[col] = true;
        }
        Self {
            rows,
            beta,
            basis,
            upper,
            at_upper: vec![false; ncols],
            blocked: vec![false; ncols],
            is_basic,
            iterations: 0,
        }
    }

    fn optimize(&mut self, cost: &[f64], config: &SimplexConfig) -> Result<(), SolverError> {
        let mut reduced: Vec<f64> = (0..cost.len())
            .map(|j| {
                let priced: f64 = self
                    .basis
                    .iter()
                    .zip(&self.rows)
                    .map(|(&col, row)| cost[col] * row[j])
                    .sum();
                cost[j] - priced
            })
            .collect();

        loop {
            let Some(entering) = self.entering(&reduced, config.optimality_tolerance) else {
                return Ok(());
            };
            if self.iterations >= config.max_iterations {
                return Err(SolverError::IterationLimit {
                    iterations: self.iterations,
                });
            }
            self.iterations += 1;

            let direction = if self.at_upper[entering] { -1.0 } else { 1.0 };
            let (theta, leaving) = self.ratio_test(entering, direction, config.pivot_tolerance);
            if theta.is_infinite() {
                return Err(SolverError::Unbounded);
            }

            for (value, row) in self.beta.iter_mut().zip(&self.rows) {
                *value -= direction * theta * row[entering];
            }

            match leaving {
                None => self.at_upper[entering] = !self.at_upper[entering],
                Some((row, to_upper)) => {
                    let old = self.basis[row];
                    self.at_upper[old] = to_upper;
                    let value = if direction > 0.0 {
                        theta
                    } else {
                        self.upper[entering] - theta
                    };
                    self.pivot(row, entering, value);

                    let factor = reduced[entering];
                    for (d, t) in reduced.iter_mut().zip(&self.rows[row]) {
                        *d -= factor * t;
                    }
                }
            }
        }
    }

    // Bland: first eligible column by index.
    fn entering(&self, reduced: &[f64], tolerance: f64) -> Option<usize> {
        (0..reduced.len()).find(|&j| {
            if self.is_basic[j] || self.blocked[j] || self.upper[j] <= 0.0 {
                return false;
            }
            if self.at_upper[j] {
                reduced[j] > tolerance
            } else {
                reduced[j] < -tolerance
            }
        })
    }

    /// Step length and leaving row (with the bound the leaving variable hits).
    /// `None` means the entering variable flips to its other bound.
    fn ratio_test(&self, entering: usize, direction: f64, pivot_tolerance: f64) -> (f64, Option<(usize, bool)>) {
        let mut theta = self.upper[entering];
        let mut leaving: Option<(usize, bool)> = None;

        for (i, row) in self.rows.iter().enumerate() {
            let alpha = direction * row[entering];
            let basic = self.basis[i];
            let (ratio, to_upper) = if alpha > pivot_tolerance {
                (self.beta[i].max(0.0) / alpha, false)
            } else if alpha < -pivot_tolerance && self.upper[basic].is_finite() {
                ((self.upper[basic] - self.beta[i]).max(0.0) / -alpha, true)
            } else {
                continue;
            };

            let tie_wins = matches!(leaving, Some((r, _))
                if (ratio - theta).abs() <= RATIO_TIE_TOLERANCE && basic < self.basis[r]);
            if ratio < theta - RATIO_TIE_TOLERANCE || tie_wins {
                theta = ratio;
                leaving = Some((i, to_upper));
            }
        }

        (theta, leaving)
    }

    fn pivot(&mut self, row: usize, col: usize, value: f64) {
        let p = self.rows[row][col];
        self.rows[row].iter_mut().for_each(|t| *t /= p);
        let pivot_row = self.rows[row].clone();
        for (i, other) in self.rows.iter_mut().enumerate() {
            let factor = other[col];
            if i == row || factor == 0.0 {
                continue;
            }
            for (t, p) in other.iter_mut().zip(&pivot_row) {
                *t -= factor * p;
            }
        }

        let old = self.basis[row];
        self.is_basic[old] = false;
        self.basis[row] = col;
        self.is_basic[col] = true;
        self.at_upper[col] = false;
        self.beta[row] = value;
    }

    /// Swap zero-valued basic artificials for structural/slack columns.
    /// Rows with no usable column are redundant and keep their artificial.
    fn drive_out(&mut self, artificial: &[bool], pivot_tolerance: f64) {
        for row in 0..self.basis.len() {
            if !artificial[self.basis[row]] {
                continue;
            }
            let replacement = (0..artificial.len()).find(|&j| {
                !artificial[j] && !self.is_basic[j] && self.rows[row][j].abs() > pivot_tolerance
            });
            if let Some(col) = replacement {
                let value = if self.at_upper[col] { self.upper[col] } else { 0.0 };
                self.pivot(row, col, value);
            }
        }
    }
}
