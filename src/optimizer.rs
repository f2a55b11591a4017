//! Rebalance optimizer.
//!
//! Builds the continuous model
//!
//! ```text
//! minimize   Σ_i u_i + λ Σ_j size_j y_j / risk_sum_j
//! subject to x_i = Σ_{j in i} size_j y_j        (per sector)
//!            X   = Σ_j size_j y_j
//!            t   = C_total + X
//!            X  <= budget
//!            u_i >= ±((baseline_i + x_i) - target_i t)
//!            0 <= y_j <= 1
//! ```
//!
//! and hands it to a [`LinearSolver`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deals::Deal;
use crate::error::{RebalanceError, ValidationError};
use crate::planner::{PortfolioBaseline, TargetWeights, WEIGHT_SUM_TOLERANCE};
use crate::sector::Sector;
use crate::solver::{LinearProgram, LinearSolver, Relation, SimplexSolver, SolveStatus, VarId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Weight of the risk-adjusted cost term against the deviation term.
    pub risk_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { risk_weight: 1.0 }
    }
}

/// Inputs of one optimization run.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceProblem<'a> {
    pub universe: &'a [Sector],
    pub baseline: &'a PortfolioBaseline,
    pub targets: &'a TargetWeights,
    pub deals: &'a [Deal],
    /// Maximum new investment.
    pub budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealFraction {
    pub deal_id: String,
    pub fraction: f64,
}

/// Solver output: one fraction per deal, in deal input order.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationPlan {
    pub fractions: Vec<DealFraction>,
    pub status: SolveStatus,
    pub objective: f64,
}

impl AllocationPlan {
    pub fn fraction(&self, deal_id: &str) -> Option<f64> {
        self.fractions
            .iter()
            .find(|f| f.deal_id == deal_id)
            .map(|f| f.fraction)
    }
}

pub struct RebalanceOptimizer<S = SimplexSolver> {
    solver: S,
    config: OptimizerConfig,
}

impl Default for RebalanceOptimizer<SimplexSolver> {
    fn default() -> Self {
        Self::new(SimplexSolver::default(), OptimizerConfig::default())
    }
}

impl<S: LinearSolver> RebalanceOptimizer<S> {
    pub fn new(solver: S, config: OptimizerConfig) -> Self {
        Self { solver, config }
    }

    /// Validate the problem, build the model, solve it and read back `y_j`.
    pub fn optimize(&self, problem: &RebalanceProblem<'_>) -> Result<AllocationPlan, RebalanceError> {
        let universe = validate(problem)?;
        let model = RebalanceModel::build(problem, &universe, self.config.risk_weight);

        info!(
            deals = problem.deals.len(),
            sectors = universe.len(),
            budget = problem.budget,
            variables = model.lp.num_vars(),
            constraints = model.lp.num_constraints(),
            "solving rebalancing model"
        );
        let solution = self.solver.solve(&model.lp)?;

        let fractions: Vec<DealFraction> = problem
            .deals
            .iter()
            .zip(&model.fractions)
            .map(|(deal, var)| DealFraction {
                deal_id: deal.deal_id().to_string(),
                fraction: solution.value(*var).clamp(0.0, 1.0),
            })
            .collect();

        let invested: f64 = problem
            .deals
            .iter()
            .zip(&fractions)
            .map(|(deal, f)| deal.size() * f.fraction)
            .sum();
        info!(
            status = ?solution.status,
            objective = solution.objective,
            iterations = solution.iterations,
            invested,
            "rebalancing model solved"
        );

        Ok(AllocationPlan {
            fractions,
            status: solution.status,
            objective: solution.objective,
        })
    }
}

/// Check every invariant the model relies on; returns the universe as a set.
fn validate(problem: &RebalanceProblem<'_>) -> Result<BTreeSet<Sector>, ValidationError> {
    if !(problem.budget.is_finite() && problem.budget > 0.0) {
        return Err(ValidationError::InvalidBudget(problem.budget));
    }
    let universe: BTreeSet<Sector> = problem.universe.iter().copied().collect();
    if universe.is_empty() {
        return Err(ValidationError::EmptyUniverse);
    }

    let mut weight_sum = 0.0;
    for &sector in &universe {
        if problem.baseline.get(sector).is_none() {
            return Err(ValidationError::MissingBaseline(sector));
        }
        weight_sum += problem
            .targets
            .get(sector)
            .ok_or(ValidationError::MissingTarget(sector))?;
    }
    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ValidationError::TargetWeightSum { sum: weight_sum });
    }

    let mut seen = HashSet::new();
    for deal in problem.deals {
        if !universe.contains(&deal.sector()) {
            return Err(ValidationError::DealSectorOutsideUniverse {
                deal_id: deal.deal_id().to_string(),
                sector: deal.sector(),
            });
        }
        if !seen.insert(deal.deal_id()) {
            return Err(ValidationError::DuplicateDeal(deal.deal_id().to_string()));
        }
    }

    Ok(universe)
}

struct RebalanceModel {
    lp: LinearProgram,
    /// `y_j`, parallel to the problem's deals.
    fractions: Vec<VarId>,
}

impl RebalanceModel {
    fn build(problem: &RebalanceProblem<'_>, universe: &BTreeSet<Sector>, risk_weight: f64) -> Self {
        let mut lp = LinearProgram::new();
        let inf = f64::INFINITY;

        let fractions: Vec<VarId> = problem
            .deals
            .iter()
            .map(|deal| {
                let cost = risk_weight * deal.size() / deal.risk_sum();
                lp.add_var(format!("y[{}]", deal.deal_id()), cost, 0.0, 1.0)
            })
            .collect();
        let sector_new: BTreeMap<Sector, VarId> = universe
            .iter()
            .map(|s| (*s, lp.add_var(format!("x[{s}]"), 0.0, 0.0, inf)))
            .collect();
        let invested = lp.add_var("X", 0.0, 0.0, inf);
        let total = lp.add_var("t", 0.0, 0.0, inf);
        let deviation: BTreeMap<Sector, VarId> = universe
            .iter()
            .map(|s| (*s, lp.add_var(format!("u[{s}]"), 1.0, 0.0, inf)))
            .collect();

        for (&sector, &x) in &sector_new {
            let terms = problem
                .deals
                .iter()
                .zip(&fractions)
                .filter(|(deal, _)| deal.sector() == sector)
                .map(|(deal, y)| (*y, -deal.size()));
            lp.add_constraint(
                format!("sector_new[{sector}]"),
                std::iter::once((x, 1.0)).chain(terms),
                Relation::Eq,
                0.0,
            );
        }

        let all_terms = problem
            .deals
            .iter()
            .zip(&fractions)
            .map(|(deal, y)| (*y, -deal.size()));
        lp.add_constraint(
            "invested",
            std::iter::once((invested, 1.0)).chain(all_terms),
            Relation::Eq,
            0.0,
        );

        let current_total: f64 = universe
            .iter()
            .filter_map(|s| problem.baseline.get(*s))
            .sum();
        lp.add_constraint(
            "total",
            [(total, 1.0), (invested, -1.0)],
            Relation::Eq,
            current_total,
        );
        lp.add_constraint("budget", [(invested, 1.0)], Relation::Le, problem.budget);

        // (baseline + x) - target * t <= u  and  -((baseline + x) - target * t) <= u
        for &sector in universe {
            let x = sector_new[&sector];
            let u = deviation[&sector];
            let base = problem.baseline.get(sector).unwrap_or(0.0);
            let target = problem.targets.get(sector).unwrap_or(0.0);
            lp.add_constraint(
                format!("over[{sector}]"),
                [(x, 1.0), (total, -target), (u, -1.0)],
                Relation::Le,
                -base,
            );
            lp.add_constraint(
                format!("under[{sector}]"),
                [(x, -1.0), (total, target), (u, -1.0)],
                Relation::Le,
                base,
            );
        }

        RebalanceModel { lp, fractions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;
    use crate::solver::{SimplexConfig, Solution};
    use proptest::prelude::*;

    struct Fixture {
        universe: Vec<Sector>,
        baseline: PortfolioBaseline,
        targets: TargetWeights,
        deals: Vec<Deal>,
        budget: f64,
    }

    impl Fixture {
        fn problem(&self) -> RebalanceProblem<'_> {
            RebalanceProblem {
                universe: &self.universe,
                baseline: &self.baseline,
                targets: &self.targets,
                deals: &self.deals,
                budget: self.budget,
            }
        }
    }

    fn scenario_a() -> Fixture {
        Fixture {
            universe: vec![Sector::Retail, Sector::Defence, Sector::Financial],
            baseline: PortfolioBaseline::new(
                [
                    (Sector::Retail, 7_000_000.0),
                    (Sector::Defence, 0.0),
                    (Sector::Financial, 2_000_000.0),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap(),
            targets: TargetWeights::new(
                [
                    (Sector::Retail, 0.5),
                    (Sector::Defence, 0.3),
                    (Sector::Financial, 0.2),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap(),
            deals: vec![
                Deal::new("D1", Sector::Retail, 5_000_000.0, 2.0, 3.0, 4.0).unwrap(),
                Deal::new("D2", Sector::Defence, 4_000_000.0, 5.0, 5.0, 5.0).unwrap(),
                Deal::new("D3", Sector::Financial, 3_000_000.0, 1.0, 2.0, 2.0).unwrap(),
            ],
            budget: 6_000_000.0,
        }
    }

    #[test]
    fn scenario_a_tops_up_defence_first() {
        let fixture = scenario_a();
        let plan = RebalanceOptimizer::default().optimize(&fixture.problem()).unwrap();

        assert_eq!(plan.status, SolveStatus::Optimal);
        let y: Vec<f64> = plan.fractions.iter().map(|f| f.fraction).collect();
        assert!(y[0].abs() < 1e-6, "D1 = {}", y[0]);
        assert!((y[1] - 1.0).abs() < 1e-6, "D2 = {}", y[1]);
        assert!((y[2] - 0.25).abs() < 1e-6, "D3 = {}", y[2]);
        assert!((plan.objective - 666_666.666_666_7).abs() < 1e-3);

        let spent = 5e6 * y[0] + 4e6 * y[1] + 3e6 * y[2];
        assert!(spent <= fixture.budget * (1.0 + 1e-9));
        assert_eq!(plan.fraction("D2"), Some(y[1]));
    }

    #[test]
    fn risk_weight_scales_the_cost_term() {
        let fixture = scenario_a();
        let optimizer = RebalanceOptimizer::new(
            SimplexSolver::default(),
            OptimizerConfig { risk_weight: 0.0 },
        );
        let plan = optimizer.optimize(&fixture.problem()).unwrap();
        // Deviation alone bottoms out at 250k.
        assert!((plan.objective - 250_000.0).abs() < 1e-3);
    }

    #[test]
    fn resolving_gives_the_same_objective() {
        let fixture = scenario_a();
        let optimizer = RebalanceOptimizer::default();
        let first = optimizer.optimize(&fixture.problem()).unwrap();
        let second = optimizer.optimize(&fixture.problem()).unwrap();
        assert_eq!(first.objective, second.objective);
    }

    #[test]
    fn validation_names_the_offender() {
        let optimizer = RebalanceOptimizer::default();

        let mut f = scenario_a();
        f.universe.push(Sector::CleanEnergy);
        assert_eq!(
            optimizer.optimize(&f.problem()).unwrap_err().to_string(),
            RebalanceError::from(ValidationError::MissingBaseline(Sector::CleanEnergy)).to_string()
        );

        let mut f = scenario_a();
        f.baseline = PortfolioBaseline::new(
            Sector::ALL.iter().map(|s| (*s, 1.0)).collect(),
        )
        .unwrap();
        f.universe.push(Sector::CleanEnergy);
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::MissingTarget(Sector::CleanEnergy)))
        ));

        let mut f = scenario_a();
        f.deals.push(Deal::new("D4", Sector::Retail, 1.0, 1.0, 1.0, 1.0).unwrap());
        f.deals.push(Deal::new("D4", Sector::Retail, 2.0, 1.0, 1.0, 1.0).unwrap());
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::DuplicateDeal(id))) if id == "D4"
        ));

        let mut f = scenario_a();
        f.deals.push(Deal::new("Solar", Sector::CleanEnergy, 1.0, 1.0, 1.0, 1.0).unwrap());
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::DealSectorOutsideUniverse { deal_id, sector }))
                if deal_id == "Solar" && sector == Sector::CleanEnergy
        ));

        let mut f = scenario_a();
        f.budget = -1.0;
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::InvalidBudget(_)))
        ));

        let mut f = scenario_a();
        f.universe.clear();
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::EmptyUniverse))
        ));

        // Weights sum to 1 overall but not over the modelled sectors.
        let mut f = scenario_a();
        f.universe = vec![Sector::Retail, Sector::Financial];
        f.deals.remove(1);
        assert!(matches!(
            optimizer.optimize(&f.problem()),
            Err(RebalanceError::Validation(ValidationError::TargetWeightSum { .. }))
        ));
    }

    #[test]
    fn solver_failures_surface_unchanged() {
        struct Failing;
        impl LinearSolver for Failing {
            fn solve(&self, _: &LinearProgram) -> Result<Solution, SolverError> {
                Err(SolverError::Infeasible { residual: 1.0 })
            }
        }
        let fixture = scenario_a();
        let optimizer = RebalanceOptimizer::new(Failing, OptimizerConfig::default());
        assert!(matches!(
            optimizer.optimize(&fixture.problem()),
            Err(RebalanceError::Solver(SolverError::Infeasible { .. }))
        ));
    }

    #[test]
    fn iteration_cap_is_a_solver_error() {
        let fixture = scenario_a();
        let solver = SimplexSolver::new(SimplexConfig {
            max_iterations: 1,
            ..SimplexConfig::default()
        });
        let optimizer = RebalanceOptimizer::new(solver, OptimizerConfig::default());
        assert!(matches!(
            optimizer.optimize(&fixture.problem()),
            Err(RebalanceError::Solver(SolverError::IterationLimit { .. }))
        ));
    }

    fn arb_deals() -> impl Strategy<Value = Vec<Deal>> {
        let row = (0usize..4, 1e3f64..5e7, 0.1f64..10.0, 0.1f64..10.0, 0.1f64..10.0);
        proptest::collection::vec(row, 1..25).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (s, size, r1, r2, r3))| {
                    Deal::new(format!("deal-{i}"), Sector::ALL[s], size, r1, r2, r3).unwrap()
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn fractions_are_bounded_and_budget_holds(
            deals in arb_deals(),
            budget in 1e4f64..1e8,
            holdings in proptest::collection::vec(0.0f64..2e7, 4),
        ) {
            let universe: Vec<Sector> = Sector::ALL[..4].to_vec();
            let baseline = PortfolioBaseline::new(
                universe.iter().copied().zip(holdings).collect(),
            ).unwrap();
            let targets = TargetWeights::new(
                universe.iter().map(|s| (*s, 0.25)).collect(),
            ).unwrap();
            let problem = RebalanceProblem {
                universe: &universe,
                baseline: &baseline,
                targets: &targets,
                deals: &deals,
                budget,
            };
            let plan = RebalanceOptimizer::default().optimize(&problem).unwrap();

            prop_assert_eq!(plan.fractions.len(), deals.len());
            let mut spent = 0.0;
            for (deal, f) in deals.iter().zip(&plan.fractions) {
                prop_assert!((0.0..=1.0).contains(&f.fraction));
                prop_assert_eq!(f.deal_id.as_str(), deal.deal_id());
                spent += deal.size() * f.fraction;
            }
            prop_assert!(spent <= budget * (1.0 + 1e-7) + 1e-6, "spent {} of {}", spent, budget);
        }
    }
}
