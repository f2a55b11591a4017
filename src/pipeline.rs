//! One rebalancing run: ingest, plan, optimize, select.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span};

use crate::config::RebalanceConfig;
use crate::deals::{ingest_deals, load_deals_from_csv, Ingestion, IngestionSummary};
use crate::error::{IngestError, RebalanceError, Result, ValidationError};
use crate::optimizer::{RebalanceOptimizer, RebalanceProblem};
use crate::planner::{PortfolioBaseline, TargetPlanner, TargetWeights};
use crate::sector::Sector;
use crate::selector::{select, Allocation, DustSummary, SelectedDeal};
use crate::solver::{LinearSolver, SimplexSolver};
use crate::thesis::Thesis;

/// Everything a run produced, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub thesis: Thesis,
    pub budget: f64,
    pub target_weights: TargetWeights,
    pub baseline: PortfolioBaseline,
    pub synthetic_baseline: bool,
    pub deals_selected: Vec<SelectedDeal>,
    pub total_investment: f64,
    pub sector_allocation: BTreeMap<Sector, f64>,
    pub dust: DustSummary,
    pub ingestion: IngestionSummary,
    pub objective: f64,
    pub generated_at: DateTime<Utc>,
}

impl PipelineReport {
    /// The selector output this report was built from.
    pub fn allocation(&self) -> Allocation {
        Allocation {
            deals: self.deals_selected.clone(),
            total_investment: self.total_investment,
            sector_allocation: self.sector_allocation.clone(),
            dust: self.dust.clone(),
        }
    }

    /// Human-readable summary listing at most `top` deals.
    pub fn summary(&self, top: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Budget:           {:>18.2}", self.budget);
        let _ = writeln!(out, "Total investment: {:>18.2}", self.total_investment);
        let _ = writeln!(
            out,
            "Deals:            {} selected, {} loaded, {} skipped",
            self.deals_selected.len(),
            self.ingestion.loaded,
            self.ingestion.skipped
        );
        if self.dust.count > 0 {
            let _ = writeln!(
                out,
                "Dust:             {} fractions below threshold ({:.2})",
                self.dust.count, self.dust.amount
            );
        }

        if !self.deals_selected.is_empty() {
            let _ = writeln!(out, "\nTop deals:");
            for (rank, deal) in self.deals_selected.iter().take(top).enumerate() {
                let _ = writeln!(
                    out,
                    "{:>3}. {:<40} {:<22} {:>7.2}% {:>16.2}",
                    rank + 1,
                    deal.deal_id,
                    deal.sector.as_str(),
                    deal.fraction * 100.0,
                    deal.amount
                );
            }
            if self.deals_selected.len() > top {
                let _ = writeln!(out, "     ... and {} more", self.deals_selected.len() - top);
            }
        }

        if !self.sector_allocation.is_empty() {
            let _ = writeln!(out, "\nSector allocation (target):");
            for (sector, share) in &self.sector_allocation {
                let target = self.target_weights.get(*sector).unwrap_or(0.0);
                let _ = writeln!(
                    out,
                    "     {:<22} {:>7.2}%  ({:.2}%)",
                    sector.as_str(),
                    share * 100.0,
                    target * 100.0
                );
            }
        }
        out
    }
}

pub struct Pipeline<S = SimplexSolver> {
    config: RebalanceConfig,
    optimizer: RebalanceOptimizer<S>,
}

impl Pipeline<SimplexSolver> {
    pub fn new(config: RebalanceConfig) -> Self {
        let solver = SimplexSolver::new(config.solver.clone());
        Self::with_solver(config, solver)
    }
}

impl<S: LinearSolver> Pipeline<S> {
    pub fn with_solver(config: RebalanceConfig, solver: S) -> Self {
        let optimizer = RebalanceOptimizer::new(solver, config.optimizer.clone());
        Self { config, optimizer }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Run against a CSV file. `holdings` replaces the synthetic baseline.
    pub fn run(&self, thesis: &Thesis, deal_csv: &Path, holdings: Option<&PortfolioBaseline>) -> Result<PipelineReport> {
        self.run_with(thesis, holdings, |sectors| {
            load_deals_from_csv(deal_csv, Some(sectors), &self.config.ingest)
        })
    }

    /// Run against any CSV source.
    pub fn run_from_reader<R: Read>(
        &self,
        thesis: &Thesis,
        source: R,
        holdings: Option<&PortfolioBaseline>,
    ) -> Result<PipelineReport> {
        self.run_with(thesis, holdings, |sectors| {
            ingest_deals(source, Some(sectors), &self.config.ingest)
        })
    }

    fn run_with<F>(&self, thesis: &Thesis, holdings: Option<&PortfolioBaseline>, ingest: F) -> Result<PipelineReport>
    where
        F: FnOnce(&[Sector]) -> std::result::Result<Ingestion, IngestError>,
    {
        let started = Instant::now();
        let budget = thesis.budget();
        let focus = thesis.focus_set()?;
        let focus_sectors = thesis.focus_sectors();
        let span = info_span!("rebalance", budget, focus = ?focus_sectors);
        let _guard = span.enter();

        let non_focus: Vec<Sector> = Sector::ALL
            .iter()
            .copied()
            .filter(|s| !focus.contains(*s))
            .collect();
        if non_focus.is_empty() {
            return Err(ValidationError::NoNonFocusSectors.into());
        }

        let ingestion = ingest(&non_focus)?;
        if ingestion.deals.is_empty() {
            return Err(RebalanceError::EmptyResult { sectors: non_focus });
        }
        info!(candidates = ingestion.deals.len(), "candidate deals ready");

        let plan = TargetPlanner::new(self.config.planner.clone()).plan(&focus, &non_focus, budget, holdings)?;

        let problem = RebalanceProblem {
            universe: &plan.universe,
            baseline: &plan.baseline,
            targets: &plan.targets,
            deals: &ingestion.deals,
            budget,
        };
        let solved = self.optimizer.optimize(&problem)?;
        let allocation = select(&ingestion.deals, &solved, &plan.universe, &self.config.selector)?;

        info!(
            selected = allocation.deals.len(),
            total_investment = allocation.total_investment,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebalance complete"
        );

        Ok(PipelineReport {
            thesis: thesis.clone(),
            budget,
            target_weights: plan.targets,
            baseline: plan.baseline,
            synthetic_baseline: plan.synthetic_baseline,
            deals_selected: allocation.deals,
            total_investment: allocation.total_investment,
            sector_allocation: allocation.sector_allocation,
            dust: allocation.dust,
            ingestion: ingestion.summary(),
            objective: solved.objective,
            generated_at: Utc::now(),
        })
    }
}
