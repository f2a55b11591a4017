//! Target weight planning.
//!
//! Focus sectors (the ones a thesis calls overweight) are diluted to a fixed
//! share of the post-rebalancing portfolio; the rest of the weight is spread
//! evenly over every other sector.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ValidationError;
use crate::sector::Sector;

/// Allowed distance of a weight vector's sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-8;

/// Target share of the portfolio per sector. Sums to 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TargetWeights(BTreeMap<Sector, f64>);

impl TargetWeights {
    pub fn new(weights: BTreeMap<Sector, f64>) -> Result<Self, ValidationError> {
        for (&sector, &weight) in &weights {
            if !(weight.is_finite() && (0.0..=1.0).contains(&weight)) {
                return Err(ValidationError::TargetWeightRange { sector, weight });
            }
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ValidationError::TargetWeightSum { sum });
        }
        Ok(TargetWeights(weights))
    }

    pub fn get(&self, sector: Sector) -> Option<f64> {
        self.0.get(&sector).copied()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sector, f64)> + '_ {
        self.0.iter().map(|(s, w)| (*s, *w))
    }

    pub fn as_map(&self) -> &BTreeMap<Sector, f64> {
        &self.0
    }
}

/// Capital already committed per sector before this rebalancing event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PortfolioBaseline(BTreeMap<Sector, f64>);

impl PortfolioBaseline {
    pub fn new(holdings: BTreeMap<Sector, f64>) -> Result<Self, ValidationError> {
        for (&sector, &amount) in &holdings {
            if !(amount.is_finite() && amount >= 0.0) {
                return Err(ValidationError::InvalidBaseline { sector, amount });
            }
        }
        Ok(PortfolioBaseline(holdings))
    }

    pub fn get(&self, sector: Sector) -> Option<f64> {
        self.0.get(&sector).copied()
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Sector, f64)> + '_ {
        self.0.iter().map(|(s, a)| (*s, *a))
    }

    pub fn as_map(&self) -> &BTreeMap<Sector, f64> {
        &self.0
    }
}

/// Focus sectors with their relative emphasis (not necessarily normalized).
#[derive(Debug, Clone, PartialEq)]
pub struct FocusSet(BTreeMap<Sector, f64>);

impl FocusSet {
    pub fn new(emphasis: BTreeMap<Sector, f64>) -> Result<Self, ValidationError> {
        for (&sector, &value) in &emphasis {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ValidationError::InvalidEmphasis { sector, value });
            }
        }
        if emphasis.values().sum::<f64>() <= 0.0 {
            return Err(ValidationError::EmptyFocus);
        }
        Ok(FocusSet(emphasis))
    }

    pub fn sectors(&self) -> impl Iterator<Item = Sector> + '_ {
        self.0.keys().copied()
    }

    pub fn contains(&self, sector: Sector) -> bool {
        self.0.contains_key(&sector)
    }

    /// Emphasis normalized to sum to 1.
    pub fn relative_weights(&self) -> BTreeMap<Sector, f64> {
        let total: f64 = self.0.values().sum();
        self.0.iter().map(|(s, e)| (*s, e / total)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Share of total weight the focus sectors keep after rebalancing.
    pub dilution_target: f64,
    /// Synthetic focus holdings as a multiple of the budget.
    pub baseline_multiple: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            dilution_target: 0.3,
            baseline_multiple: 2.0,
        }
    }
}

/// Everything the optimizer needs besides the deals and the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Focus and non-focus sectors together, canonical order.
    pub universe: Vec<Sector>,
    pub focus: Vec<Sector>,
    pub non_focus: Vec<Sector>,
    pub targets: TargetWeights,
    pub baseline: PortfolioBaseline,
    /// `true` when the baseline was synthesized rather than supplied.
    pub synthetic_baseline: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TargetPlanner {
    config: PlannerConfig,
}

impl TargetPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Build target weights (and, unless `holdings` is given, a synthetic
    /// baseline) over `focus ∪ universe`.
    ///
    /// Supplied holdings are passed through unmodified.
    pub fn plan(
        &self,
        focus: &FocusSet,
        universe: &[Sector],
        budget: f64,
        holdings: Option<&PortfolioBaseline>,
    ) -> Result<Plan, ValidationError> {
        let dilution = self.config.dilution_target;
        if !(dilution > 0.0 && dilution < 1.0) {
            return Err(ValidationError::InvalidDilutionTarget(dilution));
        }
        if !(budget.is_finite() && budget > 0.0) {
            return Err(ValidationError::InvalidBudget(budget));
        }

        let all: BTreeSet<Sector> = focus.sectors().chain(universe.iter().copied()).collect();
        let focus_sectors: Vec<Sector> = focus.sectors().collect();
        let non_focus: Vec<Sector> = all.iter().copied().filter(|s| !focus.contains(*s)).collect();
        if non_focus.is_empty() {
            return Err(ValidationError::NoNonFocusSectors);
        }

        let relative = focus.relative_weights();
        let spread = (1.0 - dilution) / non_focus.len() as f64;

        let mut weights = BTreeMap::new();
        for (&sector, &share) in &relative {
            weights.insert(sector, dilution * share);
        }
        for &sector in &non_focus {
            weights.insert(sector, spread);
        }
        let targets = TargetWeights::new(weights)?;

        let (baseline, synthetic_baseline) = match holdings {
            Some(supplied) => (supplied.clone(), false),
            None => {
                let focus_total = self.config.baseline_multiple * budget;
                let mut amounts: BTreeMap<Sector, f64> =
                    non_focus.iter().map(|s| (*s, 0.0)).collect();
                for (&sector, &share) in &relative {
                    amounts.insert(sector, focus_total * share);
                }
                (PortfolioBaseline::new(amounts)?, true)
            }
        };

        info!(
            focus = focus_sectors.len(),
            non_focus = non_focus.len(),
            dilution_target = dilution,
            baseline_total = baseline.total(),
            synthetic_baseline,
            "target weights planned"
        );

        Ok(Plan {
            universe: all.into_iter().collect(),
            focus: focus_sectors,
            non_focus,
            targets,
            baseline,
            synthetic_baseline,
        })
    }
}
