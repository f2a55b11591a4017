//! Turns raw solver fractions into the reported allocation.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deals::Deal;
use crate::error::ValidationError;
use crate::optimizer::AllocationPlan;
use crate::sector::Sector;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Fractions at or below this are treated as zero.
    pub materiality_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            materiality_threshold: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedDeal {
    pub deal_id: String,
    pub sector: Sector,
    /// Rounded to 4 dp.
    pub fraction: f64,
    /// Rounded to 2 dp.
    pub amount: f64,
    pub deal_size: f64,
}

/// Sub-threshold fractions the solver produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DustSummary {
    pub count: usize,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Largest investment first.
    pub deals: Vec<SelectedDeal>,
    pub total_investment: f64,
    pub sector_allocation: BTreeMap<Sector, f64>,
    pub dust: DustSummary,
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Select material fractions, rank them and summarize by sector.
///
/// Sector shares are reported for every sector in `universe` (0.0 when
/// nothing was bought there) and are empty when nothing was bought at all.
pub fn select(
    deals: &[Deal],
    plan: &AllocationPlan,
    universe: &[Sector],
    config: &SelectorConfig,
) -> Result<Allocation, ValidationError> {
    let by_id: HashMap<&str, &Deal> = deals.iter().map(|d| (d.deal_id(), d)).collect();

    // (deal, fraction, full-precision amount)
    let mut picked: Vec<(&Deal, f64, f64)> = Vec::new();
    let mut dust = DustSummary::default();
    for entry in &plan.fractions {
        let deal = by_id
            .get(entry.deal_id.as_str())
            .copied()
            .ok_or_else(|| ValidationError::UnknownPlanDeal(entry.deal_id.clone()))?;
        let amount = entry.fraction * deal.size();
        if entry.fraction > config.materiality_threshold {
            picked.push((deal, entry.fraction, amount));
        } else if entry.fraction > 0.0 {
            dust.count += 1;
            dust.amount += amount;
        }
    }

    picked.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| a.0.deal_id().cmp(b.0.deal_id()))
    });

    let total: f64 = picked.iter().map(|(_, _, amount)| amount).sum();

    let mut sector_allocation = BTreeMap::new();
    if total > 0.0 {
        let mut per_sector: BTreeMap<Sector, f64> = universe.iter().map(|s| (*s, 0.0)).collect();
        for (deal, _, amount) in &picked {
            *per_sector.entry(deal.sector()).or_insert(0.0) += amount;
        }
        sector_allocation = per_sector
            .into_iter()
            .map(|(sector, amount)| (sector, round_to(amount / total, 4)))
            .collect();
    }

    let selected: Vec<SelectedDeal> = picked
        .into_iter()
        .map(|(deal, fraction, amount)| SelectedDeal {
            deal_id: deal.deal_id().to_string(),
            sector: deal.sector(),
            fraction: round_to(fraction, 4),
            amount: round_to(amount, 2),
            deal_size: deal.size(),
        })
        .collect();

    info!(
        selected = selected.len(),
        total_investment = total,
        dust = dust.count,
        "allocation selected"
    );

    Ok(Allocation {
        deals: selected,
        total_investment: round_to(total, 2),
        sector_allocation,
        dust: DustSummary {
            count: dust.count,
            amount: round_to(dust.amount, 2),
        },
    })
}
