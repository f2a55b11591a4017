//! Portfolio state as a versioned value.
//!
//! A purchase never mutates a portfolio in place: [`Portfolio::apply_purchase`]
//! returns the next version and leaves the input untouched.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PortfolioError, ValidationError};
use crate::planner::PortfolioBaseline;
use crate::sector::Sector;
use crate::selector::{round_to, Allocation};

/// One purchased slice of a deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub deal_id: String,
    pub sector: Sector,
    pub amount: f64,
    pub acquired_on: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Bumped by every purchase; 0 for a fresh portfolio.
    pub version: u64,
    pub total_invested: f64,
    /// Capital held per sector.
    pub holdings: BTreeMap<Sector, f64>,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl Portfolio {
    /// A portfolio holding `holdings` with no recorded positions.
    pub fn with_holdings(holdings: BTreeMap<Sector, f64>) -> Self {
        let total_invested = holdings.values().sum();
        Portfolio {
            version: 0,
            total_invested,
            holdings,
            positions: Vec::new(),
        }
    }

    /// Buy every deal of `allocation`, returning the next version.
    pub fn apply_purchase(&self, allocation: &Allocation, date: NaiveDate) -> Result<Portfolio, PortfolioError> {
        if allocation.deals.is_empty() {
            return Err(PortfolioError::NothingToPurchase);
        }

        let mut next = self.clone();
        let mut purchased = 0.0;
        for deal in &allocation.deals {
            if !(deal.amount.is_finite() && deal.amount > 0.0) {
                return Err(PortfolioError::InvalidAmount {
                    deal_id: deal.deal_id.clone(),
                    amount: deal.amount,
                });
            }
            *next.holdings.entry(deal.sector).or_insert(0.0) += deal.amount;
            purchased += deal.amount;
            next.positions.push(Position {
                deal_id: deal.deal_id.clone(),
                sector: deal.sector,
                amount: deal.amount,
                acquired_on: date,
            });
        }
        // Holdings take the per-deal amounts, so the total does too.
        next.total_invested = round_to(self.total_invested + purchased, 2);
        next.version = self.version + 1;

        info!(
            version = next.version,
            deals = allocation.deals.len(),
            purchased,
            total_invested = next.total_invested,
            "purchase applied"
        );
        Ok(next)
    }

    /// Share of holdings per sector; empty when nothing is held.
    pub fn sector_breakdown(&self) -> BTreeMap<Sector, f64> {
        let total: f64 = self.holdings.values().sum();
        if total <= 0.0 {
            return BTreeMap::new();
        }
        self.holdings
            .iter()
            .map(|(sector, amount)| (*sector, amount / total))
            .collect()
    }

    /// Holdings over `universe` as an optimizer baseline; absent sectors are 0.
    pub fn baseline(&self, universe: &[Sector]) -> Result<PortfolioBaseline, ValidationError> {
        let holdings = universe
            .iter()
            .map(|s| (*s, self.holdings.get(s).copied().unwrap_or(0.0)))
            .collect();
        PortfolioBaseline::new(holdings)
    }
}
