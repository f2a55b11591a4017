//! Error types for the rebalancing pipeline.
//!
//! Validation failures and solver failures abort a run; row-level ingestion
//! defects never show up here (they are recorded in the ingestion summary).

use thiserror::Error;

use crate::sector::Sector;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RebalanceError>;

/// Malformed or inconsistent input to the planner, optimizer or selector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing baseline holding for sector '{0}'")]
    MissingBaseline(Sector),

    #[error("missing target weight for sector '{0}'")]
    MissingTarget(Sector),

    #[error("target weights must sum to 1, got {sum}")]
    TargetWeightSum { sum: f64 },

    #[error("target weight for sector '{sector}' must lie in [0, 1], got {weight}")]
    TargetWeightRange { sector: Sector, weight: f64 },

    #[error("baseline holding for sector '{sector}' must be finite and >= 0, got {amount}")]
    InvalidBaseline { sector: Sector, amount: f64 },

    #[error("deal '{deal_id}' references sector '{sector}' outside the rebalancing universe")]
    DealSectorOutsideUniverse { deal_id: String, sector: Sector },

    #[error("deal '{deal_id}' has non-positive size {size}")]
    NonPositiveSize { deal_id: String, size: f64 },

    #[error("deal '{deal_id}' has non-positive risk score sum {sum}")]
    NonPositiveRiskSum { deal_id: String, sum: f64 },

    #[error("deal '{deal_id}' has a non-finite risk score")]
    NonFiniteRisk { deal_id: String },

    #[error("deal id '{0}' appears more than once")]
    DuplicateDeal(String),

    #[error("allocation plan references unknown deal '{0}'")]
    UnknownPlanDeal(String),

    #[error("budget must be finite and > 0, got {0}")]
    InvalidBudget(f64),

    #[error("dilution target must lie strictly between 0 and 1, got {0}")]
    InvalidDilutionTarget(f64),

    #[error("emphasis for focus sector '{sector}' must be finite and >= 0, got {value}")]
    InvalidEmphasis { sector: Sector, value: f64 },

    #[error("focus emphasis values must have a positive sum")]
    EmptyFocus,

    #[error("every sector is a focus sector; nothing is left to absorb the diluted weight")]
    NoNonFocusSectors,

    #[error("the sector universe is empty")]
    EmptyUniverse,
}

/// The LP solve ended in a status other than optimal or feasible.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("linear program is infeasible (residual infeasibility {residual})")]
    Infeasible { residual: f64 },

    #[error("linear program is unbounded")]
    Unbounded,

    #[error("simplex stopped after {iterations} iterations without converging")]
    IterationLimit { iterations: usize },

    #[error("numerical failure: {0}")]
    Numerical(String),
}

/// Failure to read the tabular deal source as a whole.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open deal source '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read deal source header: {0}")]
    Header(#[from] csv::Error),

    #[error("deal source is missing required column '{0}'")]
    MissingColumn(&'static str),
}

/// The thesis payload could not be obtained or does not describe a usable thesis.
#[derive(Debug, Error)]
pub enum ThesisError {
    #[error("failed to read thesis file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("thesis payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("investment amount must be finite and > 0, got {0}M")]
    InvalidAmount(f64),

    #[error("emphasis for sector '{sector}' must be >= 0, got {value}")]
    InvalidEmphasis { sector: String, value: f64 },

    #[error("thesis names no recognized sector with positive emphasis")]
    NoValidSectors,

    #[error("api key contains characters not allowed in a header")]
    InvalidApiKey,

    #[error("thesis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("thesis service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("thesis service still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
    #[error("allocation selects no deals; nothing to purchase")]
    NothingToPurchase,

    #[error("deal '{deal_id}' has invalid purchase amount {amount}")]
    InvalidAmount { deal_id: String, amount: f64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("portfolio file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("portfolio file '{path}' is not a valid portfolio: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stored portfolio is at version {stored}; refusing to save version {attempted}")]
    StaleVersion { stored: u64, attempted: u64 },
}

/// Top-level error for one optimization run.
#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("no deals found for sectors: {}", join_sectors(.sectors))]
    EmptyResult { sectors: Vec<Sector> },

    #[error("solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

fn join_sectors(sectors: &[Sector]) -> String {
    sectors
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
