//! Sector rebalancing deal optimizer.
//!
//! Given an investment thesis that names overweight ("focus") sectors and a
//! budget, picks fractions of candidate deals in the other sectors so the
//! portfolio moves toward a diluted target mix, preferring safer deals.
//!
//! The core is synchronous: [`pipeline::Pipeline::run`] ingests deals, plans
//! target weights, solves the rebalancing LP and selects the material
//! fractions. Fetching a thesis over HTTP ([`thesis::ThesisClient`]) is the
//! only async piece.

pub mod config;
pub mod deals;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod pipeline;
pub mod planner;
pub mod portfolio;
pub mod sector;
pub mod selector;
pub mod solver;
pub mod store;
pub mod thesis;

pub use config::RebalanceConfig;
pub use deals::{Deal, Ingestion};
pub use error::{RebalanceError, Result};
pub use pipeline::{Pipeline, PipelineReport};
pub use portfolio::Portfolio;
pub use sector::Sector;
pub use thesis::Thesis;
