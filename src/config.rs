//! Run configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deals::IngestConfig;
use crate::optimizer::OptimizerConfig;
use crate::planner::PlannerConfig;
use crate::selector::SelectorConfig;
use crate::solver::SimplexConfig;
use crate::thesis::ThesisClientConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value {field} = {value}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub ingest: IngestConfig,
    pub planner: PlannerConfig,
    pub optimizer: OptimizerConfig,
    pub selector: SelectorConfig,
    pub solver: SimplexConfig,
    pub thesis_client: ThesisClientConfig,
}

impl RebalanceConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dilution = self.planner.dilution_target;
        check("planner.dilution_target", dilution, dilution > 0.0 && dilution < 1.0, "must lie strictly between 0 and 1")?;
        let multiple = self.planner.baseline_multiple;
        check("planner.baseline_multiple", multiple, multiple.is_finite() && multiple >= 0.0, "must be finite and >= 0")?;

        let fraction = self.ingest.size_fraction;
        check("ingest.size_fraction", fraction, fraction > 0.0 && fraction <= 1.0, "must lie in (0, 1]")?;
        let floor = self.ingest.risk_floor;
        check("ingest.risk_floor", floor, floor.is_finite() && floor > 0.0, "must be > 0 so risk sums stay positive")?;
        let cap = self.ingest.margin_cap;
        check("ingest.margin_cap", cap, cap.is_finite() && cap >= floor, "must be >= risk_floor")?;
        let default_risk = self.ingest.default_risk;
        check("ingest.default_risk", default_risk, default_risk.is_finite(), "must be finite")?;

        let threshold = self.selector.materiality_threshold;
        check("selector.materiality_threshold", threshold, (0.0..1.0).contains(&threshold), "must lie in [0, 1)")?;

        let weight = self.optimizer.risk_weight;
        check("optimizer.risk_weight", weight, weight.is_finite() && weight >= 0.0, "must be finite and >= 0")?;

        let solver = &self.solver;
        check("solver.max_iterations", solver.max_iterations, solver.max_iterations > 0, "must be > 0")?;
        for (field, tol) in [
            ("solver.pivot_tolerance", solver.pivot_tolerance),
            ("solver.feasibility_tolerance", solver.feasibility_tolerance),
            ("solver.optimality_tolerance", solver.optimality_tolerance),
        ] {
            check(field, tol, tol.is_finite() && tol > 0.0, "must be finite and > 0")?;
        }

        let attempts = self.thesis_client.max_attempts;
        check("thesis_client.max_attempts", attempts, attempts > 0, "must be > 0")?;
        Ok(())
    }
}

fn check(field: &'static str, value: impl ToString, ok: bool, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            value: value.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = RebalanceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.planner.dilution_target, 0.3);
        assert_eq!(config.selector.materiality_threshold, 0.001);
        assert_eq!(config.optimizer.risk_weight, 1.0);
        assert_eq!(config.thesis_client.max_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"optimizer": {{"risk_weight": 0.5}}, "ingest": {{"size_column": "Revenue"}}}}"#).unwrap();

        let config = RebalanceConfig::load(file.path()).unwrap();
        assert_eq!(config.optimizer.risk_weight, 0.5);
        assert_eq!(config.ingest.size_column, "Revenue");
        assert_eq!(config.ingest.size_fraction, 0.10);
        assert_eq!(config.planner.baseline_multiple, 2.0);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = RebalanceConfig::default();
        config.planner.dilution_target = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("planner.dilution_target"));

        let mut config = RebalanceConfig::default();
        config.selector.materiality_threshold = 1.0;
        assert!(config.validate().is_err());

        let mut config = RebalanceConfig::default();
        config.optimizer.risk_weight = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unreadable_or_malformed_files_fail() {
        assert!(matches!(
            RebalanceConfig::load(Path::new("/no/such/config.json")),
            Err(ConfigError::Read { .. })
        ));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        assert!(matches!(
            RebalanceConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
