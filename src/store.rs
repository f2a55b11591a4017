//! JSON persistence for [`Portfolio`] values.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::portfolio::Portfolio;

/// A portfolio file on disk.
#[derive(Debug, Clone)]
pub struct PortfolioStore {
    path: PathBuf,
}

impl PortfolioStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored portfolio. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<Portfolio>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored portfolio");
                return Ok(None);
            }
            Err(source) => return Err(self.io_error(source)),
        };
        let portfolio = serde_json::from_str(&text).map_err(|source| StoreError::Format {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(Some(portfolio))
    }

    /// Persist `portfolio`, replacing the file atomically.
    ///
    /// Refuses to overwrite a stored version that is not older.
    pub fn save(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        if let Some(stored) = self.load()? {
            if stored.version >= portfolio.version {
                return Err(StoreError::StaleVersion {
                    stored: stored.version,
                    attempted: portfolio.version,
                });
            }
        }

        let json = serde_json::to_string_pretty(portfolio).map_err(|source| StoreError::Format {
            path: self.path.display().to_string(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::File::create(&tmp)
            .and_then(|mut f| {
                f.write_all(json.as_bytes())?;
                f.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|source| self.io_error(source))?;

        info!(path = %self.path.display(), version = portfolio.version, "portfolio saved");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
