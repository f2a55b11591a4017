//! Deal ingestion
//!
//! Turns per-company rows of the deal dataset into validated [`Deal`]s:
//! - investable size is a fixed fraction of turnover (or total assets)
//! - three risk scores come from liquidity, interest cover and EBITDA margin
//! - rows that cannot become a deal are skipped and recorded with a reason

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, ValidationError};
use crate::sector::Sector;

const COMPANY_COLUMN: &str = "Company Name";
const SECTOR_COLUMN: &str = "Sector";
// The dataset ships with the misspelled header; accept the correct one too.
const CURRENT_RATIO_COLUMNS: &[&str] = &["Currrent Ratio", "Current Ratio"];
const ICR_COLUMN: &str = "ICR";
const EBITDA_COLUMN: &str = "EBITDA";
const TURNOVER_COLUMN: &str = "Turnover";

/// An investable unit: up to `size` can be taken, in any fraction.
///
/// Larger risk scores mean safer deals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    deal_id: String,
    sector: Sector,
    size: f64,
    risk1: f64,
    risk2: f64,
    risk3: f64,
}

impl Deal {
    /// Build a deal, checking `size > 0` and a positive risk-score sum.
    pub fn new(
        deal_id: impl Into<String>,
        sector: Sector,
        size: f64,
        risk1: f64,
        risk2: f64,
        risk3: f64,
    ) -> Result<Self, ValidationError> {
        let deal = Deal {
            deal_id: deal_id.into(),
            sector,
            size,
            risk1,
            risk2,
            risk3,
        };
        deal.validate()?;
        Ok(deal)
    }

    pub fn deal_id(&self) -> &str {
        &self.deal_id
    }

    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Maximum investable amount.
    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn risks(&self) -> [f64; 3] {
        [self.risk1, self.risk2, self.risk3]
    }

    /// Composite risk score used by the risk-adjusted cost term.
    pub fn risk_sum(&self) -> f64 {
        self.risk1 + self.risk2 + self.risk3
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(ValidationError::NonPositiveSize {
                deal_id: self.deal_id.clone(),
                size: self.size,
            });
        }
        if ![self.risk1, self.risk2, self.risk3].iter().all(|r| r.is_finite()) {
            return Err(ValidationError::NonFiniteRisk {
                deal_id: self.deal_id.clone(),
            });
        }
        let sum = self.risk_sum();
        if sum <= 0.0 {
            return Err(ValidationError::NonPositiveRiskSum {
                deal_id: self.deal_id.clone(),
                sum,
            });
        }
        Ok(())
    }
}

/// Rules for deriving deal size and risk scores from a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Primary size column.
    pub size_column: String,
    /// Used when the primary size is missing or non-positive.
    pub fallback_size_column: String,
    /// Share of the size field that is investable.
    pub size_fraction: f64,
    /// Replacement for a missing or invalid risk score.
    pub default_risk: f64,
    /// Lower clamp applied to every risk score.
    pub risk_floor: f64,
    /// Upper clamp on the EBITDA-margin score.
    pub margin_cap: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            size_column: TURNOVER_COLUMN.to_string(),
            fallback_size_column: "Total Assets".to_string(),
            size_fraction: 0.10,
            default_risk: 1.0,
            risk_floor: 0.1,
            margin_cap: 10.0,
        }
    }
}

/// Why a row did not become a deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Malformed(String),
    UnknownSector(String),
    NoPositiveSize,
    DuplicateId(String),
}

impl SkipReason {
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::Malformed(_) => "malformed",
            SkipReason::UnknownSector(_) => "unknown_sector",
            SkipReason::NoPositiveSize => "no_positive_size",
            SkipReason::DuplicateId(_) => "duplicate_id",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malformed(e) => write!(f, "malformed record: {e}"),
            SkipReason::UnknownSector(s) => write!(f, "unknown sector '{s}'"),
            SkipReason::NoPositiveSize => write!(f, "no positive size in either size column"),
            SkipReason::DuplicateId(id) => write!(f, "duplicate deal id '{id}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// Zero-based data row index (header excluded).
    pub row: usize,
    pub reason: SkipReason,
}

/// Result of one pass over the deal source.
#[derive(Debug, Default)]
pub struct Ingestion {
    pub deals: Vec<Deal>,
    pub skipped: Vec<SkippedRow>,
    /// Rows dropped by the sector filter. Not defects.
    pub filtered: usize,
}

/// Counts reported alongside the allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub loaded: usize,
    pub filtered: usize,
    pub skipped: usize,
    pub skipped_by_reason: BTreeMap<String, usize>,
}

impl Ingestion {
    pub fn summary(&self) -> IngestionSummary {
        let mut skipped_by_reason = BTreeMap::new();
        for row in &self.skipped {
            *skipped_by_reason
                .entry(row.reason.kind().to_string())
                .or_insert(0) += 1;
        }
        IngestionSummary {
            loaded: self.deals.len(),
            filtered: self.filtered,
            skipped: self.skipped.len(),
            skipped_by_reason,
        }
    }

    fn skip(&mut self, row: usize, reason: SkipReason) {
        debug!(row, reason = %reason, "skipping deal row");
        self.skipped.push(SkippedRow { row, reason });
    }
}

// Header positions, resolved once per source.
struct ColumnMap {
    company: Option<usize>,
    sector: usize,
    primary_size: Option<usize>,
    fallback_size: Option<usize>,
    current_ratio: Option<usize>,
    icr: Option<usize>,
    ebitda: Option<usize>,
    turnover: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord, config: &IngestConfig) -> Result<Self, IngestError> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Ok(ColumnMap {
            company: find(COMPANY_COLUMN),
            sector: find(SECTOR_COLUMN).ok_or(IngestError::MissingColumn(SECTOR_COLUMN))?,
            primary_size: find(config.size_column.as_str()),
            fallback_size: find(config.fallback_size_column.as_str()),
            current_ratio: CURRENT_RATIO_COLUMNS.iter().find_map(|c| find(*c)),
            icr: find(ICR_COLUMN),
            ebitda: find(EBITDA_COLUMN),
            turnover: find(TURNOVER_COLUMN),
        })
    }

    fn row<'r>(&self, record: &'r csv::StringRecord) -> RawDealRow<'r> {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        RawDealRow {
            company: cell(self.company),
            sector: cell(Some(self.sector)),
            primary_size: cell(self.primary_size),
            fallback_size: cell(self.fallback_size),
            current_ratio: cell(self.current_ratio),
            icr: cell(self.icr),
            ebitda: cell(self.ebitda),
            turnover: cell(self.turnover),
        }
    }
}

/// One source row before any interpretation. Empty cells are `None`.
#[derive(Debug, Clone, Copy)]
struct RawDealRow<'r> {
    company: Option<&'r str>,
    sector: Option<&'r str>,
    primary_size: Option<&'r str>,
    fallback_size: Option<&'r str>,
    current_ratio: Option<&'r str>,
    icr: Option<&'r str>,
    ebitda: Option<&'r str>,
    turnover: Option<&'r str>,
}

/// Parse a cell as a finite, strictly positive number.
///
/// Thousands separators are tolerated; spreadsheet error literals such as
/// `#DIV/0!` are not numbers and yield `None`.
fn positive(cell: Option<&str>) -> Option<f64> {
    let value: f64 = cell?.replace(',', "").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

impl RawDealRow<'_> {
    fn into_deal(self, index: usize, sector: Sector, config: &IngestConfig) -> Result<Deal, SkipReason> {
        let base_size = positive(self.primary_size)
            .or_else(|| positive(self.fallback_size))
            .ok_or(SkipReason::NoPositiveSize)?;
        let size = base_size * config.size_fraction;

        let risk1 = positive(self.current_ratio)
            .unwrap_or(config.default_risk)
            .max(config.risk_floor);
        let risk2 = positive(self.icr)
            .unwrap_or(config.default_risk)
            .max(config.risk_floor);

        // EBITDA margin; a missing turnover divides by one like the source data tooling did
        let ebitda = positive(self.ebitda).unwrap_or(0.0);
        let turnover = positive(self.turnover).unwrap_or(1.0);
        let risk3 = (ebitda / turnover).clamp(config.risk_floor, config.margin_cap);

        let deal_id = self
            .company
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown_{index}"));

        Deal::new(deal_id, sector, size, risk1, risk2, risk3)
            .map_err(|e| SkipReason::Malformed(e.to_string()))
    }
}

/// Load deals from a CSV file. See [`ingest_deals`].
pub fn load_deals_from_csv(
    path: &Path,
    sectors: Option<&[Sector]>,
    config: &IngestConfig,
) -> Result<Ingestion, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Open {
        path: path.display().to_string(),
        source,
    })?;
    ingest_deals(file, sectors, config)
}

/// Read deal rows from any CSV source with a header line.
///
/// When `sectors` is given only rows of those sectors are considered; the
/// rest are counted as filtered. Row defects never fail the load.
pub fn ingest_deals<R: Read>(
    source: R,
    sectors: Option<&[Sector]>,
    config: &IngestConfig,
) -> Result<Ingestion, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let columns = ColumnMap::from_headers(reader.headers()?, config)?;

    let mut ingestion = Ingestion::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                ingestion.skip(index, SkipReason::Malformed(e.to_string()));
                continue;
            }
        };
        let row = columns.row(&record);

        let sector = row.sector.and_then(|name| name.parse::<Sector>().ok());
        if let Some(filter) = sectors {
            if !sector.is_some_and(|s| filter.contains(&s)) {
                ingestion.filtered += 1;
                continue;
            }
        }
        let Some(sector) = sector else {
            let name = row.sector.unwrap_or_default().to_string();
            ingestion.skip(index, SkipReason::UnknownSector(name));
            continue;
        };

        match row.into_deal(index, sector, config) {
            Ok(deal) => {
                if !seen.insert(deal.deal_id.clone()) {
                    ingestion.skip(index, SkipReason::DuplicateId(deal.deal_id));
                    continue;
                }
                ingestion.deals.push(deal);
            }
            Err(reason) => ingestion.skip(index, reason),
        }
    }

    info!(
        loaded = ingestion.deals.len(),
        filtered = ingestion.filtered,
        skipped = ingestion.skipped.len(),
        "deal source ingested"
    );
    Ok(ingestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Company Name,Sector,Turnover,Total Assets,Currrent Ratio,ICR,EBITDA";

    fn ingest(rows: &[&str], sectors: Option<&[Sector]>) -> Ingestion {
        let data = std::iter::once(HEADER)
            .chain(rows.iter().copied())
            .collect::<Vec<_>>()
            .join("\n");
        ingest_deals(data.as_bytes(), sectors, &IngestConfig::default()).unwrap()
    }

    #[test]
    fn size_is_a_tenth_of_turnover() {
        let ing = ingest(&["Acme,Retail,2000000,9000000,1.5,3,400000"], None);
        assert_eq!(ing.deals.len(), 1);
        let deal = &ing.deals[0];
        assert_eq!(deal.deal_id, "Acme");
        assert_eq!(deal.sector, Sector::Retail);
        assert!((deal.size - 200_000.0).abs() < 1e-9);
        assert_eq!(deal.risk1, 1.5);
        assert_eq!(deal.risk2, 3.0);
        assert!((deal.risk3 - 0.2).abs() < 1e-12);
    }

    #[test]
    fn falls_back_to_total_assets() {
        let ing = ingest(&["Acme,Retail,0,5000,,,", "Beta,Retail,#DIV/0!,\"7,000\",,,"], None);
        assert_eq!(ing.deals.len(), 2);
        assert!((ing.deals[0].size - 500.0).abs() < 1e-9);
        assert!((ing.deals[1].size - 700.0).abs() < 1e-9);
    }

    #[test]
    fn rows_without_any_positive_size_are_skipped() {
        let ing = ingest(&["Acme,Retail,-10,0,1,1,1", "Beta,Retail,,,1,1,1"], None);
        assert!(ing.deals.is_empty());
        assert_eq!(ing.skipped.len(), 2);
        assert!(ing.skipped.iter().all(|s| s.reason == SkipReason::NoPositiveSize));
        assert_eq!(ing.skipped[1].row, 1);
    }

    #[test]
    fn invalid_risk_cells_use_defaults_and_floors() {
        let ing = ingest(&["Acme,Defence,1000,,#DIV/0!,-4,50"], None);
        let deal = &ing.deals[0];
        assert_eq!(deal.risk1, 1.0);
        assert_eq!(deal.risk2, 1.0);
        // 50 / 1000 = 0.05, lifted to the floor
        assert_eq!(deal.risk3, 0.1);
    }

    #[test]
    fn zero_risk_row_still_has_positive_risk_sum() {
        let ing = ingest(&["Acme,Defence,1000,,0,0,0"], None);
        let deal = &ing.deals[0];
        assert_eq!((deal.risk1, deal.risk2, deal.risk3), (1.0, 1.0, 0.1));
        assert!(deal.risk_sum() > 0.0);
    }

    #[test]
    fn margin_is_capped() {
        // no turnover: size from total assets, margin divides by one
        let ing = ingest(&["Acme,Defence,,1000,2,2,500"], None);
        assert_eq!(ing.deals[0].risk3, 10.0);
    }

    #[test]
    fn sector_filter_applies_before_extraction() {
        let ing = ingest(
            &[
                "Acme,Retail,1000,,1,1,1",
                "Beta,Defence,1000,,1,1,1",
                "Gamma,Nowhere,0,0,1,1,1",
            ],
            Some(&[Sector::Defence]),
        );
        assert_eq!(ing.deals.len(), 1);
        assert_eq!(ing.deals[0].deal_id, "Beta");
        assert_eq!(ing.filtered, 2);
        assert!(ing.skipped.is_empty());
    }

    #[test]
    fn unknown_sector_without_filter_is_reported() {
        let ing = ingest(&["Acme,Nowhere,1000,,1,1,1"], None);
        assert!(ing.deals.is_empty());
        assert_eq!(
            ing.skipped[0].reason,
            SkipReason::UnknownSector("Nowhere".into())
        );
    }

    #[test]
    fn duplicate_ids_and_missing_names() {
        let ing = ingest(
            &["Acme,Retail,1000,,1,1,1", "Acme,Retail,2000,,1,1,1", ",Retail,3000,,1,1,1"],
            None,
        );
        assert_eq!(ing.deals.len(), 2);
        assert_eq!(ing.deals[1].deal_id, "Unknown_2");

        let summary = ing.summary();
        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_by_reason.get("duplicate_id"), Some(&1));
    }

    #[test]
    fn unreadable_record_is_skipped_as_malformed() {
        let mut data = format!("{HEADER}\nAcme,Retail,1000,,1,1,1\n").into_bytes();
        data.extend_from_slice(b"Bad\xff\xfe,Retail,1000,,1,1,1\n");
        data.extend_from_slice(b"Beta,Retail,2000,,1,1,1\n");

        let ing = ingest_deals(data.as_slice(), None, &IngestConfig::default()).unwrap();
        let ids: Vec<&str> = ing.deals.iter().map(|d| d.deal_id()).collect();
        assert_eq!(ids, ["Acme", "Beta"]);
        assert_eq!(ing.skipped.len(), 1);
        assert_eq!(ing.skipped[0].row, 1);
        assert!(matches!(ing.skipped[0].reason, SkipReason::Malformed(_)));
        assert_eq!(ing.summary().skipped_by_reason.get("malformed"), Some(&1));
    }

    #[test]
    fn missing_sector_column_fails_the_load() {
        let data = "Company Name,Turnover\nAcme,1000";
        let err = ingest_deals(data.as_bytes(), None, &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn("Sector")));
    }

    #[test]
    fn deal_constructor_rejects_bad_records() {
        assert!(Deal::new("a", Sector::Retail, 0.0, 1.0, 1.0, 1.0).is_err());
        assert!(Deal::new("a", Sector::Retail, 10.0, 0.0, 0.0, 0.0).is_err());
        assert!(Deal::new("a", Sector::Retail, 10.0, f64::NAN, 1.0, 1.0).is_err());
        assert!(Deal::new("a", Sector::Retail, 10.0, 1.0, 2.0, 3.0).is_ok());
    }
}
