//! Investment thesis input.
//!
//! The thesis is produced by an external extraction service as JSON:
//!
//! ```json
//! { "amount_millions": 10.5,
//!   "desired_sectors": {"Defence": 0.4, "Advanced_Manufacturing": 0.35},
//!   "overview": "...", "kpis": ["..."], "timeline": "5-year horizon" }
//! ```
//!
//! Services like that tend to wrap the payload in a Markdown code fence, so
//! parsing accepts both forms.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ThesisError, ValidationError};
use crate::planner::FocusSet;
use crate::sector::Sector;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("fence pattern is valid"));

const API_KEY_HEADER: &str = "X-API-Key";

/// Structured investment parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thesis {
    /// Budget in millions.
    pub amount_millions: f64,
    /// Focus sectors with emphasis normalized to sum to 1.
    pub desired_sectors: BTreeMap<Sector, f64>,
    pub overview: String,
    pub kpis: Vec<String>,
    pub timeline: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawThesis {
    #[serde(default)]
    amount_millions: f64,
    #[serde(default)]
    desired_sectors: BTreeMap<String, f64>,
    #[serde(default)]
    overview: String,
    #[serde(default)]
    kpis: Vec<String>,
    #[serde(default)]
    timeline: Option<String>,
}

impl Thesis {
    /// Parse a thesis payload, bare or fenced.
    ///
    /// Sector names are canonicalized; names that map to no sector are
    /// dropped with a warning. Emphasis is normalized to sum to 1.
    pub fn parse(text: &str) -> Result<Self, ThesisError> {
        let trimmed = text.trim();
        let body = FENCED_JSON
            .captures(trimmed)
            .and_then(|cap| cap.get(1))
            .map_or(trimmed, |m| m.as_str());
        let raw: RawThesis = serde_json::from_str(body)?;

        if !(raw.amount_millions.is_finite() && raw.amount_millions > 0.0) {
            return Err(ThesisError::InvalidAmount(raw.amount_millions));
        }

        let mut emphasis: BTreeMap<Sector, f64> = BTreeMap::new();
        for (name, value) in raw.desired_sectors {
            let Some(sector) = Sector::canonicalize(&name) else {
                warn!(sector = %name, "dropping unrecognized thesis sector");
                continue;
            };
            if !(value.is_finite() && value >= 0.0) {
                return Err(ThesisError::InvalidEmphasis {
                    sector: name,
                    value,
                });
            }
            *emphasis.entry(sector).or_insert(0.0) += value;
        }

        let total: f64 = emphasis.values().sum();
        if emphasis.is_empty() || total <= 0.0 {
            return Err(ThesisError::NoValidSectors);
        }
        emphasis.values_mut().for_each(|v| *v /= total);

        Ok(Thesis {
            amount_millions: raw.amount_millions,
            desired_sectors: emphasis,
            overview: raw.overview,
            kpis: raw.kpis,
            timeline: raw.timeline,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ThesisError> {
        let text = std::fs::read_to_string(path).map_err(|source| ThesisError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Maximum new investment in currency units.
    pub fn budget(&self) -> f64 {
        self.amount_millions * 1_000_000.0
    }

    pub fn focus_sectors(&self) -> Vec<Sector> {
        self.desired_sectors.keys().copied().collect()
    }

    pub fn focus_set(&self) -> Result<FocusSet, ValidationError> {
        FocusSet::new(self.desired_sectors.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThesisClientConfig {
    /// Total tries for a rate-limited request, first one included.
    pub max_attempts: u32,
    /// Wait before retry `n` (zero based) is `(n + 1) * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Sent as `X-API-Key` when set.
    pub api_key: Option<String>,
}

impl Default for ThesisClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 30_000,
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

/// Fetches thesis payloads over HTTP.
pub struct ThesisClient {
    http: reqwest::Client,
    config: ThesisClientConfig,
}

impl ThesisClient {
    pub fn new(config: ThesisClientConfig) -> Result<Self, ThesisError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).map_err(|_| ThesisError::InvalidApiKey)?;
            headers.insert(API_KEY_HEADER, value);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// GET `url` and parse the body as a thesis.
    ///
    /// Rate-limited responses are retried with linear backoff; every other
    /// failure is returned straight away.
    pub async fn fetch(&self, url: &str) -> Result<Thesis, ThesisError> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 0..attempts {
            let resp = self.http.get(url).send().await?;
            let status = resp.status();
            let body = resp.text().await?;

            if status.is_success() {
                info!(url, attempt = attempt + 1, "thesis fetched");
                return Thesis::parse(&body);
            }
            if !is_rate_limited(status, &body) {
                return Err(ThesisError::Http {
                    status: status.as_u16(),
                    body,
                });
            }
            if attempt + 1 < attempts {
                let wait = Duration::from_millis(self.config.retry_base_delay_ms * u64::from(attempt + 1));
                warn!(
                    url,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    wait_ms = wait.as_millis() as u64,
                    "thesis service rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
            }
        }
        Err(ThesisError::RateLimited { attempts })
    }
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let body = body.to_lowercase();
    body.contains("quota") || body.contains("rate limit") || body.contains("rate-limit")
}
