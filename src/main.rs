use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use deal_rebalancer::logging::{init_logging, LogFormat};
use deal_rebalancer::store::PortfolioStore;
use deal_rebalancer::thesis::ThesisClient;
use deal_rebalancer::{Pipeline, RebalanceConfig, Sector, Thesis};

/// Recommend deal fractions that rebalance a portfolio away from its focus sectors.
#[derive(Debug, Parser)]
#[command(name = "deal-rebalancer", version, about)]
struct Cli {
    /// Deal dataset (CSV with a header row).
    #[arg(long)]
    deals: PathBuf,

    /// Thesis JSON file.
    #[arg(long, required_unless_present = "thesis_url", conflicts_with = "thesis_url")]
    thesis: Option<PathBuf>,

    /// Fetch the thesis JSON from this URL instead.
    #[arg(long)]
    thesis_url: Option<String>,

    /// Stored portfolio; its holdings replace the synthetic baseline.
    #[arg(long)]
    portfolio: Option<PathBuf>,

    /// Apply the purchase to --portfolio and save the new version.
    #[arg(long, requires = "portfolio")]
    commit: bool,

    /// JSON config overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full report as JSON here.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Deals listed in the summary.
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Skip the summary on stdout.
    #[arg(short, long)]
    quiet: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

async fn load_thesis(cli: &Cli, config: &RebalanceConfig) -> Result<Thesis> {
    if let Some(url) = &cli.thesis_url {
        let client = ThesisClient::new(config.thesis_client.clone())?;
        return client
            .fetch(url)
            .await
            .with_context(|| format!("fetching thesis from {url}"));
    }
    let path = cli
        .thesis
        .as_ref()
        .context("either --thesis or --thesis-url is required")?;
    Ok(Thesis::from_file(path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let config = match &cli.config {
        Some(path) => RebalanceConfig::load(path)?,
        None => RebalanceConfig::default(),
    };
    let thesis = load_thesis(&cli, &config).await?;
    info!(
        amount_millions = thesis.amount_millions,
        focus = ?thesis.focus_sectors(),
        "thesis loaded"
    );

    let store = cli.portfolio.as_ref().map(PortfolioStore::new);
    let current = match &store {
        Some(store) => store.load()?,
        None => None,
    };
    let holdings = current
        .as_ref()
        .map(|portfolio| portfolio.baseline(&Sector::ALL))
        .transpose()?;

    let pipeline = Pipeline::new(config);
    let report = pipeline.run(&thesis, &cli.deals, holdings.as_ref())?;

    if let Some(path) = &cli.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    if !cli.quiet {
        print!("{}", report.summary(cli.top));
    }

    if cli.commit {
        if let Some(store) = &store {
            let base = current.unwrap_or_default();
            let next = base.apply_purchase(&report.allocation(), Utc::now().date_naive())?;
            store.save(&next)?;
            if !cli.quiet {
                println!("\nPortfolio saved as version {} ({:.2} invested)", next.version, next.total_invested);
            }
        }
    }

    Ok(())
}
