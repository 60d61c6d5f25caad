//! Survey trend batch runner
//!
//! Runs every pipeline declared in a JSON config and writes its tables to
//! `<output>/<pipeline name>/`.
//!
//! Usage:
//!   survey_trends --config analysis.json --output results/
//!   RUST_LOG=survey_trends=debug survey_trends --config analysis.json --output results/

use anyhow::Context;
use clap::Parser;
use polars::prelude::*;
use std::fs::File;
use std::path::PathBuf;
use survey_trends::data::load_observations;
use survey_trends::report::write_tables;
use survey_trends::utils::cross_tabulate;
use survey_trends::{AnalysisConfig, TrendPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "survey_trends", about = "Wildlife survey population trend analysis")]
struct Cli {
    /// JSON configuration listing pipelines and their input tables.
    #[arg(long)]
    config: PathBuf,
    /// Output directory; one subdirectory per pipeline.
    #[arg(long)]
    output: PathBuf,
    /// Run only the named pipeline.
    #[arg(long)]
    pipeline: Option<String>,
    /// Also write a site × year observation cross-tab for spotting label variants.
    #[arg(long)]
    crosstab: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // Default log level: info for our crate, warn for others
                .unwrap_or_else(|_| "survey_trends=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let analysis = AnalysisConfig::load(&cli.config)?;

    let selected: Vec<_> = analysis
        .pipelines
        .iter()
        .filter(|p| cli.pipeline.as_deref().map_or(true, |name| p.name == name))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("No pipeline matches {:?}", cli.pipeline);
    }

    for spec in selected {
        let config = spec.resolve()?;
        let out_dir = cli.output.join(&spec.name);

        tracing::info!("=== Pipeline '{}' ({}) ===", spec.name, spec.preset);
        let observations = load_observations(&spec.inputs, &config)?;
        let report = TrendPipeline::new(config)
            .run(&observations)
            .with_context(|| format!("Pipeline '{}' failed", spec.name))?;
        write_tables(&report, &out_dir)?;

        if cli.crosstab {
            let tab = cross_tabulate(
                &observations,
                "site",
                "year",
                |o| o.site.clone(),
                |o| o.year.map(|y| y.to_string()).unwrap_or_else(|| "NA".to_string()),
            );
            let mut df = tab.to_dataframe()?;
            let path = out_dir.join("site_by_year.csv");
            let mut file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        }
    }

    Ok(())
}
