#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for walk-forward crime risk evaluation.
//!
//! Uses `indicatif-log-bridge` (via [`crime_risk_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and the period progress bar never fight for the terminal.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crime_risk_cli_utils::{IndicatifProgress, summarize};
use crime_risk_estimator::kde::DEFAULT_TUNING_FOLDS;
use crime_risk_estimator::{DEFAULT_TIME_WINDOW_DAYS, default_bandwidth_candidates, tune_bandwidth};
use crime_risk_evaluator::{CancellationToken, EvaluationConfig, data};
use crime_risk_event_models::EventStreams;

#[derive(Parser)]
#[command(name = "crime_risk", about = "Walk-forward evaluation of crime risk estimators")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the rolling periods an evaluation config produces
    Periods {
        /// Evaluation config (TOML)
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a walk-forward evaluation and write one CSV per metric
    Evaluate {
        /// Evaluation config (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Output directory (overrides `data.output_dir`)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Pick a kernel density bandwidth by cross-validation
    TuneBandwidth {
        /// Events CSV (`id,date,time,x,y,category`)
        #[arg(long)]
        events: PathBuf,
        /// Categories to tune on (repeatable)
        #[arg(long, required = true)]
        category: Vec<String>,
        /// Number of contiguous folds
        #[arg(long, default_value_t = DEFAULT_TUNING_FOLDS)]
        folds: usize,
        /// Last day of the training window (default: the latest event)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Training window length in days
        #[arg(long, default_value_t = DEFAULT_TIME_WINDOW_DAYS)]
        window_days: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = crime_risk_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Periods { config } => {
            let config = EvaluationConfig::load(&config)?;
            let periods = config.rolling.periods()?;
            println!("{}", config.rolling);
            for (i, period) in periods.iter().enumerate() {
                println!("{:>4}  {period}", i + 1);
            }
            println!("{} period(s)", periods.len());
        }
        Commands::Evaluate { config, output_dir } => {
            let config = EvaluationConfig::load(&config)?;
            let progress = IndicatifProgress::periods_bar(&multi, "Evaluating");
            let results = crime_risk_evaluator::run(
                &config,
                output_dir.as_deref(),
                progress,
                CancellationToken::new(),
            )?;
            println!("{}", summarize(&results));
        }
        Commands::TuneBandwidth {
            events,
            category,
            folds,
            as_of,
            window_days,
        } => {
            let events = data::load_events(&events)?;
            let stream = EventStreams::group(&events, &category);
            let Some((_, last)) = stream.date_range() else {
                return Err(format!("no events for {}", category.join(", ")).into());
            };
            let as_of = as_of.unwrap_or(last);
            let samples: Vec<_> = stream
                .trailing(as_of, Some(window_days))
                .iter()
                .map(|e| e.coord)
                .collect();

            log::info!(
                "Tuning on {} '{}' event(s) ending {as_of}",
                samples.len(),
                stream.name()
            );
            let search = tune_bandwidth(&samples, &default_bandwidth_candidates(), folds)?;

            for (bandwidth, score) in &search.scores {
                println!("{bandwidth:>10.2}  {score:.4}");
            }
            println!("best bandwidth: {:.2}", search.best);
        }
    }

    Ok(())
}
