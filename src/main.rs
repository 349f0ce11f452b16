//! signal-radar: binary entrypoint.
//! Thin command surface over the library: ingest, analyze, publish,
//! research, status, serve.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signal_radar::analyze::{self, synthesis, AnalysisOptions, ResearchOptions};
use signal_radar::api::{self, AppState};
use signal_radar::config::{self, synthesis::SynthesisConfig, Settings};
use signal_radar::ingest::{self, config::FeedConfig, providers};
use signal_radar::metrics::Metrics;
use signal_radar::publish;
use signal_radar::store::{InsightStore, JsonFileStore};
use signal_radar::trust::TrustTable;

/// Signal Radar - cross-source signal aggregation and insight synthesis.
#[derive(Parser)]
#[command(name = "signal-radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for stored signals and runs.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging for this crate.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch every curated feed that has a URL and store new signals.
    Ingest {
        /// Feed list (TOML or JSON). Defaults to the env/config fallback chain.
        #[arg(long)]
        feeds: Option<PathBuf>,
    },

    /// Run one analysis pass and persist its insights.
    Analyze {
        /// Velocity window length in hours.
        #[arg(long)]
        window_hours: Option<u32>,

        /// File with background knowledge to append to the prompt.
        #[arg(long)]
        knowledge: Option<PathBuf>,
    },

    /// Render the latest stored run into the four feed artifacts.
    Publish {
        /// Output directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Ad-hoc synthesis over signals mentioning a topic. Not persisted.
    Research {
        /// Topic to focus on.
        topic: String,

        /// Look-back in days.
        #[arg(long, default_value = "7")]
        days: u32,

        /// File with background knowledge to append to the prompt.
        #[arg(long)]
        knowledge: Option<PathBuf>,
    },

    /// Show signal counts per source and the latest run.
    Status,

    /// Serve status, metrics and published artifacts over HTTP.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "signal_radar=debug,info"
    } else {
        "signal_radar=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr; stdout carries the command's JSON report.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::from_env();
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    let store = JsonFileStore::new(&settings.data_dir).with_page_size(settings.page_size);

    match cli.command {
        Commands::Ingest { feeds } => {
            let feeds = load_feeds(feeds.as_deref())?;
            let providers = providers::from_feeds(&feeds);
            tracing::info!(feeds = feeds.len(), providers = providers.len(), "ingest starting");
            let report = ingest::run_once(&providers, &store).await;
            print_json(&report)
        }

        Commands::Analyze {
            window_hours,
            knowledge,
        } => {
            if let Some(h) = window_hours {
                settings.window_hours = config::clamp_window_hours(h);
            }
            let trust = TrustTable::from_feeds(&load_feeds(None)?);
            let engine = build_engine(&settings)?;
            let opts = AnalysisOptions {
                window: settings.window(),
                knowledge: read_knowledge(knowledge.as_deref())?,
                now: None,
            };
            let report =
                analyze::run_analysis(&store, &store, engine.as_ref(), &trust, &opts).await;
            print_json(&report)?;
            if report.signals > 0 && !report.persisted {
                anyhow::bail!("analysis run did not persist: {}", report.errors.join("; "));
            }
            Ok(())
        }

        Commands::Publish { out } => {
            let out = out.unwrap_or(settings.out_dir);
            let (run_at, insights) = match store.latest_run().await? {
                Some(run) => (run.run_at, run.insights),
                None => {
                    tracing::warn!("no stored run, publishing empty artifacts");
                    (Utc::now(), Vec::new())
                }
            };
            let trust = TrustTable::from_feeds(&load_feeds(None)?);
            let artifacts = publish::publish(&insights, run_at, &trust)?;
            let (written, errors) = publish::write_artifacts(&out, &artifacts);
            for p in &written {
                println!("{}", p.display());
            }
            if !errors.is_empty() {
                anyhow::bail!("failed to write artifacts: {}", errors.join("; "));
            }
            tracing::info!(dir = %out.display(), insights = insights.len(), "artifacts published");
            Ok(())
        }

        Commands::Research {
            topic,
            days,
            knowledge,
        } => {
            let trust = TrustTable::from_feeds(&load_feeds(None)?);
            let engine = build_engine(&settings)?;
            let opts = ResearchOptions {
                topic,
                lookback: Duration::days(i64::from(config::clamp_lookback_days(days))),
                knowledge: read_knowledge(knowledge.as_deref())?,
                now: None,
            };
            let report = analyze::research_topic(&store, engine.as_ref(), &trust, &opts).await;
            print_json(&report)
        }

        Commands::Status => {
            let trust = TrustTable::from_feeds(&load_feeds(None)?);
            let report = api::collect_status(&store, &store, &trust).await?;
            print_json(&report)
        }

        Commands::Serve { port } => {
            let trust = TrustTable::from_feeds(&load_feeds(None)?);
            let metrics = Metrics::init().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "metrics recorder unavailable, /metrics will be empty");
                Metrics::detached()
            });
            let store = Arc::new(store);
            let state = AppState {
                signals: store.clone(),
                insights: store,
                trust: Arc::new(trust),
            };
            let app = api::router(state, &metrics, &settings.out_dir);

            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("binding port {port}"))?;
            tracing::info!(port, "serving");
            axum::serve(listener, app).await.context("http server")?;
            Ok(())
        }
    }
}

fn load_feeds(path: Option<&Path>) -> Result<Vec<FeedConfig>> {
    match path {
        Some(p) => ingest::config::load_feeds_from(p),
        None => ingest::config::load_feeds_default(),
    }
}

fn build_engine(settings: &Settings) -> Result<synthesis::DynEngine> {
    let cfg = SynthesisConfig::load_or_default(&settings.synthesis_path).with_context(|| {
        format!(
            "loading synthesis config from {}",
            settings.synthesis_path.display()
        )
    })?;
    Ok(synthesis::build_engine(&cfg))
}

fn read_knowledge(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p).with_context(|| format!("reading knowledge from {}", p.display()))
    })
    .transpose()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
