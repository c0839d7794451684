mod output;
mod telemetry;
mod watcher;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracelens_core::config::{AnomalyConfig, Config};
use tracelens_core::query::parse_query;
use tracelens_core::time::parse_duration_str;
use tracelens_ingest::{Pipeline, PipelineConfig, Session};

use crate::output::{
    TraceDetail, TraceSummary, print_anomalies_human, print_json, print_load_report,
    print_trace_human, print_traces_human,
};
use crate::telemetry::{init_cli_tracing, shutdown_tracing};
use crate::watcher::{PollWatcher, expand_paths};

#[derive(Parser, Debug)]
#[command(name = "tracelens")]
#[command(about = "Load, stitch, query, and triage traces from .log and .jsonl span files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List stitched traces, optionally filtered by a query")]
    Traces {
        #[arg(required = true, help = "Span files or glob patterns")]
        paths: Vec<String>,
        #[arg(short, long, help = "e.g. 'HasError AND Duration>500ms'")]
        query: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Show one trace as a span tree")]
    Trace {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long)]
        id: String,
    },
    #[command(about = "Run anomaly detection over span and trace durations")]
    Anomalies {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long)]
        min_samples: Option<usize>,
        #[arg(long)]
        multiplier: Option<f64>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    #[command(about = "Reload files as they change and re-run the query")]
    Watch {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long, help = "Debounce delay, e.g. 500ms")]
        debounce: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();
    let cfg = Config::load().context("load config")?;

    let result = match cli.command {
        Commands::Traces {
            paths,
            query,
            limit,
        } => {
            let session = load_session(&paths, &cfg)?;
            let query = query.unwrap_or_default();
            if parse_query(&query).has_anomalies {
                refresh_anomalies(&session)?;
            }
            print_traces(&session, &query, limit, cli.json)
        }
        Commands::Trace { paths, id } => {
            let session = load_session(&paths, &cfg)?;
            refresh_anomalies(&session)?;
            let trace = session
                .trace(&id)
                .with_context(|| format!("trace {id} not found"))?;
            let detail = TraceDetail::new(&trace, &session.anomalous_trace_ids());
            if cli.json {
                print_json(&detail)
            } else {
                print_trace_human(&detail);
                Ok(())
            }
        }
        Commands::Anomalies {
            paths,
            confidence,
            min_samples,
            multiplier,
            limit,
        } => {
            let anomaly_cfg = anomaly_config(&cfg, confidence, min_samples, multiplier)?;
            let session = Arc::new(load_session(&paths, &cfg)?);
            run_anomalies(session, anomaly_cfg, limit, cli.json).await
        }
        Commands::Watch {
            paths,
            query,
            debounce,
            limit,
        } => {
            let debounce = debounce
                .map(|d| parse_duration_str(&d))
                .transpose()?
                .unwrap_or(cfg.debounce);
            let session = Arc::new(load_session(&paths, &cfg)?);
            run_watch(
                session,
                paths,
                query.unwrap_or_default(),
                debounce,
                cfg.watch_poll_interval,
                limit,
                cli.json,
            )
            .await
        }
    };

    shutdown_tracing();
    result
}

fn load_session(patterns: &[String], cfg: &Config) -> anyhow::Result<Session> {
    let paths = expand_paths(patterns);
    let session = Session::new(cfg.anomaly());
    let report = session.load_files(&paths);
    print_load_report(&report);
    if report.is_nothing_to_do() {
        anyhow::bail!("nothing to do: no trace files loaded from {}", patterns.join(" "));
    }
    session.stitch();
    Ok(session)
}

fn refresh_anomalies(session: &Session) -> anyhow::Result<()> {
    session
        .detect_anomalies(&CancellationToken::new())
        .context("anomaly detection")?;
    Ok(())
}

fn anomaly_config(
    cfg: &Config,
    confidence: Option<f64>,
    min_samples: Option<usize>,
    multiplier: Option<f64>,
) -> anyhow::Result<AnomalyConfig> {
    let mut anomaly = cfg.anomaly();
    if let Some(v) = confidence {
        anomaly.confidence_level = v;
    }
    if let Some(v) = min_samples {
        anomaly.min_samples_required = v;
    }
    if let Some(v) = multiplier {
        anomaly.duration_threshold_multiplier = v;
    }
    anomaly.validate()?;
    Ok(anomaly)
}

fn print_traces(session: &Session, query: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let matched = session.query(query);
    let anomalous = session.anomalous_trace_ids();
    let summaries = matched
        .iter()
        .take(limit)
        .map(|t| TraceSummary::new(t, &anomalous))
        .collect::<Vec<_>>();
    if json {
        print_json(&summaries)
    } else {
        print_traces_human(&summaries, matched.len());
        Ok(())
    }
}

async fn run_anomalies(
    session: Arc<Session>,
    anomaly_cfg: AnomalyConfig,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let task = tokio::task::spawn_blocking({
        let session = session.clone();
        let cancel = cancel.clone();
        move || session.detect_anomalies_with(&anomaly_cfg, &cancel)
    });

    let results = tokio::select! {
        res = task => res.context("detection task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, cancelling detection");
            cancel.cancel();
            anyhow::bail!("detection cancelled");
        }
    };

    let shown = &results[..results.len().min(limit)];
    if json {
        print_json(shown)
    } else {
        print_anomalies_human(shown);
        Ok(())
    }
}

async fn run_watch(
    session: Arc<Session>,
    patterns: Vec<String>,
    query: String,
    debounce: Duration,
    poll_interval: Duration,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    session.start_detection()?;
    if let Some(Err(e)) = session.wait_for_detection().await {
        tracing::warn!(error = %e, "initial anomaly detection failed");
    }
    print_traces(&session, &query, limit, json)?;

    let pipeline = Pipeline::new(
        session.clone(),
        PipelineConfig {
            debounce,
            ..PipelineConfig::default()
        },
    );
    let mut applied = pipeline.subscribe();
    let mut watcher = PollWatcher::new(patterns);
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in watcher.poll() {
                    pipeline.submit(event);
                }
            }
            Ok(event) = applied.recv() => {
                match &event.error {
                    Some(e) => eprintln!("{:?} {}: {e}", event.event.kind, event.event.path.display()),
                    None => eprintln!("{:?} {} ({} traces)", event.event.kind, event.event.path.display(), event.traces),
                }
                if let Some(Err(e)) = session.wait_for_detection().await
                    && !e.is_cancelled()
                {
                    tracing::warn!(error = %e, "anomaly detection failed");
                }
                print_traces(&session, &query, limit, json)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping watch");
                break;
            }
        }
    }
    Ok(())
}
