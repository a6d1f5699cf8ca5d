mod http;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tracefin_core::config::Config;
use tracefin_processor::publish::{CompletionTimePublisher, HttpPublisher, LogPublisher};
use tracefin_processor::{CompletionPipeline, PipelineConfig, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "tracefin")]
#[command(about = "Trace completion-time derivation backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run span ingest and the completion pipeline")]
    Run {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        http_addr: Option<String>,
        #[arg(long)]
        publish_endpoint: Option<String>,
    },
    #[command(about = "Show a running instance's store status")]
    Status {
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db_path,
            http_addr,
            publish_endpoint,
        } => run_server(db_path, http_addr, publish_endpoint).await,
        Commands::Status { addr } => show_status(addr).await,
    }
}

async fn run_server(
    db_path: Option<PathBuf>,
    http_addr: Option<String>,
    publish_endpoint: Option<String>,
) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = db_path {
        cfg.db_path = v;
    }
    if let Some(v) = http_addr {
        cfg.http_addr = v;
    }
    if let Some(v) = publish_endpoint {
        cfg.publish_endpoint = Some(v);
    }

    let store = tracefin_store::Store::open(&cfg.db_path)?;

    let publisher: Arc<dyn CompletionTimePublisher> = match &cfg.publish_endpoint {
        Some(endpoint) => Arc::new(HttpPublisher::new(endpoint, cfg.publish_timeout)?),
        None => Arc::new(LogPublisher),
    };

    let pipeline = CompletionPipeline::new(
        Arc::new(store.clone()),
        publisher,
        PipelineConfig {
            channel_capacity: cfg.channel_capacity,
            retry_delay: cfg.retry_delay,
            retry: RetryPolicy {
                max_attempts: cfg.retry_max_attempts,
                max_age: cfg.retry_max_age,
            },
        },
    );

    eprintln!("tracefin run");
    eprintln!("  db: {}", cfg.db_path.display());
    eprintln!("  ingest http: {}", cfg.http_addr);
    match &cfg.publish_endpoint {
        Some(endpoint) => eprintln!("  publish: {endpoint}"),
        None => eprintln!("  publish: log"),
    }

    let router = http::router(store.clone(), pipeline);
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr)
        .await
        .with_context(|| format!("bind {}", cfg.http_addr))?;

    let http_task = tokio::spawn(async move { axum::serve(listener, router).await });

    let retention_task = tokio::spawn({
        let store = store.clone();
        let ttl = cfg.retention_ttl;
        let max = cfg.retention_max_bytes;
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(err) = store.run_retention(ttl, max) {
                    tracing::warn!(error = ?err, "retention task failed");
                }
            }
        }
    });

    tokio::select! {
        res = http_task => {
            res.context("http task join failed")?
                .context("http server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    retention_task.abort();
    Ok(())
}

async fn show_status(addr: Option<String>) -> anyhow::Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => Config::from_env().context("load config from env")?.http_addr,
    };
    let url = format!("http://{addr}/v1/status");
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("request {url}"))?;
    let status: serde_json::Value = resp.json().await.context("decode status response")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
