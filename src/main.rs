use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use feedpump::article::{Clock, SystemClock};
use feedpump::config::Config;
use feedpump::feed::HttpFeedSource;
use feedpump::pipeline::Pipeline;
use feedpump::publish::{JsonLinesPublisher, Publisher, PublisherSink};
use feedpump::resilience::{CircuitBreaker, ResilientFetcher};
use feedpump::scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[cfg(feature = "amqp")]
use feedpump::publish::AmqpPublisher;
#[cfg(feature = "amqp")]
use secrecy::ExposeSecret;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "feedpump",
    about = "Polls syndicated feeds and publishes each entry to a message queue"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "feedpump.toml")]
    config: PathBuf,

    /// Run one cycle per feed and exit
    #[arg(long)]
    once: bool,

    /// Print articles as JSON lines instead of publishing to the broker
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedpump=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedpump/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")
}

fn build_pipelines(
    config: &Config,
    client: &reqwest::Client,
    publisher: Arc<dyn Publisher>,
) -> Vec<Arc<Pipeline>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    config
        .feeds
        .iter()
        .map(|feed| {
            let source = HttpFeedSource::new(
                client.clone(),
                feed.url.clone(),
                feed.source.clone(),
                config.fetch_timeout(),
                Arc::clone(&clock),
            );
            let circuit = CircuitBreaker::new(config.circuit_config(), tokio::time::Instant::now());
            let fetcher = ResilientFetcher::new(Arc::new(source), config.retry_policy(), circuit);
            let sink = PublisherSink::new(
                Arc::clone(&publisher),
                config.destination.clone(),
                config.publish_timeout(),
            );
            Arc::new(Pipeline::new(fetcher, sink))
        })
        .collect()
}

#[cfg(feature = "amqp")]
async fn connect_broker(config: &Config) -> Result<Arc<AmqpPublisher>> {
    let amqp = AmqpPublisher::connect(
        config.broker_url().expose_secret(),
        &[config.destination.as_str()],
    )
    .await
    .context("Failed to connect to message broker")?;
    tracing::info!(destination = %config.destination, "Connected to message broker");
    Ok(Arc::new(amqp))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, shutting down gracefully");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.validate().context("Invalid configuration")?;
    tracing::debug!(config = ?config, "Effective configuration");

    let client = build_http_client()?;

    #[cfg(feature = "amqp")]
    let broker = if args.dry_run {
        None
    } else {
        Some(connect_broker(&config).await?)
    };
    #[cfg(feature = "amqp")]
    let publisher: Arc<dyn Publisher> = match &broker {
        Some(amqp) => amqp.clone(),
        None => Arc::new(JsonLinesPublisher::stdout()),
    };
    #[cfg(not(feature = "amqp"))]
    let publisher: Arc<dyn Publisher> = if args.dry_run {
        Arc::new(JsonLinesPublisher::stdout())
    } else {
        anyhow::bail!("Built without the `amqp` feature; run with --dry-run");
    };

    let pipelines = build_pipelines(&config, &client, publisher);

    if args.once {
        for pipeline in &pipelines {
            pipeline.run_cycle().await;
        }
    } else {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut schedulers = JoinSet::new();

        for pipeline in pipelines {
            let mut stop_rx = stop_rx.clone();
            let scheduler = Scheduler::new(pipeline, config.poll_interval())
                .prevent_overlap(config.prevent_overlap);
            schedulers.spawn(async move {
                scheduler
                    .run(async move {
                        let _ = stop_rx.changed().await;
                    })
                    .await
            });
        }

        shutdown_signal().await?;
        let _ = stop_tx.send(true);

        while let Some(joined) = schedulers.join_next().await {
            match joined {
                Ok(stats) => tracing::info!(
                    fired = stats.fired,
                    skipped = stats.skipped,
                    "Scheduler stopped"
                ),
                Err(e) => tracing::error!(error = %e, "Scheduler task failed"),
            }
        }
    }

    #[cfg(feature = "amqp")]
    if let Some(broker) = broker {
        if let Err(e) = broker.close().await {
            tracing::warn!(error = %e, "Failed to close broker connection cleanly");
        }
    }

    Ok(())
}
