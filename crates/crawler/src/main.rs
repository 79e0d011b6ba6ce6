//! citecrawl
//!
//! `seed` publishes seed titles to the work queue.
//! `work` runs the worker pool against the queue until stopped.

use citecrawl::cli::{Cli, Command, WorkArgs};
use citecrawl::dispatch::dispatch_seeds;
use citecrawl::fetch::{CrossrefTransport, FetchClient, MetadataSource, OpenAlexTransport, RetryPolicy};
use citecrawl::keywords::PhraseExtractor;
use citecrawl::scope::ComputingScope;
use citecrawl::seeds::load_seeds;
use citecrawl::{CrawlError, PoolSettings, Worker, WorkerPool, WorkerSettings};
use citecrawl_common::config::{AppConfig, DedupBackend, ObservabilityConfig, SourceKind};
use citecrawl_common::db::{DbPool, PgDedupStore, Repository};
use citecrawl_common::dedup::{MemoryDedupStore, RedisDedupStore};
use citecrawl_common::metrics::{self, FETCH_BUCKETS, METRICS_PREFIX};
use citecrawl_common::queue::{PublishPolicy, SqsQueue};
use citecrawl_common::{DedupStore, Producer, WorkQueue, VERSION};
use clap::Parser;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    }
    .map_err(|e| CrawlError::Config(e.to_string()))?;

    if let Command::Work(args) = &cli.command {
        args.apply(&mut config.crawler);
        config
            .validate()
            .map_err(|e| CrawlError::Config(e.to_string()))?;
    }

    init_tracing(&config.observability);
    info!("Starting citecrawl v{}", VERSION);

    if config.observability.metrics_port != 0 {
        init_metrics(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let config = Arc::new(config);
    let db = match config.crawler.dedup_backend {
        DedupBackend::Postgres => Some(connect_db(&config).await?),
        _ => None,
    };
    let dedup = dedup_store(&config, db.clone()).await?;

    info!("Connecting to queue...");
    let queue: Arc<dyn WorkQueue> = Arc::new(SqsQueue::connect(config.queue.clone()).await?);
    let producer = Producer::new(queue.clone(), PublishPolicy::from_config(&config.queue));

    match &cli.command {
        Command::Seed { file } => {
            let titles = load_seeds(file)?;
            let topic = producer.default_topic().to_string();
            let report = dispatch_seeds(&titles, dedup.as_ref(), &producer, &topic).await?;
            producer.close().await?;

            println!("queued:  {}", report.queued);
            println!("skipped: {}", report.skipped);
            println!("failed:  {}", report.failed);
            Ok(if report.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Work(args) => {
            let db = match db {
                Some(db) => db,
                None => connect_db(&config).await?,
            };
            run_pool(&config, args, db, dedup, queue, producer).await
        }
    }
}

async fn run_pool(
    config: &AppConfig,
    args: &WorkArgs,
    db: DbPool,
    dedup: Arc<dyn DedupStore>,
    queue: Arc<dyn WorkQueue>,
    producer: Producer,
) -> anyhow::Result<ExitCode> {
    let policy = RetryPolicy::from_config(&config.fetch);
    let source: Arc<dyn MetadataSource> = match config.fetch.source {
        SourceKind::Crossref => Arc::new(FetchClient::new(CrossrefTransport::new(&config.fetch)?, policy)),
        SourceKind::OpenAlex => Arc::new(FetchClient::new(OpenAlexTransport::new(&config.fetch)?, policy)),
    };
    let settings = WorkerSettings::from_config(config, producer.default_topic());

    info!(
        source = ?config.fetch.source,
        max_depth = config.crawler.max_depth,
        politeness_ms = config.crawler.politeness_ms,
        max_in_flight = config.crawler.max_in_flight,
        max_concurrent_fetches = config.crawler.max_concurrent_fetches,
        "Worker configuration"
    );

    let mut worker = Worker::new(
        source,
        dedup,
        Arc::new(Repository::new(db)),
        producer,
        Arc::new(PhraseExtractor::new(config.crawler.keywords_per_paper)),
        Arc::new(Semaphore::new(config.crawler.max_concurrent_fetches.max(1))),
        settings,
    );
    if config.crawler.scope_filter {
        worker = worker.with_scope(Arc::new(ComputingScope));
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let pool = WorkerPool::new(
        queue,
        Arc::new(worker),
        PoolSettings::from_config(config, args.exit_when_idle),
    );
    let summary = pool.run(cancel).await?;

    println!("{}", summary);
    if summary.has_failures() {
        warn!("Run finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(port: u16) -> Result<(), CrawlError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_fetch_duration_seconds", METRICS_PREFIX)),
            FETCH_BUCKETS,
        )
        .and_then(|builder| builder.install())
        .map_err(|e| CrawlError::Metrics(e.to_string()))?;

    info!(port, "Metrics exporter listening");
    Ok(())
}

async fn connect_db(config: &AppConfig) -> Result<DbPool, CrawlError> {
    let db = DbPool::new(&config.database).await.map_err(|e| {
        error!(error = %e, "Failed to connect to database");
        e
    })?;
    Ok(db)
}

async fn dedup_store(
    config: &AppConfig,
    db: Option<DbPool>,
) -> Result<Arc<dyn DedupStore>, CrawlError> {
    let lease = config.claim_lease();
    let store: Arc<dyn DedupStore> = match (config.crawler.dedup_backend, db) {
        (DedupBackend::Postgres, Some(db)) => Arc::new(PgDedupStore::new(db, lease)),
        (DedupBackend::Postgres, None) => {
            Arc::new(PgDedupStore::new(connect_db(config).await?, lease))
        }
        (DedupBackend::Redis, _) => Arc::new(RedisDedupStore::new(&config.redis, lease).await?),
        (DedupBackend::Memory, _) => {
            warn!("In-memory dedup store: claims are not shared with other processes");
            Arc::new(MemoryDedupStore::new(lease))
        }
    };
    info!(backend = ?config.crawler.dedup_backend, "Dedup store ready");
    Ok(store)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
