use anyhow::Context;
use clap::Parser;
use odata_validator::core::ConfigProvider;
use odata_validator::domain::ports::ResultProvider;
use odata_validator::utils::{logger, validation::Validate};
use odata_validator::{
    FileResultProvider, InMemoryResultProvider, JobQueue, JobWorkers, LocalStorage, RuleCatalog,
    RuleEngine, ServerConfig, ValidationExecutor, ValidationService,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "validator-server")]
#[command(about = "OData validation job server")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init_server_logger(args.verbose, args.json_logs);

    // 未指定設定檔時全部使用預設值
    let config = match &args.config {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path);
            ServerConfig::from_file(path)
                .with_context(|| format!("failed to load config file '{}'", path))?
        }
        None => ServerConfig::default(),
    };

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let results: Arc<dyn ResultProvider> = match config.results_path() {
        Some(path) => {
            tracing::info!("💾 Storing job results under {}", path);
            Arc::new(FileResultProvider::new(LocalStorage::new(path)))
        }
        None => {
            tracing::info!("💾 Storing job results in memory");
            Arc::new(InMemoryResultProvider::new())
        }
    };

    let catalog = Arc::new(RuleCatalog::builtin()?);
    let engine = RuleEngine::new(
        Arc::clone(&catalog),
        config.rule_selection(),
        config.rule_timeout(),
    );
    let executor = Arc::new(ValidationExecutor::new(
        engine,
        config.http_config(),
        Arc::clone(&results),
    ));

    let (queue, receiver) = JobQueue::new(config.queue_capacity());
    let workers = JobWorkers::start(receiver, config.workers(), executor, Arc::clone(&results));
    let service = Arc::new(ValidationService::new(
        queue,
        results,
        catalog,
        workers.workers(),
    ));

    tracing::info!(
        queue_capacity = config.queue_capacity(),
        workers = config.workers(),
        rules = service.rules().len(),
        "🚀 Starting validator-server"
    );

    let addr = config.listen_addr()?;
    odata_validator::server::serve(addr, Arc::clone(&service), odata_validator::server::shutdown_signal())
        .await?;

    // 伺服器停止後釋放佇列的 sender，讓 worker 把剩下的 job 做完
    drop(service);
    workers.shutdown().await;

    tracing::info!("👋 validator-server stopped");
    Ok(())
}
