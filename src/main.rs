use claude_router::config::config_search_paths;
use claude_router::intent::IntentRouter;
use claude_router::{
    build_router, AppState, ConfigSource, CustomRouter, Dispatcher, PriceTable, RouterConfig,
    SharedLogger, Telemetry,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-router",
    about = "Route Claude Code requests across Anthropic and OpenAI-compatible providers",
    version
)]
struct Cli {
    /// Path to config file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request log file path
    #[arg(long, default_value = "claude-router.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    // The config may name a log level, so it is read before tracing starts.
    let located = RouterConfig::find_and_load(cli.config.as_deref());
    let fallback_filter = located
        .as_ref()
        .ok()
        .and_then(|(_, config)| config.log_level.clone())
        .map(|level| format!("claude_router={level},tower_http={level}"))
        .unwrap_or_else(|| "claude_router=info,tower_http=info".to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config_path, mut config) = located?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let custom_router: Option<Arc<dyn CustomRouter>> = match &config.custom_router_path {
        Some(path) => IntentRouter::load_optional(path)?.map(|router| {
            info!(path = %path.display(), intents = router.len(), "Loaded intent router");
            Arc::new(router) as Arc<dyn CustomRouter>
        }),
        None => None,
    };

    let logger = SharedLogger::new(&cli.log_file)?;
    let telemetry = Telemetry::new(
        Arc::new(logger.clone()),
        Arc::new(PriceTable::from_config(&config)),
    );

    // Per-attempt timeouts come from the config on each request.
    let client = reqwest::Client::builder().build()?;
    // Prices follow the config snapshot each request is dispatched with.
    let dispatcher = Dispatcher::new(client, custom_router, telemetry).with_config_pricing();

    info!("claude-router v{}", env!("CARGO_PKG_VERSION"));
    info!("  Config:    {}", config_path.display());
    for provider in &config.providers {
        info!(
            "  Provider:  {} ({} models)",
            provider.name,
            provider.models.len()
        );
    }
    info!(
        "  Default:   {}",
        config.router.default.as_deref().unwrap_or("<none>")
    );
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting claude-router config={} providers={}",
            config_path.display(),
            config.providers.len()
        ),
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config: ConfigSource::File(config_path),
        dispatcher,
        logger: Some(logger),
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://{} claude", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
