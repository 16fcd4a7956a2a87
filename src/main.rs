//! `resilient-egress` command line.
//!
//! Fetches, downloads and checks URLs through the SSRF-safe egress client
//! with a circuit breaker and retries in front, and can serve the admin
//! endpoints with graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Method;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use resilient_egress::admin::{setup_admin_router, AdminState};
use resilient_egress::config::{load_config_or_default, ResilienceConfig};
use resilient_egress::egress::{DownloadOptions, EgressClient};
use resilient_egress::failure::get_failure_report;
use resilient_egress::guarded::guarded_fetch;
use resilient_egress::lifecycle::{
    serve_with_graceful_shutdown, GracefulShutdownOptions, ShutdownCoordinator, ShutdownHook,
};
use resilient_egress::observability::{logging, metrics};
use resilient_egress::resilience::CircuitBreakerRegistry;
use resilient_egress::Error;

#[derive(Parser)]
#[command(name = "resilient-egress")]
#[command(about = "Guarded outbound HTTP with circuit breakers, retries and SSRF protection", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides observability.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and print the status and final URL
    Fetch {
        url: String,
        /// Circuit breaker to route the call through
        #[arg(short, long, default_value = "default")]
        service: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
    /// Download a URL into memory with size and content-type limits
    Download {
        url: String,
        #[arg(long)]
        max_bytes: Option<u64>,
        /// Accepted content-type prefix (repeatable)
        #[arg(long = "allow-type")]
        allow_types: Vec<String>,
        /// Write the body here instead of only reporting its size
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a URL against the egress policy without sending anything
    Check { url: String },
    /// Serve health and admin endpoints until SIGINT/SIGTERM
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:8081")]
        bind: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_logging(level, config.observability.json_logs);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    if let Err(e) = run(cli.command, config).await {
        let report = get_failure_report(&e, None);
        eprintln!("Error: {e}");
        match serde_json::to_string_pretty(&report) {
            Ok(json) => eprintln!("{json}"),
            Err(_) => eprintln!("{report:?}"),
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: ResilienceConfig) -> Result<(), Error> {
    let registry = CircuitBreakerRegistry::new(config.circuit_breaker.clone());
    let client = EgressClient::new(config.egress.clone());

    match command {
        Commands::Fetch { url, service, method } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
            let fetched =
                guarded_fetch(&registry, &client, &service, &config.retry.http, &url, method).await?;

            println!("{} {}", fetched.response.status(), fetched.final_url);
        }
        Commands::Download {
            url,
            max_bytes,
            allow_types,
            output,
        } => {
            let mut options = DownloadOptions::default();
            if let Some(max) = max_bytes {
                options = options.max_bytes(max);
            }
            if !allow_types.is_empty() {
                options = options.allow_content_types(allow_types);
            }

            let download = client.download_to_buffer(&url, options).await?;
            println!(
                "{} bytes ({}) from {}",
                download.buffer.len(),
                download.content_type.as_deref().unwrap_or("unknown type"),
                download.final_url
            );
            if let Some(path) = output {
                tokio::fs::write(&path, &download.buffer).await?;
                println!("written to {}", path.display());
            }
        }
        Commands::Check { url } => {
            let target = client.validate(&url).await?;
            println!("{} allowed", target.url);
            for addr in &target.addrs {
                println!("  {addr}");
            }
        }
        Commands::Serve { bind } => {
            let coordinator = Arc::new(ShutdownCoordinator::new(&config.shutdown));
            let hook_registry = registry.clone();
            coordinator.register_hook(
                ShutdownHook::new("report-breakers", move || async move {
                    for status in hook_registry.statuses() {
                        tracing::info!(
                            service = %status.service_name,
                            state = %status.state,
                            failures = status.failure_count,
                            "Breaker state at shutdown"
                        );
                    }
                    Ok(())
                })
                .timeout(Duration::from_millis(config.shutdown.hook_timeout_ms)),
            );

            if config.admin.api_key.is_none() {
                tracing::warn!("admin.api_key is not set; /admin routes will refuse every request");
            }
            let router = setup_admin_router(AdminState {
                registry,
                coordinator: coordinator.clone(),
                api_key: config.admin.api_key.as_deref().map(Arc::from),
            })
            .layer(TraceLayer::new_for_http());
            #[allow(deprecated)]
            let router = router.layer(TimeoutLayer::new(Duration::from_secs(30)));

            let listener = TcpListener::bind(&bind).await?;
            serve_with_graceful_shutdown(
                listener,
                router,
                coordinator,
                GracefulShutdownOptions::from(&config.shutdown),
            )
            .await?;
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}
