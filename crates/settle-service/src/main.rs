use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use settle_config::ConfigLoader;
use settle_core::EngineBuilder;
use settle_types::configs::SettleConfig;

mod api;

#[derive(Parser)]
#[command(name = "settle")]
#[command(about = "Order batching and provider routing service", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	/// Path to configuration file
	#[arg(short, long, value_name = "FILE", env = "SETTLE_CONFIG", default_value = "config/local.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, env = "SETTLE_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the settle service
	Start,
	/// Validate the configuration file
	Validate,
	/// Generate an example configuration file
	GenerateConfig {
		/// Output file path
		#[arg(short, long, default_value = "config/example.toml")]
		output: PathBuf,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level);

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
		Some(Commands::GenerateConfig { output }) => generate_config(output).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Starting settle service");
	info!("Service name: {}", config.service.name);
	info!("HTTP port: {}", config.service.http_port);
	info!("Providers configured: {}", config.providers.len());

	let engine = EngineBuilder::new(config.clone())
		.build()
		.context("Failed to build engine")?;
	engine.start().await;

	let app = api::router(engine.clone());
	let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.service.http_port))
		.await
		.context("Failed to bind HTTP listener")?;

	info!("Settle service started");
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("HTTP server error")?;

	info!("Shutdown signal received, stopping services");
	engine.shutdown().await;
	info!("Settle service stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Configuration is invalid")?;

	info!("Configuration is valid");
	info!("  service name:   {}", config.service.name);
	info!(
		"  batching:       enabled={}, max={}, timeout={}ms",
		config.batch.enabled, config.batch.max_batch_size, config.batch.timeout_ms
	);
	info!("  providers:      {}", config.providers.len());
	Ok(())
}

async fn generate_config(output: PathBuf) -> Result<()> {
	let config = SettleConfig::default();
	let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

	if let Some(parent) = output.parent() {
		tokio::fs::create_dir_all(parent)
			.await
			.context("Failed to create output directory")?;
	}
	tokio::fs::write(&output, rendered)
		.await
		.context("Failed to write configuration file")?;

	info!("Wrote example configuration to {:?}", output);
	Ok(())
}

fn setup_tracing(level: &str) {
	let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}
