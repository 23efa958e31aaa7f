use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use vitarag::api::serve_api;
use vitarag::config::AppConfig;
use vitarag::logging;

#[derive(Parser)]
#[command(name = "vitarag")]
#[command(about = "VitaRAG profile chatbot API server")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8001")]
    port: u16,

    /// Disable permissive CORS (enabled by default for the web widget)
    #[arg(long)]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    logging::init_logging_with_config(Some(&config))?;

    serve_api(&config, &cli.host, cli.port, !cli.no_cors).await?;
    Ok(())
}
