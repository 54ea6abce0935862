use std::sync::Arc;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

use lodestar::engine::Engine;
use lodestar::oracle::OpenFgaOracle;
use lodestar::settings::Settings;
use lodestar::store::EtcdStore;
use lodestar::web;

#[derive(Parser, Debug)]
#[command(name = "lodestar", version, about = "Namespace-scoped permissions engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // connect to the config store and the relation store
    let store = EtcdStore::connect(&settings.store.endpoints, settings.store.connect_timeout())
        .await
        .map_err(|e| miette::miette!("config store connection failed: {e}"))?;
    let oracle = OpenFgaOracle::new(&settings.oracle.url, settings.oracle.connect_timeout())
        .map_err(|e| miette::miette!("oracle client failed: {e}"))?;

    let engine = Arc::new(Engine::new(Arc::new(store), Arc::new(oracle)));

    // warm the policy cache, then keep it fresh in the background
    engine.initial_load().await;
    let watch_engine = engine.clone();
    tokio::spawn(async move {
        watch_engine.watcher().await;
    });

    // start web server
    web::serve(settings, engine).await?;
    Ok(())
}
