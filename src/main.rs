// src/main.rs

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use vanguard_rs_reputation::api;
use vanguard_rs_reputation::app::AppState;
use vanguard_rs_reputation::config::Config;
use vanguard_rs_reputation::core::analyzer::Analyzer;
use vanguard_rs_reputation::core::cache::{Cache, MemoryCache};
use vanguard_rs_reputation::core::knowledge_base::KnowledgeBase;
use vanguard_rs_reputation::core::rank::RankTable;
use vanguard_rs_reputation::core::scanner::{ProbeResources, default_probes};
use vanguard_rs_reputation::logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Config::parse();
    logging::initialize_logging(config.log_to_file)?;

    let ranks = match &config.rank_file {
        Some(path) => RankTable::load(path)?,
        None => {
            warn!("No rank file configured, every domain will be treated as unranked.");
            RankTable::empty()
        }
    };
    let resources = ProbeResources::build(Arc::new(ranks), Arc::new(KnowledgeBase::builtin()))?;
    let cache: Option<Arc<dyn Cache>> = if config.no_cache {
        warn!("Cache disabled, rate limiting is off.");
        None
    } else {
        Some(Arc::new(MemoryCache::new()))
    };

    let analyzer = Analyzer::new(default_probes(&resources), cache, config.analyzer_settings());
    let state = AppState::new(analyzer, config.rate_limit_settings());
    let router = api::router(state);

    let listener = TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, "Listening.");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C.");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}
