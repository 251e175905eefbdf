use anyhow::Context;
use shareledger::orchestration::{spawn_outcome_reporter, RecalcSettings};
use shareledger::{api, config::Config, CustomerLocks, OrderStore, RecalcDispatcher, Recalculator, ShopifyStore};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;

    let store: Arc<dyn OrderStore> = Arc::new(
        ShopifyStore::new(
            &config.base_url,
            &config.api_version,
            config.access_token.clone(),
            config.retry_max_elapsed,
        )
        .context("Failed to build store client")?,
    );

    let settings = RecalcSettings::from(&config);
    tracing::info!(
        shop = %config.shop_name,
        share_unit = %settings.unit,
        mode = ?settings.mode,
        seed_fallback = ?settings.seed_fallback,
        "Ledger settings loaded"
    );

    let recalculator = Arc::new(Recalculator::new(store.clone(), settings));
    let (dispatcher, outcomes) = RecalcDispatcher::new(recalculator, CustomerLocks::new());
    spawn_outcome_reporter(outcomes);

    let app = api::create_router(api::AppState::new(dispatcher, store, &config.webhook_secret));

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.bind_addr, config.port))?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
