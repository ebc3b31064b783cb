//! alert-service: market ingest + matching engine + admin API.

use anyhow::{Context, Result};
use pricewatch_backend::api::{self, ApiState};
use pricewatch_backend::auth::TokenHandler;
use pricewatch_backend::errors::ServiceError;
use pricewatch_backend::index::{PriceIndex, RedisIndex};
use pricewatch_backend::ingest::{LastPriceMap, MarketIngester};
use pricewatch_backend::matcher::Matcher;
use pricewatch_backend::models::Symbol;
use pricewatch_backend::queue::{KafkaTriggerProducer, TriggerSink};
use pricewatch_backend::reconcile::rebuild_live_index;
use pricewatch_backend::store::{AlertRepo, PgStore};
use pricewatch_backend::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("configuration error")?;

    let store = PgStore::connect(&config.postgres_address)
        .await
        .context("failed to connect to postgres")?;
    let repo: Arc<dyn AlertRepo> = Arc::new(store);
    info!("durable store connected");

    let index: Arc<dyn PriceIndex> = Arc::new(
        RedisIndex::connect(&config.redis_address)
            .await
            .context("failed to connect to redis")?,
    );
    info!("live index connected");

    let producer: Arc<dyn TriggerSink> = Arc::new(
        KafkaTriggerProducer::new(&config.kafka_address, &config.kafka_topic)
            .context("failed to set up kafka producer")?,
    );

    let tokens = Arc::new(
        TokenHandler::new(&config.token_symmetric_key, config.token_ttl)
            .context("failed to create token handler")?,
    );

    // Hot state must reflect durable truth before any tick can fire.
    let restored = rebuild_live_index(repo.as_ref(), index.as_ref())
        .await
        .map_err(|e| anyhow::anyhow!("index reconciliation failed: {e}"))?;
    info!(restored, "reconciled live index on startup");

    // Central error channel: background tasks report per-item failures here
    // and keep running.
    let (error_tx, mut error_rx) = mpsc::channel::<ServiceError>(256);
    tokio::spawn(async move {
        while let Some(e) = error_rx.recv().await {
            error!(error = %e, "background task error");
        }
    });

    // Process-wide shutdown signal, observed by every task at its next
    // suspension point.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    // A refused subscription means the service would run blind: fail startup.
    let prices = Arc::new(LastPriceMap::new());
    let ingester = MarketIngester::connect(
        &config.market_feed_url,
        &Symbol::ALL,
        prices.clone(),
        error_tx.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("market feed connect failed: {e}"))?;
    tokio::spawn(ingester.run(shutdown_rx.clone()));

    let matcher = Arc::new(Matcher::new(
        prices,
        index.clone(),
        repo.clone(),
        producer,
        error_tx,
        config.tick_interval,
    ));
    matcher.spawn_all(&shutdown_rx);
    info!(symbols = Symbol::COUNT, "matching engine started");

    let app = api::router(ApiState {
        repo,
        index,
        tokens,
    });

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))?;
    info!(address = %config.listen_address, "API server listening");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("server error")?;

    info!("alert-service stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pricewatch_backend=debug,alert_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
