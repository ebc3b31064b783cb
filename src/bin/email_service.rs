//! email-service: notification queue consumer.

use anyhow::{Context, Result};
use pricewatch_backend::email::{Mailer, SmtpMailer};
use pricewatch_backend::queue::TriggerConsumer;
use pricewatch_backend::store::{AlertRepo, PgStore};
use pricewatch_backend::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("configuration error")?;

    let store = PgStore::connect(&config.postgres_address)
        .await
        .context("failed to connect to postgres")?;
    let repo: Arc<dyn AlertRepo> = Arc::new(store);

    let mailer: Arc<dyn Mailer> = Arc::new(
        SmtpMailer::new(
            &config.smtp_host,
            &config.smtp_username,
            &config.smtp_password,
            &config.smtp_from_name,
            &config.smtp_from_address,
        )
        .context("failed to set up smtp transport")?,
    );

    let consumer = TriggerConsumer::new(
        &config.kafka_address,
        &config.kafka_group,
        &config.kafka_topic,
        repo,
        mailer,
    )
    .context("failed to set up kafka consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(group = %config.kafka_group, topic = %config.kafka_topic, "starting consumer");
    consumer.run(shutdown_rx).await;

    info!("email-service stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pricewatch_backend=debug,email_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
