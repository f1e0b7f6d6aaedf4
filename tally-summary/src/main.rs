use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use tally_backends::postgres::PgBackend;
use tally_backends::trino::TrinoClient;
use tally_summary::config::SummaryConfig;
use tally_summary::{worker, Summarizer};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let config = SummaryConfig::from_env()?;

    let pg = Arc::new(
        PgBackend::connect(&config.database_url, config.db_max_connections)
            .await
            .context("Failed to connect to Postgres")?,
    );
    let trino = Arc::new(
        TrinoClient::new(&config.trino_url, &config.trino_user, &config.trino_catalog)
            .context("Failed to build Trino client")?,
    );
    info!(
        trino_url = %config.trino_url,
        catalog = %config.trino_catalog,
        retries = config.partition_retry.attempts,
        "backends ready"
    );

    let summarizer = Summarizer::new(
        pg.clone(),
        trino,
        pg.clone(),
        pg,
        config.partition_retry,
    );

    // Task consumer: one unit of work at a time, in arrival order
    {
        let redis_url = config.redis_url.clone();
        tokio::spawn(async move {
            if let Err(e) = worker::run_summary_consumer(&redis_url, summarizer).await {
                error!("summary consumer stopped: {:?}", e);
            }
        });
    }

    // Minimal HTTP health endpoint (helps ops)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().route("/health", get(health)).layer(cors);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("Summary service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}
