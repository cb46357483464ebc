use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::prelude::*;

use hostedpay::adapters::{
    PostgresOrderRepository, PostgresOrderStatusSync, PostgresTransactionStore,
};
use hostedpay::config::Config;
use hostedpay::vendor::VendorClient;
use hostedpay::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = hostedpay::startup::validate_environment(&config, &pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("startup validation failed");
    }

    let config = Arc::new(config);
    let vendor = Arc::new(VendorClient::new(&config.gateway));
    tracing::info!(
        mode = config.gateway.mode.as_str(),
        base_url = %config.gateway.base_url,
        "vendor client initialized"
    );

    let state = AppState::new(
        Arc::new(PostgresTransactionStore::new(pool.clone())),
        Arc::new(PostgresOrderRepository::new(pool.clone())),
        Arc::new(PostgresOrderStatusSync::new(pool.clone())),
        vendor,
        config.clone(),
    );

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
