//! Shelfshare loan ledger - database setup
//!
//! Migration and schema-check runner: connects to the database, applies the
//! migrations, verifies the tables the ledger depends on and exits. Host
//! services embed the ledger through `Services::new`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfshare_loans::{config::AppConfig, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("shelfshare_loans={},sqlx=warn", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Shelfshare loan ledger v{}", env!("CARGO_PKG_VERSION"));

    let pool = db::connect(&config.database).await?;
    tracing::info!("Connected to database");

    db::migrate(&pool).await?;
    tracing::info!("Database migrations completed");

    if !db::check_schema(&pool).await? {
        anyhow::bail!("Database schema is incomplete");
    }
    tracing::info!("Schema verified, database ready for the loan ledger");

    Ok(())
}
