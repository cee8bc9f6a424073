pub mod catalog;
pub mod config;
pub mod handlers;
pub mod server;
pub mod statistics;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;

use self::catalog::MysqlCatalog;
use self::config::Config;
use self::statistics::Statistics;

use service::Registry;

/// Builds the catalog/registry/statistics collaborators and runs the
/// listener supervisor. Exposed separately from `main` so integration
/// tests can start the server in-process.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    let pool = MySqlPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url())
        .await
        .context("failed to connect to the catalog database")?;

    let catalog: Arc<dyn catalog::Catalog> = Arc::new(MysqlCatalog::new(pool));
    let registry = Arc::new(Registry::new());
    let statistics = Arc::new(Statistics::default());

    server::start(config, registry, catalog, statistics).await
}
