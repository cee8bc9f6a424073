#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use auth_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log_level.as_level())?;

    log::info!(
        "starting: client_port={}, internal_port={}, database={}:{}/{}",
        config.auth_client_port,
        config.internal_port,
        config.database_ip,
        config.database_port,
        config.database_name,
    );

    auth_server::startup(config).await
}
