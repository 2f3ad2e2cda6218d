use tracing_subscriber::EnvFilter;

use gear_hits::config::Config;
use gear_hits::server;
use gear_hits::store::{MemoryStore, RedisStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gear_hits=info".parse()?))
        .init();

    // ── 1. Identity and policy: any problem here stops the process ──
    let config = Config::from_env()?;
    tracing::info!(
        gear = %config.instance_id,
        application = %config.application_name,
        "Gear hit counter starting..."
    );

    // ── 2. Record store, then serve ──────────────────────────────
    if config.uses_memory_store() {
        tracing::warn!("Using in-process record store; hits are not shared between gears");
        server::run(config, MemoryStore::new()).await
    } else {
        let store = RedisStore::connect(&config.store_url, &config.store_key).await?;
        server::run(config, store).await
    }
}
