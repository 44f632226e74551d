use anyhow::Result;
use token_tracker::checkpoint::CheckpointStore;
use token_tracker::config::{Config, ConfigLayer, merge_layers};
use token_tracker::store::{StoreRegistry, TransferStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let config = merge_layers(Config::default(), &[ConfigLayer::from_env()?]);

    println!(
        "Running migrations on {} database: {}",
        config.storage.backend, config.storage.endpoint
    );
    let store = StoreRegistry::with_builtin().build(&config.storage)?;
    store.close()?;

    println!(
        "Preparing checkpoint store: {}",
        config.tracker.checkpoint_path
    );
    CheckpointStore::open(&config.tracker.checkpoint_path)?;

    println!("Migrations completed successfully!");

    Ok(())
}
