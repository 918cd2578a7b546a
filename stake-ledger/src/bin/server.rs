//! Stake ledger node: opens the store, imports genesis on first start and
//! drives end-of-block expiry on a fixed interval

use anyhow::Context;
use stake_ledger::ids::IdAllocator;
use stake_ledger::records;
use stake_ledger::{
    spawn_keeper_actor, ClaimSet, Config, Error, GenesisState, ReturnInFull, RocksStore,
    StakeKeeper,
};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration: explicit TOML file, else environment
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        "Starting stake ledger node"
    );

    let store = Arc::new(
        RocksStore::open(&config.data_dir, &config.rocksdb).context("opening RocksDB")?,
    );

    let genesis = match (&config.genesis_path, IdAllocator::initialized(store.as_ref())?) {
        (Some(path), false) => Some(
            GenesisState::from_file(path)
                .with_context(|| format!("reading genesis {}", path.display()))?,
        ),
        _ => None,
    };

    // Params stored with the ledger win over genesis, genesis over config
    let params = match (records::params(store.as_ref())?, &genesis) {
        (Some(stored), _) => {
            if stored != config.staking {
                tracing::warn!("Stored staking params override the configured staking params");
            }
            stored
        }
        (None, Some(genesis)) => {
            if genesis.params != config.staking {
                tracing::warn!("Genesis params override the configured staking params");
            }
            genesis.params.clone()
        }
        (None, None) => config.staking.clone(),
    };

    let mut keeper = StakeKeeper::new(
        Arc::clone(&store),
        ClaimSet::new(config.known_claims.iter().copied()),
        ReturnInFull,
        params,
    )?;

    if let Some(genesis) = &genesis {
        keeper.load_state(genesis).context("importing genesis")?;
    }

    let metrics = keeper.metrics().clone();
    let handle = spawn_keeper_actor(keeper, config.driver.mailbox_capacity);

    let mut ticker = interval(Duration::from_millis(config.driver.block_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // The node is the block-time source for the core
                let now = chrono::Utc::now();
                match handle.end_block(now).await {
                    Ok(_) => {}
                    // The actor stops itself on fatal errors; a closed mailbox means it is gone
                    Err(e) if e.is_fatal() || matches!(e, Error::Concurrency(_)) => {
                        tracing::error!(error = %e, "End-of-block drain failed, stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "End-of-block drain failed, retrying next block");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
        }
    }

    // The actor may already be gone after a fatal error
    let _ = handle.shutdown().await;

    tracing::info!(
        keys = store.approximate_keys().unwrap_or(0),
        "Shutting down stake ledger node"
    );
    tracing::debug!(metrics = %metrics.render().unwrap_or_default(), "Final metrics");
    Ok(())
}
