use std::{
    collections::HashMap,
    process,
    sync::{Arc, Mutex},
    time::Duration,
};

use healing_cache::{
    cache::{
        BuildError, Builder, CacheConfig, ChangeSet, EntryMeta, ExpirationPolicy, HealingCache,
        Reconciler,
    },
    config,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const CHANGE_EVERY: u32 = 5;

/// In-memory product prices standing in for a repository.
#[derive(Default)]
struct Catalog {
    prices: Mutex<HashMap<u32, u64>>,
}

impl Catalog {
    fn seeded() -> Self {
        let catalog = Self::default();
        if let Ok(mut prices) = catalog.prices.lock() {
            prices.extend([(1, 1_250), (2, 899), (3, 4_999)]);
        }
        catalog
    }

    fn price(&self, id: u32) -> Result<u64, BuildError> {
        let prices = self
            .prices
            .lock()
            .map_err(|_| BuildError::new("catalog lock poisoned"))?;
        prices
            .get(&id)
            .copied()
            .ok_or_else(|| BuildError::new(format!("product {id} not found")))
    }

    fn total(&self) -> Result<u64, BuildError> {
        let prices = self
            .prices
            .lock()
            .map_err(|_| BuildError::new("catalog lock poisoned"))?;
        Ok(prices.values().sum())
    }

    fn bump(&self, id: u32) {
        if let Ok(mut prices) = self.prices.lock() {
            if let Some(price) = prices.get_mut(&id) {
                *price += 1;
            }
        }
    }
}

type Ctx = Arc<Catalog>;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (_cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache: HealingCache<u64, Ctx> = HealingCache::new(cache_config, Arc::new(Catalog::seeded()));

    warm(&cache).await;

    let reconciler = cache.spawn_reconciler();
    if reconciler.is_none() {
        info!("Background loop disabled; draining after each change");
    }
    let manual = Reconciler::new(cache.clone());

    let mut ticker = tokio::time::interval(cache.config().background_wait_non_zero());
    ticker.tick().await;
    let mut ticks = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ticks = ticks.wrapping_add(1);
                if ticks % CHANGE_EVERY != 0 {
                    continue;
                }
                let product = ticks / CHANGE_EVERY % 3 + 1;
                cache.context().bump(product);
                let changes: ChangeSet = ["catalog::model::Product"].into_iter().collect();
                cache.apply_changes(&changes);
                if reconciler.is_none() {
                    manual.drain().await;
                }
                match cache.get("Catalog:total").await {
                    Some(total) => info!(product, total, "Catalog total after price change"),
                    None => warn!(product, "Catalog total not cached"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown requested");
                break;
            }
        }
    }

    if let Some(handle) = reconciler {
        handle.shutdown().await;
    }
    Ok(())
}

/// Populate one entry per product plus the catalog total depending on them.
async fn warm(cache: &HealingCache<u64, Ctx>) {
    let total = EntryMeta::new("Catalog:total", Builder::sync(|catalog: Ctx| catalog.total()))
        .with_policy(ExpirationPolicy::LongTermAutoReset);
    if let Err(err) = cache.get_or_create(total).await {
        warn!(error = %err, "Failed to warm catalog total");
    }

    for id in 1..=3u32 {
        let meta = EntryMeta::new(
            format!("Product:{id}"),
            Builder::sync(move |catalog: Ctx| catalog.price(id)),
        )
        .with_policy(ExpirationPolicy::ShortTermAutoReset)
        .with_related_keys(["Catalog:total"]);

        match cache.get_or_create(meta).await {
            Ok(price) => info!(product = id, price, "Warmed product price"),
            Err(err) => warn!(product = id, error = %err, "Failed to warm product price"),
        }
    }
}
