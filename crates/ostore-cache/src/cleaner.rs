//! Background hard-prune of the indexer cache.
//!
//! Each tick purges stale records, then compares the cache totals with the
//! configured limits. When either limit is exceeded the entry count is cut
//! by `reduction_factor`, evicting the least-read entries first. A cache far
//! over its limits converges over several ticks; one tick never does more
//! than one cut.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::IndexerCache;
use crate::error::{CacheError, CacheResult};

pub const DEFAULT_MAX_QUERIES: usize = 10_000;
pub const DEFAULT_MAX_OBJECTS: usize = 1_000_000;
pub const DEFAULT_REDUCTION_FACTOR: usize = 2;
pub const DEFAULT_CLEAN_FREQUENCY: Duration = Duration::from_secs(60);

/// Longest uninterrupted sleep, so shutdown is observed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Limits and cadence of the [`HardPruneCacheCleaner`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanerConfig {
    pub max_queries: usize,
    pub max_objects: usize,
    pub reduction_factor: usize,
    pub clean_frequency: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            max_queries: DEFAULT_MAX_QUERIES,
            max_objects: DEFAULT_MAX_OBJECTS,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
            clean_frequency: DEFAULT_CLEAN_FREQUENCY,
        }
    }
}

impl CleanerConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.reduction_factor < 2 {
            return Err(CacheError::InvalidConfig(format!(
                "reduction_factor must be at least 2, got {}",
                self.reduction_factor
            )));
        }
        if self.clean_frequency.is_zero() {
            return Err(CacheError::InvalidConfig(
                "clean_frequency must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Periodic hard-prune of an [`IndexerCache`].
///
/// The sweep thread starts on construction and is stopped and joined by
/// [`shutdown`](Self::shutdown) or on drop.
pub struct HardPruneCacheCleaner {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    config: CleanerConfig,
}

impl HardPruneCacheCleaner {
    pub fn start(cache: Arc<IndexerCache>, config: CleanerConfig) -> CacheResult<Self> {
        config.validate()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread_config = config.clone();

        let handle = thread::Builder::new()
            .name("ostore-cache-cleaner".into())
            .spawn(move || run(&cache, &thread_config, &flag))
            .map_err(CacheError::Spawn)?;

        info!(
            max_queries = config.max_queries,
            max_objects = config.max_objects,
            reduction_factor = config.reduction_factor,
            frequency_ms = config.clean_frequency.as_millis() as u64,
            "cache cleaner started"
        );
        Ok(Self {
            shutdown,
            handle: Some(handle),
            config,
        })
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stop the sweep thread and wait for it. Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cache cleaner thread panicked");
            } else {
                debug!("cache cleaner stopped");
            }
        }
    }
}

impl Drop for HardPruneCacheCleaner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HardPruneCacheCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardPruneCacheCleaner")
            .field("config", &self.config)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn run(cache: &IndexerCache, config: &CleanerConfig, shutdown: &AtomicBool) {
    let slice = SLEEP_SLICE.min(config.clean_frequency);
    while !shutdown.load(Ordering::Relaxed) {
        let mut elapsed = Duration::ZERO;
        while elapsed < config.clean_frequency {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(slice);
            elapsed += slice;
        }
        tick(cache, config);
    }
}

/// One cleaning pass. Returns the number of entries evicted.
fn tick(cache: &IndexerCache, config: &CleanerConfig) -> usize {
    if let Err(e) = cache.purge_stale() {
        warn!(error = %e, "stale purge skipped");
    }

    let totals = cache.totals();
    if totals.queries <= config.max_queries && totals.object_ids <= config.max_objects {
        return 0;
    }

    let mut entries: Vec<_> = cache.enumerate().collect();
    let target = entries.len() / config.reduction_factor;
    let excess = entries.len() - target;
    entries.sort_by_key(|entry| entry.access_count);
    entries.truncate(excess);

    let removed = cache.remove(&entries);
    info!(
        queries = totals.queries,
        object_ids = totals.object_ids,
        removed,
        "cache pruned"
    );
    removed
}
