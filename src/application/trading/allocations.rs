use crate::domain::allocation::{AllocationError, AllocationMap};
use crate::domain::errors::StateError;
use crate::infrastructure::persistence::StateStore;
use tracing::{info, warn};

/// Loads allocations with the override-then-fallback discipline.
///
/// `allocations_override.json` is tried first; if its keys look like
/// strategy identifiers rather than symbols it is discarded in favor of
/// the authoritative symbol-keyed `allocations_symbols.json`. Mid-run
/// failures keep the previous good map so a half-written file cannot
/// zero out the portfolio.
pub struct AllocationLoader {
    store: StateStore,
    last_good: AllocationMap,
}

impl AllocationLoader {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            last_good: AllocationMap::default(),
        }
    }

    /// Startup load. A map whose fractions sum far past 1 is corrupt
    /// persistent state and is refused rather than healed.
    pub fn load_startup(&mut self) -> Result<AllocationMap, StateError> {
        match self.resolve() {
            Ok(map) => {
                self.last_good = map.clone();
                Ok(map)
            }
            Err(ResolveError::Corrupt(e)) => Err(e),
            Err(ResolveError::Sum(path, sum)) => Err(StateError::Corrupt {
                path,
                detail: format!("allocation fractions sum to {sum}"),
            }),
        }
    }

    /// Per-tick load. Any failure degrades to the previous good map with
    /// a logged reason; the loop continues.
    pub fn load_tick(&mut self) -> AllocationMap {
        match self.resolve() {
            Ok(map) => {
                self.last_good = map.clone();
                map
            }
            Err(e) => {
                warn!("AllocationLoader: keeping previous allocations: {e:?}");
                self.last_good.clone()
            }
        }
    }

    fn resolve(&self) -> Result<AllocationMap, ResolveError> {
        match self.store.read_allocations_override() {
            Ok(Some(raw)) => match AllocationMap::parse(raw) {
                Ok(map) => return Ok(map),
                Err(AllocationError::StrategyKeys(keys)) => {
                    warn!(
                        "AllocationLoader: override file holds strategy weights, not symbol \
                         allocations (offending keys: {keys:?}); falling back to symbols file"
                    );
                }
                Err(AllocationError::SumExceeded(sum)) => {
                    return Err(ResolveError::Sum(
                        self.store.paths().allocations_override().display().to_string(),
                        sum,
                    ));
                }
                Err(e) => {
                    warn!("AllocationLoader: override file rejected: {e}; falling back");
                }
            },
            Ok(None) => {
                info!("AllocationLoader: no override file; using symbols file");
            }
            Err(e) => {
                warn!("AllocationLoader: override file unreadable: {e}; falling back");
            }
        }

        match self.store.read_allocations_symbols() {
            Ok(Some(raw)) => match AllocationMap::parse(raw) {
                Ok(map) => Ok(map),
                Err(AllocationError::SumExceeded(sum)) => Err(ResolveError::Sum(
                    self.store.paths().allocations_symbols().display().to_string(),
                    sum,
                )),
                Err(e) => {
                    warn!("AllocationLoader: symbols file rejected: {e}");
                    Ok(AllocationMap::default())
                }
            },
            Ok(None) => Ok(AllocationMap::default()),
            Err(e) => Err(ResolveError::Corrupt(e)),
        }
    }
}

#[derive(Debug)]
enum ResolveError {
    Corrupt(StateError),
    Sum(String, f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::StatePaths;
    use std::collections::HashMap;

    fn loader() -> AllocationLoader {
        let dir = std::env::temp_dir().join(format!("neolight-alloc-{}", uuid::Uuid::new_v4()));
        let store = StateStore::new(StatePaths::new(dir));
        store.ensure_dirs().unwrap();
        AllocationLoader::new(store)
    }

    fn write(store: &StateStore, path: &std::path::Path, entries: &[(&str, f64)]) {
        let map: HashMap<String, f64> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        store.write_json(path, &map).unwrap();
    }

    #[test]
    fn override_file_wins_when_valid() {
        let mut loader = loader();
        let paths = loader.store.paths().clone();
        write(&loader.store, &paths.allocations_override(), &[("BTC-USD", 0.5)]);
        write(&loader.store, &paths.allocations_symbols(), &[("BTC-USD", 0.1)]);

        let map = loader.load_startup().unwrap();
        assert_eq!(map.fraction("BTC-USD"), 0.5);
    }

    #[test]
    fn strategy_keys_fall_back_to_symbols_file() {
        let mut loader = loader();
        let paths = loader.store.paths().clone();
        write(
            &loader.store,
            &paths.allocations_override(),
            &[("turtle_trading", 0.7), ("mean_reversion_rsi", 0.1)],
        );
        write(
            &loader.store,
            &paths.allocations_symbols(),
            &[("BTC-USD", 0.035), ("SPY", 0.2)],
        );

        let map = loader.load_startup().unwrap();
        assert_eq!(map.fraction("BTC-USD"), 0.035);
        assert_eq!(map.fraction("turtle_trading"), 0.0);
    }

    #[test]
    fn oversized_sum_is_fatal_at_startup() {
        let mut loader = loader();
        let paths = loader.store.paths().clone();
        write(
            &loader.store,
            &paths.allocations_symbols(),
            &[("SPY", 0.7), ("QQQ", 0.5)],
        );

        assert!(loader.load_startup().is_err());
    }

    #[test]
    fn tick_load_keeps_previous_map_on_failure() {
        let mut loader = loader();
        let paths = loader.store.paths().clone();
        write(&loader.store, &paths.allocations_symbols(), &[("SPY", 0.3)]);
        assert_eq!(loader.load_startup().unwrap().fraction("SPY"), 0.3);

        // The allocator half-writes garbage mid-run.
        std::fs::write(paths.allocations_symbols(), b"{broken").unwrap();
        let map = loader.load_tick();
        assert_eq!(map.fraction("SPY"), 0.3);
    }

    #[test]
    fn absent_files_mean_empty_map() {
        let mut loader = loader();
        let map = loader.load_startup().unwrap();
        assert!(map.is_empty());
    }
}
