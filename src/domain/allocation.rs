use crate::domain::symbol::is_symbol_key;
use serde::Deserialize;
use std::collections::HashMap;

/// Tolerance on the allocation sum for floating error.
pub const SUM_EPSILON: f64 = 0.01;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AllocationError {
    /// Keys look like strategy identifiers, not symbols. The loader falls
    /// back to the symbols-only file when it sees this.
    #[error("keys fail the symbol pattern (strategy weights, not symbol allocations): {0:?}")]
    StrategyKeys(Vec<String>),

    #[error("fraction for {symbol} out of [0,1]: {fraction}")]
    InvalidFraction { symbol: String, fraction: f64 },

    #[error("allocation fractions sum to {0}, above 1 + epsilon")]
    SumExceeded(f64),
}

/// A validated symbol-keyed allocation map.
///
/// Owned by the external allocator; the trade loop holds a read-only
/// most-recent-value view. Fractions are used as-is, never renormalized.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "HashMap<String, f64>")]
pub struct AllocationMap {
    entries: HashMap<String, f64>,
}

impl AllocationMap {
    pub fn parse(raw: HashMap<String, f64>) -> Result<Self, AllocationError> {
        let bad_keys: Vec<String> = raw
            .keys()
            .filter(|k| !is_symbol_key(k))
            .cloned()
            .collect();
        if !bad_keys.is_empty() {
            return Err(AllocationError::StrategyKeys(bad_keys));
        }

        for (symbol, fraction) in &raw {
            if !fraction.is_finite() || *fraction < 0.0 || *fraction > 1.0 {
                return Err(AllocationError::InvalidFraction {
                    symbol: symbol.clone(),
                    fraction: *fraction,
                });
            }
        }

        let sum: f64 = raw.values().sum();
        if sum > 1.0 + SUM_EPSILON {
            return Err(AllocationError::SumExceeded(sum));
        }

        Ok(Self { entries: raw })
    }

    /// Fraction for a symbol; absent symbols allocate zero.
    pub fn fraction(&self, symbol: &str) -> f64 {
        self.entries.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl TryFrom<HashMap<String, f64>> for AllocationMap {
    type Error = AllocationError;

    fn try_from(raw: HashMap<String, f64>) -> Result<Self, Self::Error> {
        AllocationMap::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn accepts_symbol_keyed_map() {
        let m = AllocationMap::parse(map(&[("BTC-USD", 0.035), ("SPY", 0.2)])).unwrap();
        assert_eq!(m.fraction("BTC-USD"), 0.035);
        assert_eq!(m.fraction("MSFT"), 0.0);
    }

    #[test]
    fn rejects_strategy_keys() {
        let err =
            AllocationMap::parse(map(&[("turtle_trading", 0.7), ("mean_reversion_rsi", 0.1)]))
                .unwrap_err();
        assert!(matches!(err, AllocationError::StrategyKeys(_)));
    }

    #[test]
    fn sum_tolerates_epsilon_but_not_more() {
        // 1.005 is within epsilon of 1.
        assert!(AllocationMap::parse(map(&[("SPY", 0.6), ("QQQ", 0.405)])).is_ok());
        // 1.1 is not.
        let err = AllocationMap::parse(map(&[("SPY", 0.6), ("QQQ", 0.5)])).unwrap_err();
        assert!(matches!(err, AllocationError::SumExceeded(_)));
    }

    #[test]
    fn rejects_out_of_range_fractions() {
        assert!(AllocationMap::parse(map(&[("SPY", -0.1)])).is_err());
        assert!(AllocationMap::parse(map(&[("SPY", 1.5)])).is_err());
        assert!(AllocationMap::parse(map(&[("SPY", f64::NAN)])).is_err());
    }

    #[test]
    fn zero_fraction_is_kept_not_dropped() {
        let m = AllocationMap::parse(map(&[("BTC-USD", 0.0)])).unwrap();
        assert_eq!(m.fraction("BTC-USD"), 0.0);
        assert_eq!(m.len(), 1);
    }
}
