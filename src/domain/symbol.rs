use std::time::Duration;

/// Classification of a tradable instrument by symbol suffix.
///
/// Symbols ending in `-USD` are treated as 24/7 crypto pairs; everything
/// else trades on equity market hours. The class only affects cooldown
/// length, minimum trade size and data-source routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Crypto,
    Equity,
}

impl SymbolClass {
    pub fn of(symbol: &str) -> Self {
        if symbol.ends_with("-USD") {
            SymbolClass::Crypto
        } else {
            SymbolClass::Equity
        }
    }

    /// Minimum interval between trades on the same symbol.
    pub fn cooldown(&self) -> Duration {
        match self {
            SymbolClass::Crypto => Duration::from_secs(5 * 60),
            SymbolClass::Equity => Duration::from_secs(15 * 60),
        }
    }

    /// Floor applied to allocation fractions below 1%.
    pub fn min_allocation_fraction(&self) -> f64 {
        match self {
            SymbolClass::Crypto => 0.01,
            SymbolClass::Equity => 0.005,
        }
    }

    /// A BUY only fires while current value is below target * threshold.
    pub fn buy_threshold(&self) -> f64 {
        match self {
            SymbolClass::Crypto => 0.98,
            SymbolClass::Equity => 0.95,
        }
    }

    /// Quantities at or below this are treated as dust and never sold.
    pub fn dust_qty(&self) -> rust_decimal::Decimal {
        use rust_decimal::Decimal;
        match self {
            SymbolClass::Crypto => Decimal::new(1, 6), // 0.000001
            SymbolClass::Equity => Decimal::new(1, 3), // 0.001
        }
    }

    /// Decimal places orders are rounded to.
    pub fn qty_precision(&self) -> u32 {
        match self {
            SymbolClass::Crypto => 6,
            SymbolClass::Equity => 0,
        }
    }
}

/// Whether a string is a plausible symbol key for an allocation map.
///
/// Accepts `AAPL`, `BRK.B`, `BTC-USD`; rejects strategy identifiers like
/// `turtle_trading` or `mean_reversion_rsi` (underscores, lowercase).
pub fn is_symbol_key(key: &str) -> bool {
    let base = key.strip_suffix("-USD").unwrap_or(key);
    if base.is_empty() || base.len() > 10 {
        return false;
    }
    let mut chars = base.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    base.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.')
}
