use crate::domain::symbol::SymbolClass;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::FromPrimitive;

/// Inputs for sizing one symbol's order on one tick.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub target_value: Decimal,
    pub current_value: Decimal,
    pub price: Decimal,
    pub min_notional: Decimal,
}

/// BUY quantity, or `None` when the position is already close enough to
/// target. The gap must exceed the class threshold before a buy fires,
/// which keeps small drifts from churning orders.
pub fn size_buy(class: SymbolClass, inputs: &SizingInputs) -> Option<Decimal> {
    if inputs.price <= Decimal::ZERO || inputs.target_value <= Decimal::ZERO {
        return None;
    }
    let threshold = Decimal::from_f64(class.buy_threshold()).unwrap_or(Decimal::ONE);
    if inputs.current_value >= inputs.target_value * threshold {
        return None;
    }

    let gap_qty = (inputs.target_value - inputs.current_value) / inputs.price;
    let min_qty = inputs.min_notional / inputs.price;
    let qty = gap_qty.max(min_qty);

    let rounded = match class {
        SymbolClass::Crypto => {
            qty.round_dp_with_strategy(class.qty_precision(), RoundingStrategy::ToZero)
        }
        // Equities trade in whole shares.
        SymbolClass::Equity => qty.floor(),
    };

    if rounded <= Decimal::ZERO {
        return None;
    }
    Some(rounded)
}

/// SELL quantity: the full position, but only when it is above dust.
pub fn size_sell(class: SymbolClass, held_qty: Decimal) -> Option<Decimal> {
    if held_qty <= class.dust_qty() {
        return None;
    }
    Some(held_qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cold_start_buy_sizes_to_target() {
        // 100_000 equity, 3.5% allocation, BTC at 107_000.
        let qty = size_buy(
            SymbolClass::Crypto,
            &SizingInputs {
                target_value: dec!(3500),
                current_value: Decimal::ZERO,
                price: dec!(107000),
                min_notional: dec!(25),
            },
        )
        .unwrap();

        let expected = (dec!(3500) / dec!(107000))
            .round_dp_with_strategy(6, RoundingStrategy::ToZero);
        assert_eq!(qty, expected);
        // Sanity: about 0.0327 BTC.
        assert!(qty > dec!(0.032) && qty < dec!(0.033));
    }

    #[test]
    fn near_target_positions_do_not_rebuy() {
        // 97.9% of target is within the crypto threshold of 0.98.
        let qty = size_buy(
            SymbolClass::Crypto,
            &SizingInputs {
                target_value: dec!(1000),
                current_value: dec!(985),
                price: dec!(100),
                min_notional: dec!(25),
            },
        );
        assert!(qty.is_none());
    }

    #[test]
    fn small_gap_is_floored_to_min_notional() {
        let qty = size_buy(
            SymbolClass::Crypto,
            &SizingInputs {
                target_value: dec!(1000),
                current_value: dec!(970),
                price: dec!(100),
                min_notional: dec!(50),
            },
        )
        .unwrap();
        // Gap is 0.3 units; min notional forces 0.5.
        assert_eq!(qty, dec!(0.5));
    }

    #[test]
    fn equity_buys_whole_shares_or_nothing() {
        let qty = size_buy(
            SymbolClass::Equity,
            &SizingInputs {
                target_value: dec!(2000),
                current_value: Decimal::ZERO,
                price: dec!(512),
                min_notional: dec!(25),
            },
        )
        .unwrap();
        assert_eq!(qty, dec!(3));

        // A gap under one share yields nothing.
        let qty = size_buy(
            SymbolClass::Equity,
            &SizingInputs {
                target_value: dec!(300),
                current_value: Decimal::ZERO,
                price: dec!(512),
                min_notional: dec!(25),
            },
        );
        assert!(qty.is_none());
    }

    #[test]
    fn sell_ignores_dust() {
        assert!(size_sell(SymbolClass::Crypto, dec!(0.0000005)).is_none());
        assert_eq!(size_sell(SymbolClass::Crypto, dec!(0.5)), Some(dec!(0.5)));
        assert!(size_sell(SymbolClass::Equity, dec!(0.0005)).is_none());
    }
}
