pub mod breakers;
pub mod gate;

pub use breakers::{BreakerRegistry, QUOTE_FETCH, TRADE_EXECUTION};
pub use gate::{DenyReason, RiskGate, RiskGateConfig};
