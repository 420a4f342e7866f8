pub mod broker_state;
pub mod types;

pub use broker_state::{BrokerState, Position};
