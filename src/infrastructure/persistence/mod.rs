pub mod shared_store;
pub mod state_store;

pub use shared_store::{ObjectSharedStore, SharedStore};
pub use state_store::{StatePaths, StateStore};
