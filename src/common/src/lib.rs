pub mod cli;
pub mod config;
pub mod model;
pub mod queue;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use store::Store;
