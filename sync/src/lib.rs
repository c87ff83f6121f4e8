pub mod adapters;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod macros;
pub mod pipeline;
pub mod protocol;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
