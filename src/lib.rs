pub mod types;
pub mod error;
pub mod config;
pub mod provider;
pub mod data;
pub mod collector;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use error::{IngestError, Result};
pub use config::Config;
