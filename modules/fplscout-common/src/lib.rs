pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, RunConfig};
pub use error::FetchError;
pub use types::*;
