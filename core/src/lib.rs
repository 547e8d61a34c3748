pub mod network;
pub mod features;
pub mod model;
pub mod verdict;
pub mod pipeline;
pub mod config;
pub mod error;
pub mod utils;

pub use error::{FailureKind, SentinelError, Result};
pub use config::Config;
