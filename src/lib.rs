#[cfg(feature = "cli")]
pub mod config;
pub mod core;
pub mod domain;
pub mod jobs;
pub mod results;
pub mod rules;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{cli::LocalStorage, toml_config::ServerConfig, CliConfig};

pub use core::{catalog::RuleCatalog, context::ServiceContext, engine::RuleEngine};
pub use jobs::{JobQueue, JobWorkers, ValidationExecutor, ValidationService};
pub use results::{FileResultProvider, InMemoryResultProvider};
pub use utils::error::{Result, ValidatorError};
