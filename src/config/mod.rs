//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated, immutable)
//!     → handed to the breaker registry, egress client and shutdown coordinator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; breaker state never outlives the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_or_default, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, CircuitBreakerOverrides, CircuitBreakerSettings, EgressConfig,
    ObservabilityConfig, ResilienceConfig, RetryOverrides, RetrySettings, ShutdownConfig,
};
