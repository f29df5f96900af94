//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → one relay session per [[streams]] entry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    DirectoryConfig, ListenerConfig, LogFormat, ObservabilityConfig, RelayConfig, RetryConfig,
    StreamConfig, TimeoutConfig, TlsConfig, ViewerConfig,
};
pub use validation::{validate_config, ValidationError};
