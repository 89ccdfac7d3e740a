//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI flags / environment
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → TlsSettings passed by value into the TLS subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; certificate paths are fixed for the
//!   process lifetime, only the files behind them change
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - No process-wide config object: every consumer receives its section

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, ListenerConfig, ObservabilityConfig, TlsSettings};
