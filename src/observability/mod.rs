//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (generation, path, kind, peer_addr)
//!     → logging.rs (subscriber: env filter + pretty or JSON formatter)
//!     → stdout
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Library code only emits events; the binary installs the subscriber

pub mod logging;

pub use logging::{init_logging, LogFormat};
