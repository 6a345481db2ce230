//! CapitalGit observability
//!
//! Tracing subscriber setup shared by the CapitalGit crates and by any
//! process embedding the versioned content engine.
//!
//! The engine itself only emits `tracing` events; nothing is printed unless a
//! subscriber is installed with [`init_tracing`] or [`init_tracing_with_config`].
//!
//! # Example
//!
//! ```no_run
//! use capitalgit_observability::{init_tracing_with_config, LogConfig, LogFormat};
//!
//! let config = LogConfig::from_env().with_format(LogFormat::Compact);
//! init_tracing_with_config(config).expect("logging already initialized");
//! tracing::info!(repository = "recipes", "engine started");
//! ```

pub mod config;
pub mod initialization;

pub use config::{LogConfig, LogError, LogFormat, LogOutput};
pub use initialization::{init_tracing, init_tracing_with_config};
