//! Engine Configuration Module
//!
//! Provides the engine configuration loaded from a TOML file, with
//! notification transports overridable from the environment.
//!
//! ## Loading Order
//!
//! 1. `VIGIL_CONFIG` environment variable (path to TOML file)
//! 2. `vigil.toml` in the current working directory
//! 3. Built-in defaults (no checks registered)
//!
//! ## Usage
//!
//! The loaded config is a plain value handed to `Engine::from_config()`;
//! there is no process-wide config instance, so tests can build as many
//! isolated engines as they need.
//!
//! ```ignore
//! let config = VigilConfig::load();
//! let engine = Engine::from_config(&config)?;
//! ```

mod vigil_config;
pub mod defaults;
pub mod validation;

pub use vigil_config::*;
