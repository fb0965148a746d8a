//! Engine Configuration Module
//!
//! Operator-tunable parameters for calibration and serving, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `PDM_CONFIG` environment variable (path to TOML file)
//! 2. `pdm_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The loaded [`EngineConfig`] is an ordinary value: build it once in
//! `main()` and pass it by reference.
//!
//! ```ignore
//! let config = EngineConfig::load();
//! let settings = config.calibration_settings()?;
//! ```

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
