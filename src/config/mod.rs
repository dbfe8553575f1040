//! Capture Configuration Module
//!
//! Provides the link, buffer and cycle-detection settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `GAIT_CONFIG` environment variable (path to TOML file)
//! 2. `gait_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! There is no global instance. Load once at startup and pass it down:
//!
//! ```ignore
//! let config = CaptureConfig::load();
//! let session = CaptureSession::new(config);
//! ```

mod capture_config;
pub mod defaults;

pub use capture_config::*;
