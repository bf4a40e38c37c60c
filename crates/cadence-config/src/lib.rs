//! Configuration system for the Cadence task scheduler.
//!
//! Provides TOML-based configuration with:
//! - `[store]`, `[scheduler]`, `[runner]` and `[logging]` sections
//! - Config file layering (XDG user config + project-local overrides)
//! - Defaults for every field so partial files are valid

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, Layer, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path, xdg_data_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
