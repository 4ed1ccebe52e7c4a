//! Configuration loading, validation and env substitution.
//!
//! Config files: `chatrelay.toml`, `chatrelay.yaml`, or `chatrelay.json`,
//! searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file text.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        ConfigFormat, config_dir, discover_and_load, find_config_file, load_config,
        load_config_value,
    },
    schema::{BusSection, ChannelsConfig, RelayConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_str},
};
