//! Store configuration.
//!
//! Configuration is merged from three layers, later layers winning:
//! 1. Built-in defaults (`StoreParams::default()`)
//! 2. A TOML file with a `[store]` table
//! 3. `Key=Value` parameters (case-insensitive keys), e.g. from the CLI

mod layers;
mod params;

pub use layers::{load_layers, parse_param, ConfigError};
pub use params::StoreParams;
