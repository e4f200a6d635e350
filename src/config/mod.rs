//! Configuration: `config.toml` settings with sensible defaults.

pub mod settings;

pub use settings::Settings;
