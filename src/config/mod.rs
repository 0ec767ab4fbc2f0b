pub mod constants;
pub mod settings;

pub use settings::{CollectorSettings, ConfigError, SinkConfig};
