pub mod config;
pub mod intent;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use intent::{classify, Intent, IntentRouter, KeywordRule};
