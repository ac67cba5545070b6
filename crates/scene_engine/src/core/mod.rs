//! Core engine plumbing: configuration

pub mod config;

pub use config::{Config, ConfigError, EngineConfig, LoaderConfig};
