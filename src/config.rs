use atmospherics::AtmosConfig;
use bevy::log::warn;
use bevy::prelude::Resource;
use serde::Deserialize;

use ::config::{Config, Environment, File, FileFormat};

const CONFIG_BASENAME: &str = "config";

#[derive(Debug, Clone, Default, Deserialize, Resource)]
#[serde(default)]
pub struct AppConfig {
    pub atmospherics: AtmosConfig,
    pub debug: DebugConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Fixed ticks to simulate before exiting. Zero runs until interrupted.
    pub ticks: u64,
    /// Log grid statistics every this many ticks.
    pub stats_interval: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            stats_interval: 50,
        }
    }
}

pub fn load_config() -> AppConfig {
    match load_config_inner() {
        Ok(config) => config,
        Err(error) => {
            warn!("Failed to load config, using defaults: {error}");
            AppConfig::default()
        }
    }
}

fn load_config_inner() -> Result<AppConfig, ::config::ConfigError> {
    let defaults = AppConfig::default();

    let builder = Config::builder()
        .set_default("debug.log_level", defaults.debug.log_level)?
        .set_default("run.ticks", defaults.run.ticks)?
        .set_default("run.stats_interval", defaults.run.stats_interval)?
        .set_default("atmospherics.tick_rate_hz", defaults.atmospherics.tick_rate_hz)?
        .set_default(
            "atmospherics.standard_pressure",
            f64::from(defaults.atmospherics.standard_pressure),
        )?
        .add_source(File::new(CONFIG_BASENAME, FileFormat::Toml).required(false))
        .add_source(File::new(CONFIG_BASENAME, FileFormat::Ron).required(false))
        .add_source(
            Environment::with_prefix("ATMOSIM")
                .separator("__")
                .try_parsing(true),
        );

    builder.build()?.try_deserialize()
}
