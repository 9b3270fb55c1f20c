//! # Emulator Configuration
//!
//! Every section and field is optional; a missing file section falls back to
//! the defaults below.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8765"
//!
//! [session]
//! tick_interval_ms = 100
//! max_propagation_depth = 16
//!
//! [sandbox]
//! interpreter = "python3"
//! launcher = ["firejail", "--quiet", "--net=none"]
//! timeout_secs = 10
//!
//! [[board.spi]]
//! bus = 0
//! device = 0
//! kind = "mcp3008"
//! vref = 3.3
//!
//! [[board.i2c]]
//! bus = 1
//! address = 0x76
//! kind = "bmp280"
//!
//! [[board.components]]
//! id = "LED1"
//! type = "led"
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::graph::{Component, Connection};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the emulator server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or_else(|_| {
            eprintln!("Unknown log level '{}', using info", self.level);
            tracing::Level::INFO
        })
    }
}

/// Per-session emulation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Background tick period; 0 disables the tick loop.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_event_history")]
    pub event_history: usize,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_max_propagation_depth")]
    pub max_propagation_depth: usize,
    /// Fixed seed for sensor noise, for reproducible runs.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            event_history: default_event_history(),
            subscriber_buffer: default_subscriber_buffer(),
            max_propagation_depth: default_max_propagation_depth(),
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }
}

/// How user code is launched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,
    /// Isolation wrapper placed in front of the interpreter (firejail, bwrap, nsjail...).
    #[serde(default)]
    pub launcher: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    #[serde(default = "default_true")]
    pub clear_env: bool,
    /// Run the code through the hardware bridge prelude.
    #[serde(default = "default_true")]
    pub bridge: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: default_interpreter_args(),
            launcher: Vec::new(),
            timeout_secs: default_timeout_secs(),
            max_code_bytes: default_max_code_bytes(),
            clear_env: true,
            bridge: true,
        }
    }
}

impl SandboxConfig {
    pub const MIN_TIMEOUT_SECS: u64 = 1;
    pub const MAX_TIMEOUT_SECS: u64 = 30;

    /// Wall-clock budget, clamped to 1..=30 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(Self::MIN_TIMEOUT_SECS, Self::MAX_TIMEOUT_SECS),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Directory for graph snapshots; unset disables persistence.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Chips wired to the emulated board when a session starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_spi_devices")]
    pub spi: Vec<SpiAttachment>,
    #[serde(default = "default_i2c_devices")]
    pub i2c: Vec<I2cAttachment>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            spi: default_spi_devices(),
            i2c: default_i2c_devices(),
            components: Vec::new(),
            connections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SpiAttachment {
    pub bus: u8,
    pub device: u8,
    #[serde(flatten)]
    pub chip: SpiChip,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpiChip {
    Mcp3008 {
        #[serde(default = "default_vref")]
        vref: f64,
    },
    Ws2812 {
        #[serde(default = "default_led_count")]
        leds: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct I2cAttachment {
    pub bus: u8,
    pub address: u8,
    pub kind: I2cChip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum I2cChip {
    Bmp280,
    Lcd,
    Registers,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid("sandbox.interpreter must not be empty".into()));
        }
        if self.sandbox.max_code_bytes == 0 {
            return Err(ConfigError::Invalid("sandbox.max_code_bytes must be > 0".into()));
        }
        for attachment in &self.board.i2c {
            if !crate::device::i2c::ADDRESS_RANGE.contains(&attachment.address) {
                return Err(ConfigError::Invalid(format!(
                    "I2C address 0x{:02X} is reserved",
                    attachment.address
                )));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_bind() -> String { "127.0.0.1:8765".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_tick_interval_ms() -> u64 { 100 }
fn default_event_history() -> usize { 1024 }
fn default_subscriber_buffer() -> usize { 256 }
fn default_max_propagation_depth() -> usize { 16 }
fn default_interpreter() -> String { "python3".to_string() }
fn default_interpreter_args() -> Vec<String> { vec!["-u".to_string()] }
fn default_timeout_secs() -> u64 { 10 }
fn default_max_code_bytes() -> usize { 64 * 1024 }
fn default_true() -> bool { true }
fn default_vref() -> f64 { 3.3 }
fn default_led_count() -> usize { 8 }

fn default_spi_devices() -> Vec<SpiAttachment> {
    vec![SpiAttachment { bus: 0, device: 0, chip: SpiChip::Mcp3008 { vref: default_vref() } }]
}

fn default_i2c_devices() -> Vec<I2cAttachment> {
    vec![
        I2cAttachment { bus: 1, address: 0x76, kind: I2cChip::Bmp280 },
        I2cAttachment { bus: 1, address: 0x27, kind: I2cChip::Lcd },
    ]
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
