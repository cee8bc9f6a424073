use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// Path to the `.env` file to load before reading the environment.
    #[arg(long, default_value = ".env")]
    env: String,
}

#[derive(Deserialize, Debug, Clone)]
pub enum LogLevel {
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "warn")]
    Warn,
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "debug")]
    Debug,
    #[serde(alias = "trace")]
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

fn default_database_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_database_port() -> u16 {
    3306
}

fn default_database_user() -> String {
    "root".to_string()
}

fn default_database_password() -> String {
    String::new()
}

fn default_database_name() -> String {
    "auth".to_string()
}

fn default_server_ip() -> Ipv4Addr {
    Ipv4Addr::new(127, 0, 0, 1)
}

fn default_auth_client_port() -> u16 {
    9339
}

fn default_internal_port() -> u16 {
    9340
}

/// Process configuration, read from the environment (populated from a
/// `.env` file plus whatever the surrounding shell already exports).
///
/// Every field has a default so an empty environment still produces a
/// usable (if probably wrong for production) configuration.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_database_ip")]
    pub database_ip: String,
    #[serde(default = "default_database_port")]
    pub database_port: u16,
    #[serde(default = "default_database_user")]
    pub database_user: String,
    #[serde(default = "default_database_password")]
    pub database_password: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default = "default_server_ip")]
    pub server_ip: Ipv4Addr,
    #[serde(default = "default_auth_client_port")]
    pub auth_client_port: u16,
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Config {
    /// Loads `.env` (or whatever path `--env` names; a missing file is not
    /// an error, the process environment may already carry everything) and
    /// deserializes [`Config`] from the resulting environment.
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();

        match dotenvy::from_path(&cli.env) {
            Ok(()) => {}
            Err(dotenvy::Error::Io(_)) => {}
            Err(error) => return Err(error).context("failed to parse .env file"),
        }

        Ok(envy::from_env::<Self>()?)
    }

    pub fn database_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.database_user,
            self.database_password,
            self.database_ip,
            self.database_port,
            self.database_name,
        )
    }
}
