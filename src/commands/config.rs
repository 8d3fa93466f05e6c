//! `taskroot config show|get|set`.

use super::{Output, json};
use crate::config::{
    self, AppConfig, ConfigOverrides, OutputFormat, ResolvedConfig, ValueSource, resolve_config,
};
use crate::connection::PortRange;
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Keys accepted by `config get` / `config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "output-format",
    "port-range",
    "command-timeout",
    "ssh-port",
    "db-port",
];

fn unknown_key(key: &str) -> Error {
    Error::InvalidInput(format!(
        "Unknown config key '{}'. Valid keys: {}",
        key,
        CONFIG_KEYS.join(", ")
    ))
}

fn load(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file = config::read_config(data_dir)?;
    Ok(resolve_config(&file, overrides))
}

#[derive(Serialize)]
pub struct ConfigShow {
    pub path: String,
    pub data_dir: String,
    pub config: ResolvedConfig,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        [
            format!("Config: {}", self.path),
            format!("Data dir: {}", self.data_dir),
            format!(
                "  output-format   = {} ({})",
                c.output_format.value, c.output_format.source
            ),
            format!(
                "  port-range      = {} ({})",
                c.port_range.value, c.port_range.source
            ),
            format!(
                "  command-timeout = {}s ({})",
                c.command_timeout.value, c.command_timeout.source
            ),
            format!("  ssh-port        = {} ({})", c.ssh_port.value, c.ssh_port.source),
            format!("  db-port         = {} ({})", c.db_port.value, c.db_port.source),
        ]
        .join("\n")
    }
}

pub fn config_show(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ConfigShow> {
    Ok(ConfigShow {
        path: config::config_path(data_dir).display().to_string(),
        data_dir: data_dir.display().to_string(),
        config: load(data_dir, overrides)?,
    })
}

#[derive(Serialize)]
pub struct ConfigGet {
    pub key: String,
    pub value: String,
    pub source: ValueSource,
}

impl Output for ConfigGet {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("{} = {} ({})", self.key, self.value, self.source)
    }
}

pub fn config_get(data_dir: &Path, overrides: &ConfigOverrides, key: &str) -> Result<ConfigGet> {
    let c = load(data_dir, overrides)?;
    let (value, source) = match key {
        "output-format" => (c.output_format.value.to_string(), c.output_format.source),
        "port-range" => (c.port_range.value.to_string(), c.port_range.source),
        "command-timeout" => (c.command_timeout.value.to_string(), c.command_timeout.source),
        "ssh-port" => (c.ssh_port.value.to_string(), c.ssh_port.source),
        "db-port" => (c.db_port.value.to_string(), c.db_port.source),
        _ => return Err(unknown_key(key)),
    };
    Ok(ConfigGet {
        key: key.to_string(),
        value,
        source,
    })
}

#[derive(Serialize)]
pub struct ConfigSet {
    pub key: String,
    pub value: String,
    pub path: String,
}

impl Output for ConfigSet {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path)
    }
}

/// Parse a port range written as `54321-54400` or `54321 54400`.
pub fn parse_port_range(value: &str) -> Result<PortRange> {
    let parts: Vec<&str> = value
        .split(['-', ' ', ','])
        .filter(|p| !p.is_empty())
        .collect();
    let bad = || Error::InvalidInput(format!("Invalid port range '{}', expected START-END", value));
    let [start, end] = parts[..] else {
        return Err(bad());
    };
    let start: u16 = start.parse().map_err(|_| bad())?;
    let end: u16 = end.parse().map_err(|_| bad())?;
    Ok(PortRange::new(start, end))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid value for {}: '{}'", key, value)))
}

fn parse_setting(key: &str, value: &str) -> Result<AppConfig> {
    let mut update = AppConfig::new();
    match key {
        "output-format" => {
            update.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Invalid output-format '{}', expected json or human",
                    value
                ))
            })?);
        }
        "port-range" => update.port_range = Some(parse_port_range(value)?),
        "command-timeout" => update.command_timeout = Some(parse_number(key, value)?),
        "ssh-port" => update.ssh_port = Some(parse_number(key, value)?),
        "db-port" => update.db_port = Some(parse_number(key, value)?),
        _ => return Err(unknown_key(key)),
    }
    update.validate().map_err(Error::InvalidInput)?;
    Ok(update)
}

pub fn config_set(data_dir: &Path, key: &str, value: &str) -> Result<ConfigSet> {
    let update = parse_setting(key, value)?;
    let mut file = config::read_config(data_dir)?;
    file.merge(&update);
    config::write_config(data_dir, &file)?;
    Ok(ConfigSet {
        key: key.to_string(),
        value: value.to_string(),
        path: config::config_path(data_dir).display().to_string(),
    })
}
