//! KDL schema for config.kdl.
//!
//! This module provides:
//! - Rust structs representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation

use crate::connection::PortRange;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User preferences stored in config.kdl. No secrets live here.
///
/// # KDL Schema
///
/// ```kdl
/// output-format "human"
/// port-range 54321 54400
/// command-timeout 30
/// ssh-port 22
/// db-port 5432
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,

    /// Local ports scanned for the tunnel endpoint
    pub port_range: Option<PortRange>,

    /// Database connect/statement timeout in seconds
    pub command_timeout: Option<u64>,

    /// Default tunnel (SSH) port offered at the prompt
    pub ssh_port: Option<u16>,

    /// Default database port offered at the prompt
    pub db_port: Option<u16>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(range) = self.port_range {
            if range.start > range.end {
                return Err(format!(
                    "port-range start must not exceed end, got {}",
                    range
                ));
            }
            if range.start == 0 {
                return Err("port-range must not include port 0".to_string());
            }
        }
        if self.command_timeout == Some(0) {
            return Err("command-timeout must be at least 1 second".to_string());
        }
        if self.ssh_port == Some(0) {
            return Err("ssh-port must be 1-65535".to_string());
        }
        if self.db_port == Some(0) {
            return Err("db-port must be 1-65535".to_string());
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown or out-of-range values are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = first_string(doc, "output-format") {
            config.output_format = OutputFormat::parse(s);
        }

        if let Some(node) = doc.get("port-range") {
            let ports: Vec<u16> = node
                .entries()
                .iter()
                .filter(|e| e.name().is_none())
                .filter_map(|e| e.value().as_integer())
                .filter_map(|i| u16::try_from(i).ok())
                .collect();
            if let [start, end] = ports[..] {
                config.port_range = Some(PortRange::new(start, end));
            }
        }

        if let Some(i) = first_integer(doc, "command-timeout") {
            config.command_timeout = u64::try_from(i).ok();
        }
        if let Some(i) = first_integer(doc, "ssh-port") {
            config.ssh_port = u16::try_from(i).ok();
        }
        if let Some(i) = first_integer(doc, "db-port") {
            config.db_port = u16::try_from(i).ok();
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref format) = self.output_format {
            let mut node = KdlNode::new("output-format");
            node.push(KdlEntry::new(KdlValue::String(format.as_str().to_string())));
            doc.nodes_mut().push(node);
        }

        if let Some(range) = self.port_range {
            let mut node = KdlNode::new("port-range");
            node.push(KdlEntry::new(KdlValue::Integer(range.start as i128)));
            node.push(KdlEntry::new(KdlValue::Integer(range.end as i128)));
            doc.nodes_mut().push(node);
        }

        for (name, value) in [
            ("command-timeout", self.command_timeout.map(|v| v as i128)),
            ("ssh-port", self.ssh_port.map(|v| v as i128)),
            ("db-port", self.db_port.map(|v| v as i128)),
        ] {
            if let Some(value) = value {
                let mut node = KdlNode::new(name);
                node.push(KdlEntry::new(KdlValue::Integer(value)));
                doc.nodes_mut().push(node);
            }
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &AppConfig) {
        if other.output_format.is_some() {
            self.output_format = other.output_format.clone();
        }
        if other.port_range.is_some() {
            self.port_range = other.port_range;
        }
        if other.command_timeout.is_some() {
            self.command_timeout = other.command_timeout;
        }
        if other.ssh_port.is_some() {
            self.ssh_port = other.ssh_port;
        }
        if other.db_port.is_some() {
            self.db_port = other.db_port;
        }
    }
}

fn first_entry<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_string<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a str> {
    first_entry(doc, name).and_then(|v| v.as_string())
}

fn first_integer(doc: &KdlDocument, name: &str) -> Option<i128> {
    first_entry(doc, name).and_then(|v| v.as_integer())
}

/// Required permissions for config.kdl (Unix: 0644, readable by all).
#[cfg(unix)]
pub const CONFIG_FILE_MODE: u32 = 0o644;
