//! Server configuration.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML configuration
//! file, command-line flags.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4242
//! key_file = "server.key"
//! rotation_secs = 30
//! log_filter = "info"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line interface for the server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, short = 'c', default_value = "curved.toml")]
    pub config: String,

    /// Host address to bind to (overrides config file)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Long-term secret key file (overrides config file)
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "curved=trace" (overrides config file)
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Print the default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to.
    pub host: String,
    pub port: u16,

    /// Hex-encoded long-term secret key. Generated on first run; the
    /// matching public key lands next to it with a `.pub` extension.
    pub key_file: PathBuf,

    /// Minute-key rotation period in seconds.
    pub rotation_secs: u64,

    /// Default tracing filter; `RUST_LOG` overrides it.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4242,
            key_file: PathBuf::from("server.key"),
            rotation_secs: 30,
            log_filter: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn rotation(&self) -> Duration {
        Duration::from_secs(self.rotation_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.port == 0 {
            errors.push("port must be nonzero".to_string());
        }
        if self.rotation_secs == 0 {
            errors.push("rotation_secs must be nonzero".to_string());
        }
        if self.bind_addr().is_err() {
            errors.push(format!("host {} does not parse", self.host));
        }
        if self.key_file.as_os_str().is_empty() {
            errors.push("key_file must be set".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load and validate the server configuration.
pub fn load() -> Result<ServerConfig> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        let toml = toml::to_string_pretty(&ServerConfig::default())
            .context("serializing default config")?;
        println!("{toml}");
        std::process::exit(0);
    }

    let mut config = load_file(Path::new(&cli.config))?;
    apply_cli_overrides(&mut config, &cli);

    config.validate().map_err(|errors| {
        anyhow::anyhow!("configuration validation failed:\n{}", errors.join("\n"))
    })?;
    Ok(config)
}

/// A missing file is not an error: defaults apply.
fn load_file(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        return Ok(ServerConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

fn apply_cli_overrides(config: &mut ServerConfig, cli: &CliArgs) {
    if let Some(ref host) = cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref key_file) = cli.key_file {
        config.key_file = key_file.clone();
    }
    if let Some(ref filter) = cli.log_filter {
        config.log_filter = filter.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let config: ServerConfig = toml::from_str("port = 9000\nhost = \"127.0.0.1\"").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        // Unspecified fields keep their defaults.
        assert_eq!(config.rotation_secs, 30);
        assert_eq!(config.key_file, PathBuf::from("server.key"));
    }

    #[test]
    fn rejects_zero_rotation() {
        let config = ServerConfig {
            rotation_secs: 0,
            ..ServerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("rotation_secs")));
    }

    #[test]
    fn rejects_unparseable_host() {
        let config = ServerConfig {
            host: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 4242,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.bind_addr().unwrap(),
            "127.0.0.1:4242".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_file(Path::new("/nonexistent/curved.toml")).unwrap();
        assert_eq!(config.port, ServerConfig::default().port);
    }
}
