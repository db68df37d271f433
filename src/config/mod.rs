mod file;

pub use file::MalformedUpdatePolicy;

use std::error::Error;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Could not read config: {}", err),
            ConfigError::Toml(err) => write!(f, "Could not parse config: {}", err),
            ConfigError::Invalid(reason) => write!(f, "Invalid config: {}", reason),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Toml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(error: io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::Toml(error)
    }
}

/// Parse a TOML config file and return a SyncConfig
pub fn from_file(path: &str) -> Result<SyncConfig, ConfigError> {
    let spec = file::SyncConfigSpec::from_file(path)?;
    SyncConfig::from_spec(spec)
}

#[derive(Clone, Debug)]
pub struct SpeakerConfig {
    pub command: String,
    pub args: Vec<String>,
}

/// Runtime configuration of the synchronizer
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub interface: Option<String>,
    pub local_address: Option<IpAddr>,
    pub route_protocol: u8,
    pub history_size: usize,
    pub malformed_update: MalformedUpdatePolicy,
    pub advertise: Vec<IpNetwork>,
    pub api: Option<SocketAddr>,
    pub speaker: SpeakerConfig,
    // Keep kernel changes in memory only
    pub dry_run: bool,
}

impl SyncConfig {
    fn from_spec(spec: file::SyncConfigSpec) -> Result<Self, ConfigError> {
        // 0-4 are reserved by the kernel (unspec, redirect, kernel, boot, static)
        if spec.route_protocol <= 4 {
            return Err(ConfigError::Invalid(format!(
                "route_protocol {} is reserved by the kernel",
                spec.route_protocol
            )));
        }
        if let Some(interface) = &spec.interface {
            if interface.trim().is_empty() {
                return Err(ConfigError::Invalid("interface is empty".to_string()));
            }
        }
        let advertise = spec
            .advertise
            .iter()
            .map(|prefix| IpNetwork::new(prefix.network(), prefix.prefix()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(Self {
            interface: spec.interface,
            local_address: spec.local_address,
            route_protocol: spec.route_protocol,
            history_size: spec.history_size,
            malformed_update: spec.malformed_update,
            advertise,
            api: spec.api,
            speaker: SpeakerConfig {
                command: spec.speaker.command,
                args: spec.speaker.args,
            },
            dry_run: false,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::from_spec(file::SyncConfigSpec::from_toml(contents)?)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let spec = file::SyncConfigSpec::default();
        Self {
            interface: None,
            local_address: None,
            route_protocol: spec.route_protocol,
            history_size: spec.history_size,
            malformed_update: spec.malformed_update,
            advertise: vec![],
            api: None,
            speaker: SpeakerConfig {
                command: spec.speaker.command,
                args: spec.speaker.args,
            },
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file() {
        let config = from_file("./demos/config.toml").unwrap();
        assert_eq!(config.interface.as_deref(), Some("eth0"));
        assert_eq!(config.history_size, 128);
        assert_eq!(config.advertise[0].to_string(), "198.51.100.0/24");
        assert!(!config.dry_run);
    }

    #[test]
    fn test_advertise_is_normalized() {
        let config = SyncConfig::from_toml(r#"advertise = ["10.1.2.3/16"]"#).unwrap();
        assert_eq!(config.advertise[0].to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_reserved_protocol() {
        let result = SyncConfig::from_toml("route_protocol = 4");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(from_file("./demos/missing.toml"), Err(ConfigError::Io(_))));
    }
}
