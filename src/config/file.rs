use std::fmt;
use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;
use serde::{self, Deserialize, Deserializer};
use toml;

use super::ConfigError;
use crate::speaker::GOBGP_CMD;

struct Defaults {}

impl Defaults {
    fn route_protocol() -> u8 {
        186
    }

    fn history_size() -> usize {
        64
    }

    fn speaker() -> SpeakerConfigSpec {
        SpeakerConfigSpec {
            command: Defaults::speaker_command(),
            args: vec![],
        }
    }

    fn speaker_command() -> String {
        GOBGP_CMD.to_string()
    }
}

/// What to do with an update line that is not valid JSON
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MalformedUpdatePolicy {
    /// Stop monitoring and exit with the decode error
    Abort,
    /// Log the line and keep reading
    Skip,
}

impl Default for MalformedUpdatePolicy {
    fn default() -> Self {
        MalformedUpdatePolicy::Abort
    }
}

impl fmt::Display for MalformedUpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MalformedUpdatePolicy::Abort => write!(f, "abort"),
            MalformedUpdatePolicy::Skip => write!(f, "skip"),
        }
    }
}

impl<'de> Deserialize<'de> for MalformedUpdatePolicy {
    fn deserialize<D>(deserializer: D) -> Result<MalformedUpdatePolicy, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "abort" => Ok(MalformedUpdatePolicy::Abort),
            "skip" => Ok(MalformedUpdatePolicy::Skip),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported malformed_update policy: '{}'",
                s
            ))),
        }
    }
}

/// Config (toml) representation of the BGP speaker
#[derive(Clone, Debug, Deserialize)]
pub(super) struct SpeakerConfigSpec {
    #[serde(default = "Defaults::speaker_command")]
    pub(super) command: String,
    // Global client flags, e.g. ["-p", "50051"]
    #[serde(default = "Vec::new")]
    pub(super) args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SyncConfigSpec {
    // Managed interface, routes egress through the next hop's best route when absent
    pub(super) interface: Option<String>,
    // Address of this host, defaults to the first address of `interface`
    pub(super) local_address: Option<IpAddr>,
    // Kernel route protocol tag for routes we own
    #[serde(default = "Defaults::route_protocol")]
    pub(super) route_protocol: u8,
    #[serde(default = "Defaults::history_size")]
    pub(super) history_size: usize,
    #[serde(default)]
    pub(super) malformed_update: MalformedUpdatePolicy,
    // Prefixes originated into the speaker at startup
    #[serde(default = "Vec::new")]
    pub(super) advertise: Vec<IpNetwork>,
    // Status API listening address
    pub(super) api: Option<SocketAddr>,
    #[serde(default = "Defaults::speaker")]
    pub(super) speaker: SpeakerConfigSpec,
}

impl SyncConfigSpec {
    pub(super) fn from_file(path: &str) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_toml(&contents)
    }

    pub(super) fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfigSpec = toml::from_str(contents)?;
        Ok(config)
    }
}

impl Default for SyncConfigSpec {
    fn default() -> Self {
        Self {
            interface: None,
            local_address: None,
            route_protocol: Defaults::route_protocol(),
            history_size: Defaults::history_size(),
            malformed_update: MalformedUpdatePolicy::default(),
            advertise: vec![],
            api: None,
            speaker: Defaults::speaker(),
        }
    }
}
