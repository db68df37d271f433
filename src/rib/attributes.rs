use std::fmt;
use std::net::IpAddr;

use log::{debug, trace, warn};
use serde::Deserialize;
use serde_json::Value;

// Well-known path attribute type codes
pub const ORIGIN: u32 = 1;
pub const AS_PATH: u32 = 2;
pub const NEXT_HOP: u32 = 3;
pub const MULTI_EXIT_DISC: u32 = 4;
pub const LOCAL_PREF: u32 = 5;
pub const ORIGINATOR_ID: u32 = 9;
pub const CLUSTER_LIST: u32 = 10;
pub const MP_REACH_NLRI: u32 = 14;
pub const MP_UNREACH_NLRI: u32 = 15;
pub const EXTENDED_COMMUNITIES: u32 = 16;

/// Path attribute as emitted by the speaker's JSON output
/// Only `type` is required, the payload lives in different keys depending on the attribute
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawAttribute {
    #[serde(rename = "type")]
    pub code: u32,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub nexthop: Option<String>,
    #[serde(default)]
    pub as_paths: Option<Value>,
    #[serde(default)]
    pub metric: Option<Value>,
    #[serde(default)]
    pub cluster_list: Option<Vec<String>>,
}

impl RawAttribute {
    /// Text payload, preferring a dedicated key over the generic `value`
    fn text(&self, key: Option<&String>) -> Option<String> {
        key.cloned()
            .or_else(|| self.value.as_str().map(String::from))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Semantic view of a single path attribute
#[derive(Clone, Debug, PartialEq)]
pub enum BgpAttribute {
    Origin(Option<u64>),
    AsPath(Value),
    /// `None` when the next hop was missing or could not be parsed
    NextHop(Option<IpAddr>),
    MultiExitDisc(Option<u64>),
    LocalPref(Option<u64>),
    OriginatorId(Option<IpAddr>),
    ClusterList(Vec<String>),
    MpReachNlri(Option<String>),
    MpUnreachNlri,
    ExtendedCommunities(Value),
    /// Attribute type we don't know about (type code)
    Unhandled(u32),
}

impl BgpAttribute {
    pub fn decode(raw: &RawAttribute) -> Self {
        use BgpAttribute::*;
        let attribute = match raw.code {
            ORIGIN => Origin(raw.value.as_u64()),
            AS_PATH => AsPath(raw.as_paths.clone().unwrap_or_else(|| raw.value.clone())),
            NEXT_HOP => NextHop(parse_address(raw.text(raw.nexthop.as_ref()), "next hop")),
            MULTI_EXIT_DISC => MultiExitDisc(
                raw.metric
                    .as_ref()
                    .and_then(Value::as_u64)
                    .or_else(|| raw.value.as_u64()),
            ),
            LOCAL_PREF => LocalPref(raw.value.as_u64()),
            ORIGINATOR_ID => OriginatorId(parse_address(raw.text(None), "originator id")),
            CLUSTER_LIST => ClusterList(raw.cluster_list.clone().unwrap_or_else(|| {
                raw.value
                    .as_array()
                    .map(|ids| {
                        ids.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default()
            })),
            MP_REACH_NLRI => MpReachNlri(raw.nexthop.clone()),
            MP_UNREACH_NLRI => MpUnreachNlri,
            EXTENDED_COMMUNITIES => ExtendedCommunities(raw.value.clone()),
            code => {
                warn!("Unknown BGP attribute code [ {} ]", code);
                Unhandled(code)
            }
        };
        trace!("Decoded attribute {}", attribute);
        attribute
    }

    pub fn code(&self) -> u32 {
        use BgpAttribute::*;
        match self {
            Origin(_) => ORIGIN,
            AsPath(_) => AS_PATH,
            NextHop(_) => NEXT_HOP,
            MultiExitDisc(_) => MULTI_EXIT_DISC,
            LocalPref(_) => LOCAL_PREF,
            OriginatorId(_) => ORIGINATOR_ID,
            ClusterList(_) => CLUSTER_LIST,
            MpReachNlri(_) => MP_REACH_NLRI,
            MpUnreachNlri => MP_UNREACH_NLRI,
            ExtendedCommunities(_) => EXTENDED_COMMUNITIES,
            Unhandled(code) => *code,
        }
    }
}

impl fmt::Display for BgpAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BgpAttribute::*;
        let code = self.code();
        match self {
            Origin(origin) => write!(f, "[{}] Origin: {:?}", code, origin),
            AsPath(path) => write!(f, "[{}] AS Path: {}", code, path),
            NextHop(next_hop) => write!(f, "[{}] Next Hop: {:?}", code, next_hop),
            MultiExitDisc(med) => write!(f, "[{}] MED: {:?}", code, med),
            LocalPref(pref) => write!(f, "[{}] Local Pref: {:?}", code, pref),
            OriginatorId(id) => write!(f, "[{}] Originator ID: {:?}", code, id),
            ClusterList(ids) => write!(f, "[{}] Cluster List: {}", code, ids.join(" ")),
            MpReachNlri(next_hop) => write!(f, "[{}] MP Reachable: {:?}", code, next_hop),
            MpUnreachNlri => write!(f, "[{}] MP Unreachable", code),
            ExtendedCommunities(comms) => write!(f, "[{}] Extended Communities: {}", code, comms),
            Unhandled(_) => write!(f, "[{}] Unhandled", code),
        }
    }
}

fn parse_address(text: Option<String>, kind: &str) -> Option<IpAddr> {
    let text = text?;
    match text.parse::<IpAddr>() {
        Ok(addr) => Some(addr),
        Err(err) => {
            debug!("Ignoring malformed {} '{}': {}", kind, text, err);
            None
        }
    }
}
