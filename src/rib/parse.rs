use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use log::{debug, error, trace};
use serde::Deserialize;

use super::attributes::{BgpAttribute, RawAttribute};
use super::RouteEntry;
use crate::utils::{get_host_address, parse_prefix};

#[derive(Debug)]
pub struct ParseError {
    pub reason: String,
}

impl ParseError {
    pub fn new(reason: String) -> Self {
        ParseError { reason }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError: {}", self.reason)
    }
}

impl Error for ParseError {}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        ParseError::new(error.to_string())
    }
}

/// One path candidate for a prefix in a RIB dump
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PathRecord {
    #[serde(default)]
    pub attrs: Vec<RawAttribute>,
}

/// Prefix-scoped RIB dump entry
#[derive(Clone, Debug, Deserialize)]
pub struct RibRecord {
    pub prefix: String,
    #[serde(default)]
    pub paths: Vec<PathRecord>,
}

/// Speakers emit the dump either as a list of records or keyed by prefix
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RibDump {
    List(Vec<RibRecord>),
    Table(BTreeMap<String, Vec<PathRecord>>),
}

impl From<RibDump> for Vec<RibRecord> {
    fn from(dump: RibDump) -> Self {
        match dump {
            RibDump::List(records) => records,
            RibDump::Table(table) => table
                .into_iter()
                .map(|(prefix, paths)| RibRecord { prefix, paths })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Nlri {
    #[serde(default)]
    pub prefix: String,
}

/// One record of a monitor feed line
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MonitorRecord {
    #[serde(default)]
    pub nlri: Nlri,
    #[serde(default)]
    pub attrs: Vec<RawAttribute>,
    #[serde(default, rename = "isWithdraw")]
    pub is_withdraw: bool,
}

/// Accumulates decoded attributes for one prefix
#[derive(Debug, Default)]
struct EntryBuilder {
    prefix: Option<IpNetwork>,
    next_hop: Option<IpAddr>,
    originator_id: Option<IpAddr>,
    is_withdrawn: bool,
}

impl EntryBuilder {
    fn apply_attributes(&mut self, attrs: &[RawAttribute]) {
        for raw in attrs {
            match BgpAttribute::decode(raw) {
                BgpAttribute::NextHop(next_hop) => self.next_hop = next_hop,
                BgpAttribute::OriginatorId(id) => self.originator_id = id,
                attribute => debug!("Ignoring attribute {}", attribute),
            }
        }
    }

    fn build(self, local_address: Option<IpAddr>) -> Option<RouteEntry> {
        let prefix = self.prefix?;
        Some(RouteEntry {
            prefix,
            next_hop: self.next_hop,
            originator_id: self.originator_id,
            is_local: self.next_hop.is_some() && self.next_hop == local_address,
            is_withdrawn: self.is_withdrawn,
            is_host_route: get_host_address(&prefix).is_some(),
        })
    }
}

/// Parse a single RIB dump record
/// The last path candidate wins, best-path selection is up to the speaker
pub fn parse_rib_record(
    record: &RibRecord,
    local_address: Option<IpAddr>,
) -> Result<RouteEntry, ParseError> {
    let prefix = parse_prefix(&record.prefix)
        .map_err(|err| ParseError::new(format!("{} '{}'", err, record.prefix)))?;
    let mut entry = None;
    for path in &record.paths {
        let mut builder = EntryBuilder {
            prefix: Some(prefix),
            ..Default::default()
        };
        builder.apply_attributes(&path.attrs);
        entry = builder.build(local_address);
    }
    let entry = entry.unwrap_or_else(|| RouteEntry::new(prefix));
    trace!("Parsed RIB record {}", entry);
    Ok(entry)
}

/// Parse a full RIB dump, skipping records with an unusable prefix
pub fn parse_rib(json: &str, local_address: Option<IpAddr>) -> Result<Vec<RouteEntry>, ParseError> {
    if json.trim().is_empty() {
        return Ok(vec![]);
    }
    let dump: RibDump = serde_json::from_str(json)?;
    let records: Vec<RibRecord> = dump.into();
    let entries: Vec<RouteEntry> = records
        .iter()
        .filter_map(|record| match parse_rib_record(record, local_address) {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!("Skipping RIB record: {}", err);
                None
            }
        })
        .collect();
    debug!(
        "Parsed {} of {} RIB records",
        entries.len(),
        records.len()
    );
    Ok(entries)
}

/// Decode one line of the monitor feed
pub fn parse_monitor_line(line: &str) -> Result<Vec<MonitorRecord>, ParseError> {
    Ok(serde_json::from_str(line)?)
}

/// Fold one monitor message into a single entry
/// Attributes accumulate across records, the last usable prefix wins
pub fn parse_update(
    records: &[MonitorRecord],
    local_address: Option<IpAddr>,
) -> Result<RouteEntry, ParseError> {
    let mut builder = EntryBuilder::default();
    for record in records {
        trace!("BGP update for prefix: [ {} ]", record.nlri.prefix);
        if !record.nlri.prefix.is_empty() {
            match parse_prefix(&record.nlri.prefix) {
                Ok(prefix) => builder.prefix = Some(prefix),
                Err(err) => error!("Skipping update prefix '{}': {}", record.nlri.prefix, err),
            }
        }
        builder.is_withdrawn |= record.is_withdraw;
        builder.apply_attributes(&record.attrs);
    }
    builder
        .build(local_address)
        .ok_or_else(|| ParseError::new("Update has no usable prefix".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn local() -> Option<IpAddr> {
        Some(IpAddr::from(Ipv4Addr::new(192, 0, 2, 1)))
    }

    #[test]
    fn test_parse_rib_list() {
        let json = r#"[
            {"prefix": "10.1.0.0/24", "paths": [{"attrs": [
                {"type": 1, "value": 0},
                {"type": 3, "nexthop": "192.0.2.5"},
                {"type": 9, "value": "10.0.0.9"}
            ]}]},
            {"prefix": "10.2.0.0/24", "paths": [{"attrs": [{"type": 3, "nexthop": "192.0.2.1"}]}]}
        ]"#;
        let entries = parse_rib(json, local()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].prefix, "10.1.0.0/24".parse::<IpNetwork>().unwrap());
        assert_eq!(entries[0].next_hop, Some(IpAddr::from(Ipv4Addr::new(192, 0, 2, 5))));
        assert_eq!(entries[0].originator_id, Some(IpAddr::from(Ipv4Addr::new(10, 0, 0, 9))));
        assert!(!entries[0].is_local);
        assert!(entries[1].is_local);
    }

    #[test]
    fn test_parse_rib_table() {
        let json = r#"{"10.3.0.1/32": [{"nlri": {"prefix": "10.3.0.1/32"}, "attrs": [{"type": 3, "nexthop": "192.0.2.7"}]}]}"#;
        let entries = parse_rib(json, local()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_host_route);
        assert_eq!(entries[0].next_hop, Some(IpAddr::from(Ipv4Addr::new(192, 0, 2, 7))));
    }

    #[test]
    fn test_parse_rib_skips_bad_prefix() {
        let json = r#"[
            {"prefix": "10.1.0.0/99", "paths": [{"attrs": [{"type": 3, "nexthop": "192.0.2.5"}]}]},
            {"prefix": "10.2.0.0/16", "paths": [{"attrs": [{"type": 3, "nexthop": "192.0.2.6"}]}]}
        ]"#;
        let entries = parse_rib(json, local()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prefix, "10.2.0.0/16".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn test_parse_rib_last_path_wins() {
        let json = r#"[{"prefix": "10.1.0.0/24", "paths": [
            {"attrs": [{"type": 3, "nexthop": "192.0.2.5"}]},
            {"attrs": [{"type": 3, "nexthop": "192.0.2.6"}]}
        ]}]"#;
        let entries = parse_rib(json, None).unwrap();
        assert_eq!(entries[0].next_hop, Some(IpAddr::from(Ipv4Addr::new(192, 0, 2, 6))));
    }

    #[test]
    fn test_parse_rib_malformed_next_hop() {
        let json = r#"[{"prefix": "10.1.0.0/24", "paths": [{"attrs": [
            {"type": 3, "nexthop": "not-an-ip"},
            {"type": 99, "value": "whatever"}
        ]}]}]"#;
        let entries = parse_rib(json, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].next_hop, None);
    }

    #[test]
    fn test_parse_rib_empty() {
        assert!(parse_rib("", None).unwrap().is_empty());
        assert!(parse_rib("[]", None).unwrap().is_empty());
        assert!(parse_rib("{not json", None).is_err());
    }

    #[test]
    fn test_parse_update() {
        let line = r#"[{"nlri": {"prefix": "10.1.0.0/24"}, "attrs": [{"type": 3, "nexthop": "192.0.2.5"}], "isWithdraw": false}]"#;
        let records = parse_monitor_line(line).unwrap();
        let entry = parse_update(&records, local()).unwrap();
        assert_eq!(entry.prefix, "10.1.0.0/24".parse::<IpNetwork>().unwrap());
        assert!(!entry.is_withdrawn);
        assert!(!entry.is_local);
    }

    #[test]
    fn test_parse_update_withdraw() {
        let line = r#"[{"nlri": {"prefix": "10.1.0.0/24"}, "attrs": [], "isWithdraw": true}]"#;
        let records = parse_monitor_line(line).unwrap();
        let entry = parse_update(&records, local()).unwrap();
        assert!(entry.is_withdrawn);
        assert_eq!(entry.next_hop, None);
    }

    #[test]
    fn test_parse_update_without_prefix() {
        let line = r#"[{"nlri": {"prefix": "bogus"}, "attrs": [{"type": 3, "nexthop": "192.0.2.5"}]}]"#;
        let records = parse_monitor_line(line).unwrap();
        assert!(parse_update(&records, local()).is_err());
    }

    #[test]
    fn test_parse_monitor_line_invalid() {
        assert!(parse_monitor_line("{\"nlri\": ").is_err());
    }
}
