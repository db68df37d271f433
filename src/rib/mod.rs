pub mod attributes;
mod history;
mod parse;

pub use attributes::{BgpAttribute, RawAttribute};
pub use history::{History, LearnedRoute};
pub use parse::{
    parse_monitor_line, parse_rib, parse_rib_record, parse_update, MonitorRecord, Nlri,
    ParseError, PathRecord, RibRecord,
};

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use log::{debug, trace};

use crate::utils::get_host_address;

/// Learned routing state for a single prefix
#[derive(Clone, Debug, PartialEq)]
pub struct RouteEntry {
    pub prefix: IpNetwork,
    pub next_hop: Option<IpAddr>,
    pub originator_id: Option<IpAddr>,
    // Next hop is this host, never installed in the kernel
    pub is_local: bool,
    pub is_withdrawn: bool,
    pub is_host_route: bool,
}

impl RouteEntry {
    pub fn new(prefix: IpNetwork) -> Self {
        Self {
            prefix,
            next_hop: None,
            originator_id: None,
            is_local: false,
            is_withdrawn: false,
            is_host_route: get_host_address(&prefix).is_some(),
        }
    }

    /// Is this entry currently expected to be present in the kernel
    pub fn is_installed(&self) -> bool {
        !self.is_local && !self.is_withdrawn && self.next_hop.is_some()
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let addr_or_none = |addr: Option<IpAddr>| {
            addr.map(|a| a.to_string())
                .unwrap_or_else(|| "<none>".to_string())
        };
        write!(
            f,
            "Prefix:[ {} ], OriginatingIP:[ {} ], Nexthop:[ {} ], IsWithdrawn:[ {} ], IsHostRoute:[ {} ]",
            self.prefix,
            addr_or_none(self.originator_id),
            addr_or_none(self.next_hop),
            self.is_withdrawn,
            self.is_host_route,
        )
    }
}

#[derive(Debug)]
pub enum RibError {
    /// Speaker returned a RIB without any routes
    EmptyRib,
    /// RIB or update could not be decoded
    Parse(ParseError),
}

impl fmt::Display for RibError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RibError::EmptyRib => write!(f, "Route list was empty"),
            RibError::Parse(err) => write!(f, "{}", err),
        }
    }
}

impl Error for RibError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RibError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for RibError {
    fn from(error: ParseError) -> Self {
        RibError::Parse(error)
    }
}

/// Result of folding one update into the cache
#[derive(Debug)]
pub struct Applied {
    pub current: RouteEntry,
    pub previous: Option<RouteEntry>,
}

impl Applied {
    /// Kernel route left behind by the previous entry that `current` no longer covers
    pub fn stale_route(&self) -> Option<&RouteEntry> {
        let previous = self.previous.as_ref().filter(|p| p.is_installed())?;
        if self.current.is_installed() && self.current.next_hop == previous.next_hop {
            return None;
        }
        if self.current.is_withdrawn && !self.current.is_local {
            // The withdrawal itself removes this route
            if self.current.next_hop == previous.next_hop {
                return None;
            }
        }
        Some(previous)
    }
}

/// Canonical prefix -> route view learned from the speaker
/// Owned by the monitor loop, everyone else gets a `RibSnapshot`
#[derive(Debug)]
pub struct RibCache {
    local_address: Option<IpAddr>,
    routes: HashMap<IpNetwork, RouteEntry>,
}

impl RibCache {
    pub fn new(local_address: Option<IpAddr>) -> Self {
        Self {
            local_address,
            routes: HashMap::with_capacity(64),
        }
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn get(&self, prefix: &IpNetwork) -> Option<&RouteEntry> {
        self.routes.get(prefix)
    }

    /// All entries, sorted by prefix
    pub fn routes(&self) -> Vec<RouteEntry> {
        let mut routes: Vec<RouteEntry> = self.routes.values().cloned().collect();
        routes.sort_by_key(|r| (r.prefix.is_ipv6(), r.prefix.ip(), r.prefix.prefix()));
        routes
    }

    /// Replace the cache contents with a full RIB dump
    /// Returns the entries that should be installed (non-local)
    pub fn ingest_snapshot(&mut self, records: Vec<RouteEntry>) -> Result<Vec<RouteEntry>, RibError> {
        if records.is_empty() {
            return Err(RibError::EmptyRib);
        }
        self.routes.clear();
        for entry in records {
            self.routes.insert(entry.prefix, entry);
        }
        let installable: Vec<RouteEntry> = self
            .routes()
            .into_iter()
            .filter(|entry| !entry.is_local)
            .collect();
        debug!(
            "Ingested {} prefixes from RIB snapshot ({} installable)",
            self.routes.len(),
            installable.len()
        );
        Ok(installable)
    }

    /// Fold one monitor message into the cache, last writer wins
    pub fn apply_update(&mut self, records: &[MonitorRecord]) -> Result<Applied, RibError> {
        let mut current = parse_update(records, self.local_address)?;
        let previous = self.routes.get(&current.prefix).cloned();
        if current.is_withdrawn && current.next_hop.is_none() {
            // Withdrawals rarely carry attributes, remove the route we know about
            if let Some(previous) = &previous {
                current.next_hop = previous.next_hop;
                current.is_local = previous.is_local;
                current.originator_id = current.originator_id.or(previous.originator_id);
            }
        }
        trace!("Cache update: {}", current);
        self.routes.insert(current.prefix, current.clone());
        Ok(Applied { current, previous })
    }

    /// Read-only copy for other components
    pub fn snapshot(&self, history: &History) -> RibSnapshot {
        RibSnapshot {
            updated_at: Utc::now(),
            routes: self.routes(),
            history: history.iter().cloned().collect(),
        }
    }
}

/// Immutable view of the cache published after every change
#[derive(Clone, Debug)]
pub struct RibSnapshot {
    pub updated_at: DateTime<Utc>,
    pub routes: Vec<RouteEntry>,
    pub history: Vec<LearnedRoute>,
}

impl Default for RibSnapshot {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            routes: vec![],
            history: vec![],
        }
    }
}

pub type SharedSnapshot = Arc<RibSnapshot>;
