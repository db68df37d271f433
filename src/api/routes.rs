use ipnetwork::IpNetwork;

use crate::api::rpc::{HistoryView, RouteView};
use crate::rib::{LearnedRoute, RouteEntry};
use crate::utils::format_time_as_elapsed;

pub fn entry_to_route(entry: &RouteEntry) -> RouteView {
    let family = if entry.prefix.is_ipv4() { "IPv4" } else { "IPv6" };
    RouteView {
        family: family.to_string(),
        prefix: entry.prefix.to_string(),
        next_hop: entry.next_hop,
        originator_id: entry.originator_id,
        is_local: entry.is_local,
        is_withdrawn: entry.is_withdrawn,
        is_host_route: entry.is_host_route,
        installed: entry.is_installed(),
    }
}

pub fn learned_to_history(learned: &LearnedRoute) -> HistoryView {
    HistoryView {
        learned_at: learned.learned_at.timestamp(),
        age: format_time_as_elapsed(learned.learned_at),
        prefix: learned.entry.prefix.to_string(),
        next_hop: learned.entry.next_hop,
        originator_id: learned.entry.originator_id,
    }
}

/// Does `entry` fall within `filter` (either an address or a covering prefix)
pub fn matches_prefix(entry: &RouteEntry, filter: &IpNetwork) -> bool {
    if entry.prefix.is_ipv4() != filter.is_ipv4() {
        return false;
    }
    if filter.prefix() <= entry.prefix.prefix() {
        filter.contains(entry.prefix.network())
    } else {
        // More specific filter, match the route covering it
        entry.prefix.contains(filter.network())
    }
}
