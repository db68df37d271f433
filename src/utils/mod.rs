use std::net::IpAddr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use ipnetwork::IpNetwork;

pub const EMPTY_VALUE: &str = "---";

// Determine if a given IPNetwork is for a single host
// If so, return the IpAddr
pub fn get_host_address(network: &IpNetwork) -> Option<IpAddr> {
    let is_host = match network {
        IpNetwork::V4(_) => network.prefix() == 32,
        IpNetwork::V6(_) => network.prefix() == 128,
    };
    if is_host {
        Some(network.ip())
    } else {
        None
    }
}

/// Parse a CIDR prefix, masking off any host bits
/// E.g. "10.1.0.1/24" -> 10.1.0.0/24
pub fn parse_prefix(prefix: &str) -> Result<IpNetwork, ipnetwork::IpNetworkError> {
    let network = prefix.trim().parse::<IpNetwork>()?;
    IpNetwork::new(network.network(), network.prefix())
}

fn fit_with_remainder(dividend: u64, divisor: u64) -> (u64, u64) {
    let fit = dividend / divisor;
    let remainder = dividend % divisor;
    (fit, remainder)
}

pub fn get_elapsed_time<Tz>(time: DateTime<Tz>) -> Duration
where
    Tz: TimeZone,
{
    Utc::now().signed_duration_since(time)
}

/// Given a duration, format like "00:00:00"
pub fn format_elapsed_time(elapsed: Duration) -> String {
    let elapsed = elapsed.num_seconds().unsigned_abs();
    let (hours, remainder) = fit_with_remainder(elapsed, 3600);
    let (minutes, seconds) = fit_with_remainder(remainder, 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Given a timestamp, get the elapsed time and return formatted string
pub fn format_time_as_elapsed<Tz>(time: DateTime<Tz>) -> String
where
    Tz: TimeZone,
{
    format_elapsed_time(get_elapsed_time(time))
}

pub fn maybe_string<T>(item: Option<&T>) -> String
where
    T: ToString,
{
    item.map(std::string::ToString::to_string)
        .unwrap_or_else(|| String::from(EMPTY_VALUE))
}
