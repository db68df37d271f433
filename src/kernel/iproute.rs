use std::net::IpAddr;
use std::process::Stdio;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;

use super::{KernelRoute, Link, RouteTable, RouteTableError};
use crate::utils::parse_prefix;

pub const IP_CMD: &str = "/sbin/ip";

#[derive(Debug, Deserialize)]
struct AddrInfo {
    #[serde(default)]
    local: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    #[serde(default)]
    ifindex: Option<u32>,
    #[serde(default)]
    ifname: Option<String>,
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct RouteInfo {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dev: Option<String>,
}

/// Output of a finished `ip` invocation
struct Output {
    command: String,
    success: bool,
    stdout: String,
    stderr: String,
}

/// Kernel route table driven through iproute2
/// Every route added is tagged with `protocol`, so cleanup only touches our own routes
#[derive(Debug)]
pub struct IpRouteTable {
    ip_cmd: String,
    protocol: u8,
}

impl IpRouteTable {
    pub fn new(protocol: u8) -> Self {
        Self::with_command(IP_CMD, protocol)
    }

    pub fn with_command(ip_cmd: &str, protocol: u8) -> Self {
        Self {
            ip_cmd: ip_cmd.to_string(),
            protocol,
        }
    }

    async fn exec(&self, args: &[String]) -> Result<Output, RouteTableError> {
        let command = format!("{} {}", self.ip_cmd, args.join(" "));
        trace!("Executing '{}'", command);
        let output = Command::new(&self.ip_cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        let result = Output {
            command,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if !result.success {
            debug!("'{}' failed: {}", result.command, result.stderr);
        }
        Ok(result)
    }

    async fn query<T: DeserializeOwned>(&self, args: &[String]) -> Result<Vec<T>, RouteTableError> {
        let output = self.exec(args).await?;
        if !output.success {
            return Err(RouteTableError::Command(output.command, output.stderr));
        }
        if output.stdout.is_empty() {
            return Ok(vec![]);
        }
        serde_json::from_str(&output.stdout)
            .map_err(|err| RouteTableError::Command(output.command, err.to_string()))
    }

    fn route_args(&self, verb: &str, route: &KernelRoute) -> Vec<String> {
        let mut args = vec![
            "route".to_string(),
            verb.to_string(),
            route.destination.to_string(),
        ];
        if let Some(gateway) = route.gateway {
            args.push("via".to_string());
            args.push(gateway.to_string());
        }
        let protocol = self.protocol.to_string();
        args.extend(
            [
                "dev",
                route.link.as_str(),
                "proto",
                protocol.as_str(),
                "scope",
                "global",
            ]
            .iter()
            .map(|arg| arg.to_string()),
        );
        args
    }

    fn route_from_info(info: RouteInfo, family: Family, link: &str) -> Option<KernelRoute> {
        let destination = if info.dst == "default" {
            family.default_route()
        } else {
            parse_prefix(&info.dst).ok()?
        };
        let gateway = info.gateway.and_then(|gw| gw.parse::<IpAddr>().ok());
        let link = info.dev.unwrap_or_else(|| link.to_string());
        Some(KernelRoute {
            destination,
            gateway,
            link,
        })
    }

    /// Routes from `ip -j route` output, unparseable destinations are dropped
    fn parse_routes(json: &str, family: Family, link: &str) -> Result<Vec<KernelRoute>, serde_json::Error> {
        if json.is_empty() {
            return Ok(vec![]);
        }
        let infos: Vec<RouteInfo> = serde_json::from_str(json)?;
        Ok(infos
            .into_iter()
            .filter_map(|info| Self::route_from_info(info, family, link))
            .collect())
    }
}

#[derive(Clone, Copy, Debug)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Family::V4 => "-4",
            Family::V6 => "-6",
        }
    }

    fn default_route(self) -> IpNetwork {
        let addr: IpAddr = match self {
            Family::V4 => IpAddr::from([0u8; 4]),
            Family::V6 => IpAddr::from([0u8; 16]),
        };
        // Zero-length prefix is always valid
        IpNetwork::new(addr, 0).unwrap_or_else(|_| IpNetwork::from(addr))
    }
}

/// Map RTNETLINK errors to route table errors
fn classify(output: Output, route: &KernelRoute) -> RouteTableError {
    let stderr = output.stderr.to_lowercase();
    if stderr.contains("file exists") {
        RouteTableError::Exists(route.to_string())
    } else if stderr.contains("no such process") || stderr.contains("not found") {
        RouteTableError::NotFound(route.to_string())
    } else if stderr.contains("cannot find device") {
        RouteTableError::LinkNotFound(route.link.clone())
    } else if stderr.contains("network is unreachable") || stderr.contains("nexthop has invalid gateway") {
        match route.gateway {
            Some(gateway) => RouteTableError::NextHopUnreachable(gateway),
            None => RouteTableError::Command(output.command, output.stderr),
        }
    } else {
        RouteTableError::Command(output.command, output.stderr)
    }
}

/// Map a failed route lookup, no route at all means the destination is unreachable
fn lookup_error(output: Output, destination: IpAddr) -> RouteTableError {
    let stderr = output.stderr.to_lowercase();
    if stderr.contains("unreachable") || stderr.contains("no route") {
        RouteTableError::NextHopUnreachable(destination)
    } else {
        RouteTableError::Command(output.command, output.stderr)
    }
}

#[async_trait]
impl RouteTable for IpRouteTable {
    async fn find_link(&self, name: &str) -> Result<Link, RouteTableError> {
        let args: Vec<String> = vec!["-j", "addr", "show", "dev", name]
            .into_iter()
            .map(String::from)
            .collect();
        let links: Vec<LinkInfo> = self
            .query(&args)
            .await
            .map_err(|err| match err {
                RouteTableError::Command(_, _) => RouteTableError::LinkNotFound(name.to_string()),
                err => err,
            })?;
        links
            .into_iter()
            .find_map(|info| {
                let index = info.ifindex?;
                let link_name = info.ifname?;
                let addresses = info
                    .addr_info
                    .iter()
                    .filter_map(|addr| addr.local.as_ref()?.parse::<IpAddr>().ok())
                    .collect();
                Some(Link {
                    name: link_name,
                    index,
                    addresses,
                })
            })
            .ok_or_else(|| RouteTableError::LinkNotFound(name.to_string()))
    }

    async fn route_add(&self, route: &KernelRoute) -> Result<(), RouteTableError> {
        let output = self.exec(&self.route_args("add", route)).await?;
        if output.success {
            Ok(())
        } else {
            Err(classify(output, route))
        }
    }

    async fn route_delete(&self, route: &KernelRoute) -> Result<(), RouteTableError> {
        let output = self.exec(&self.route_args("del", route)).await?;
        if output.success {
            Ok(())
        } else {
            Err(classify(output, route))
        }
    }

    async fn route_get(&self, destination: IpAddr) -> Result<Vec<KernelRoute>, RouteTableError> {
        // fibmatch reports the matching route itself rather than a host route
        let args: Vec<String> = vec![
            "-j".to_string(),
            "route".to_string(),
            "get".to_string(),
            "fibmatch".to_string(),
            destination.to_string(),
        ];
        let output = self.exec(&args).await?;
        if !output.success {
            return Err(lookup_error(output, destination));
        }
        let routes = Self::parse_routes(&output.stdout, Family::of(destination), "")
            .map_err(|err| RouteTableError::Command(output.command, err.to_string()))?;
        Ok(routes
            .into_iter()
            .filter(|route| !route.link.is_empty())
            .collect())
    }

    async fn managed_routes(&self, link: &Link) -> Result<Vec<KernelRoute>, RouteTableError> {
        let mut routes = vec![];
        let protocol = self.protocol.to_string();
        for family in [Family::V4, Family::V6].iter() {
            let args: Vec<String> = vec![
                family.flag(),
                "-j",
                "route",
                "show",
                "dev",
                link.name.as_str(),
                "proto",
                protocol.as_str(),
            ]
            .into_iter()
            .map(String::from)
            .collect();
            let output = self.exec(&args).await?;
            if !output.success {
                return Err(RouteTableError::Command(output.command, output.stderr));
            }
            let found = Self::parse_routes(&output.stdout, *family, &link.name)
                .map_err(|err| RouteTableError::Command(output.command, err.to_string()))?;
            routes.extend(found);
        }
        Ok(routes)
    }
}
