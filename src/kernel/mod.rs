mod iproute;
mod memory;
mod sync;

pub use iproute::IpRouteTable;
pub use memory::MemoryRouteTable;
pub use sync::Synchronizer;

use std::error::Error;
use std::fmt;
use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use ipnetwork::IpNetwork;

/// Kernel network interface
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    pub name: String,
    pub index: u32,
    pub addresses: Vec<IpAddr>,
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (index {})", self.name, self.index)
    }
}

/// A universe-scoped unicast route: `destination via gateway dev link`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelRoute {
    pub destination: IpNetwork,
    pub gateway: Option<IpAddr>,
    pub link: String,
}

impl KernelRoute {
    pub fn new(destination: IpNetwork, gateway: Option<IpAddr>, link: &str) -> Self {
        Self {
            destination,
            gateway,
            link: link.to_string(),
        }
    }
}

impl fmt::Display for KernelRoute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gateway) = self.gateway {
            write!(f, " via {}", gateway)?;
        }
        write!(f, " dev {}", self.link)
    }
}

#[derive(Debug)]
pub enum RouteTableError {
    /// No interface with this name
    LinkNotFound(String),
    /// Route is already present
    Exists(String),
    /// Route to delete is not present
    NotFound(String),
    /// Kernel has no route towards the next hop
    NextHopUnreachable(IpAddr),
    /// Entry can't be expressed as a kernel route
    InvalidRoute(String),
    /// Route table command failed [command, output]
    Command(String, String),
    Io(io::Error),
}

impl RouteTableError {
    /// Kernel already matches the requested state
    pub fn is_benign(&self) -> bool {
        matches!(self, RouteTableError::Exists(_) | RouteTableError::NotFound(_))
    }
}

impl fmt::Display for RouteTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use RouteTableError::*;
        match self {
            LinkNotFound(name) => write!(f, "Link not found: {}", name),
            Exists(route) => write!(f, "Route already exists: {}", route),
            NotFound(route) => write!(f, "Route not found: {}", route),
            NextHopUnreachable(nh) => {
                write!(f, "Route for the next hop {} could not be found", nh)
            }
            InvalidRoute(reason) => write!(f, "Invalid route: {}", reason),
            Command(cmd, output) => write!(f, "'{}' failed: {}", cmd, output),
            Io(err) => write!(f, "Route table I/O error: {}", err),
        }
    }
}

impl Error for RouteTableError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RouteTableError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RouteTableError {
    fn from(error: io::Error) -> Self {
        RouteTableError::Io(error)
    }
}

/// Kernel routing table capability
#[async_trait]
pub trait RouteTable: Send + Sync {
    async fn find_link(&self, name: &str) -> Result<Link, RouteTableError>;
    async fn route_add(&self, route: &KernelRoute) -> Result<(), RouteTableError>;
    async fn route_delete(&self, route: &KernelRoute) -> Result<(), RouteTableError>;
    /// Routes the kernel would use to reach `destination`
    async fn route_get(&self, destination: IpAddr) -> Result<Vec<KernelRoute>, RouteTableError>;
    /// Routes owned by this daemon egressing `link`
    async fn managed_routes(&self, link: &Link) -> Result<Vec<KernelRoute>, RouteTableError>;
}
