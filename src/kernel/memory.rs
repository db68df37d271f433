use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use log::info;

use super::{KernelRoute, Link, RouteTable, RouteTableError};

#[derive(Debug, Default)]
struct Inner {
    links: HashMap<String, Link>,
    routes: HashSet<KernelRoute>,
    // Routes installed by someone else (connected subnets, default route, ...)
    foreign: HashSet<KernelRoute>,
    mutations: usize,
}

/// In-memory route table, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryRouteTable {
    inner: Mutex<Inner>,
    dry_run: bool,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every mutation instead of touching the kernel
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn with_link(self, name: &str, index: u32, addresses: Vec<IpAddr>) -> Self {
        self.add_link(name, index, addresses);
        self
    }

    pub fn add_link(&self, name: &str, index: u32, addresses: Vec<IpAddr>) {
        let link = Link {
            name: name.to_string(),
            index,
            addresses,
        };
        if let Ok(mut inner) = self.inner.lock() {
            inner.links.insert(name.to_string(), link);
        }
    }

    /// Route present in the kernel but not managed by us
    pub fn add_foreign_route(&self, route: KernelRoute) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.foreign.insert(route);
        }
    }

    /// Seed a managed route, e.g. left over from a previous run
    pub fn add_managed_route(&self, route: KernelRoute) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.routes.insert(route);
        }
    }

    pub fn routes(&self) -> Vec<KernelRoute> {
        let mut routes: Vec<KernelRoute> = self
            .inner
            .lock()
            .map(|inner| inner.routes.iter().cloned().collect())
            .unwrap_or_default();
        routes.sort_by_key(|r| r.to_string());
        routes
    }

    pub fn contains(&self, route: &KernelRoute) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.routes.contains(route))
            .unwrap_or(false)
    }

    /// Number of successful add/delete calls
    pub fn mutations(&self) -> usize {
        self.inner.lock().map(|inner| inner.mutations).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, RouteTableError> {
        self.inner
            .lock()
            .map_err(|_| RouteTableError::Command("memory".to_string(), "lock poisoned".to_string()))
    }
}

#[async_trait]
impl RouteTable for MemoryRouteTable {
    async fn find_link(&self, name: &str) -> Result<Link, RouteTableError> {
        let inner = self.lock()?;
        match inner.links.get(name) {
            Some(link) => Ok(link.clone()),
            // Dry runs accept any interface
            None if self.dry_run => Ok(Link {
                name: name.to_string(),
                index: 0,
                addresses: vec![],
            }),
            None => Err(RouteTableError::LinkNotFound(name.to_string())),
        }
    }

    async fn route_add(&self, route: &KernelRoute) -> Result<(), RouteTableError> {
        let mut inner = self.lock()?;
        if !self.dry_run && !inner.links.contains_key(&route.link) {
            return Err(RouteTableError::LinkNotFound(route.link.clone()));
        }
        if !inner.routes.insert(route.clone()) {
            return Err(RouteTableError::Exists(route.to_string()));
        }
        inner.mutations += 1;
        if self.dry_run {
            info!("[dry-run] ip route add {}", route);
        }
        Ok(())
    }

    async fn route_delete(&self, route: &KernelRoute) -> Result<(), RouteTableError> {
        let mut inner = self.lock()?;
        let removed = if route.gateway.is_some() {
            inner.routes.remove(route)
        } else {
            // Without a gateway, any route to the destination on the link matches
            let before = inner.routes.len();
            inner
                .routes
                .retain(|r| !(r.destination == route.destination && r.link == route.link));
            inner.routes.len() != before
        };
        if !removed {
            return Err(RouteTableError::NotFound(route.to_string()));
        }
        inner.mutations += 1;
        if self.dry_run {
            info!("[dry-run] ip route del {}", route);
        }
        Ok(())
    }

    async fn route_get(&self, destination: IpAddr) -> Result<Vec<KernelRoute>, RouteTableError> {
        let inner = self.lock()?;
        // Longest prefix match across every known route
        let best = inner
            .routes
            .iter()
            .chain(inner.foreign.iter())
            .filter(|r| r.destination.contains(destination))
            .max_by_key(|r| r.destination.prefix());
        match best {
            Some(route) => Ok(vec![route.clone()]),
            None => Err(RouteTableError::NextHopUnreachable(destination)),
        }
    }

    async fn managed_routes(&self, link: &Link) -> Result<Vec<KernelRoute>, RouteTableError> {
        let inner = self.lock()?;
        Ok(inner
            .routes
            .iter()
            .filter(|r| r.link == link.name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dst: &str, gw: &str) -> KernelRoute {
        KernelRoute::new(dst.parse().unwrap(), Some(gw.parse().unwrap()), "eth0")
    }

    #[tokio::test]
    async fn test_add_delete() {
        let table = MemoryRouteTable::new().with_link("eth0", 2, vec![]);
        let r = route("10.1.0.0/24", "192.0.2.5");
        table.route_add(&r).await.unwrap();
        assert!(matches!(table.route_add(&r).await, Err(RouteTableError::Exists(_))));
        assert!(table.contains(&r));
        table.route_delete(&r).await.unwrap();
        assert!(matches!(table.route_delete(&r).await, Err(RouteTableError::NotFound(_))));
        assert_eq!(table.mutations(), 2);
    }

    #[tokio::test]
    async fn test_unknown_link() {
        let table = MemoryRouteTable::new();
        assert!(matches!(
            table.find_link("eth9").await,
            Err(RouteTableError::LinkNotFound(_))
        ));
        assert!(table.route_add(&route("10.1.0.0/24", "192.0.2.5")).await.is_err());
    }

    #[tokio::test]
    async fn test_route_get_longest_match() {
        let table = MemoryRouteTable::new().with_link("eth0", 2, vec![]);
        table.add_foreign_route(KernelRoute::new(
            "0.0.0.0/0".parse().unwrap(),
            Some("192.0.2.254".parse().unwrap()),
            "eth0",
        ));
        table.add_foreign_route(KernelRoute::new("192.0.2.0/24".parse().unwrap(), None, "eth0"));
        let routes = table.route_get("192.0.2.5".parse().unwrap()).await.unwrap();
        assert_eq!(routes[0].destination.to_string(), "192.0.2.0/24");
        let routes = table.route_get("8.8.8.8".parse().unwrap()).await.unwrap();
        assert_eq!(routes[0].gateway, "192.0.2.254".parse().ok());
        assert!(table.route_get("2001:db8::1".parse().unwrap()).await.is_err());
    }
}
