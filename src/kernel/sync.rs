use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use log::{debug, info, warn};

use super::{KernelRoute, Link, RouteTable, RouteTableError};
use crate::rib::RouteEntry;

/// Applies route entries to the kernel routing table
///
/// When `link` is set every route egresses that interface, otherwise the
/// egress is taken from the kernel's own route towards the next hop.
pub struct Synchronizer {
    table: Arc<dyn RouteTable>,
    link: Option<Link>,
    // Routes added by this synchronizer keyed by prefix, with the BGP next hop
    installed: HashMap<IpNetwork, (IpAddr, KernelRoute)>,
}

impl Synchronizer {
    pub fn new(table: Arc<dyn RouteTable>, link: Option<Link>) -> Self {
        Self {
            table,
            link,
            installed: HashMap::new(),
        }
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    pub async fn install(&mut self, entry: &RouteEntry) -> Result<(), RouteTableError> {
        if entry.is_local {
            debug!("Not installing local route {}", entry.prefix);
            return Ok(());
        }
        let next_hop = entry
            .next_hop
            .ok_or_else(|| RouteTableError::InvalidRoute(format!("{} has no next hop", entry.prefix)))?;
        let route = self
            .link
            .as_ref()
            .map(|link| KernelRoute::new(entry.prefix, Some(next_hop), &link.name));
        match route {
            Some(route) => self.add(next_hop, route).await,
            None => self.install_against_best_route(entry.prefix, next_hop).await,
        }
    }

    pub async fn uninstall(&mut self, entry: &RouteEntry) -> Result<(), RouteTableError> {
        if entry.is_local {
            debug!("Not removing local route {}", entry.prefix);
            return Ok(());
        }
        let route = match self.installed.get(&entry.prefix) {
            Some((next_hop, route)) if entry.next_hop.map_or(true, |nh| nh == *next_hop) => {
                route.clone()
            }
            _ => self.resolve(entry).await?,
        };
        match self.table.route_delete(&route).await {
            Ok(()) => info!("Removed route {}", route),
            Err(RouteTableError::NotFound(_)) => {
                warn!("Route {} was not present in the kernel", route)
            }
            Err(err) => return Err(err),
        }
        self.installed.remove(&entry.prefix);
        Ok(())
    }

    /// Warn when the kernel already routes `entry` through a route we don't own
    pub async fn check_overlap(&self, entry: &RouteEntry) {
        let routes = match self.table.route_get(entry.prefix.network()).await {
            Ok(routes) => routes,
            Err(err) => {
                debug!("No existing route covers {}: {}", entry.prefix, err);
                return;
            }
        };
        for route in routes.iter() {
            if route.destination.prefix() == 0 || self.owns(route) {
                continue;
            }
            warn!(
                "{} overlaps existing kernel route {}, traffic may not follow BGP",
                entry.prefix, route
            );
        }
    }

    /// Install `prefix` through the same link and gateway the kernel uses for `next_hop`
    pub async fn install_against_best_route(
        &mut self,
        prefix: IpNetwork,
        next_hop: IpAddr,
    ) -> Result<(), RouteTableError> {
        let best = self.best_route(next_hop).await?;
        let gateway = best.gateway.unwrap_or(next_hop);
        debug!(
            "Best route to {} is {}, installing {} via {}",
            next_hop, best, prefix, gateway
        );
        self.add(next_hop, KernelRoute::new(prefix, Some(gateway), &best.link))
            .await
    }

    /// Remove every route this daemon owns on `link`, returns the number removed
    pub async fn clean_routes(&mut self, link: &Link) -> Result<usize, RouteTableError> {
        let routes = self.table.managed_routes(link).await?;
        let mut removed = 0;
        for route in routes.iter() {
            match self.table.route_delete(route).await {
                Ok(()) => {
                    debug!("Cleaned up route {}", route);
                    removed += 1;
                }
                Err(err) if err.is_benign() => (),
                Err(err) => return Err(err),
            }
        }
        self.installed.retain(|_, (_, route)| route.link != link.name);
        info!("Removed {} existing routes from {}", removed, link);
        Ok(removed)
    }

    async fn add(&mut self, next_hop: IpAddr, route: KernelRoute) -> Result<(), RouteTableError> {
        match self.table.route_add(&route).await {
            Ok(()) => info!("Installed route {}", route),
            Err(RouteTableError::Exists(_)) => debug!("Route {} already installed", route),
            Err(err) => return Err(err),
        }
        self.installed.insert(route.destination, (next_hop, route));
        Ok(())
    }

    fn owns(&self, route: &KernelRoute) -> bool {
        self.installed
            .get(&route.destination)
            .map_or(false, |(_, installed)| installed.link == route.link)
    }

    async fn best_route(&self, next_hop: IpAddr) -> Result<KernelRoute, RouteTableError> {
        self.table
            .route_get(next_hop)
            .await?
            .into_iter()
            .next()
            .ok_or(RouteTableError::NextHopUnreachable(next_hop))
    }

    /// Kernel route an entry would have been installed as
    async fn resolve(&self, entry: &RouteEntry) -> Result<KernelRoute, RouteTableError> {
        let next_hop = entry
            .next_hop
            .ok_or_else(|| RouteTableError::InvalidRoute(format!("{} has no next hop", entry.prefix)))?;
        match &self.link {
            Some(link) => Ok(KernelRoute::new(entry.prefix, Some(next_hop), &link.name)),
            None => {
                let best = self.best_route(next_hop).await?;
                Ok(KernelRoute::new(
                    entry.prefix,
                    Some(best.gateway.unwrap_or(next_hop)),
                    &best.link,
                ))
            }
        }
    }
}
