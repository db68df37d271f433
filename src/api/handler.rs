use std::net::SocketAddr;

use ipnetwork::IpNetwork;
use jsonrpsee::core::RpcResult;
use jsonrpsee::http_server::{HttpServerBuilder, HttpServerHandle};
use log::info;
use tokio::sync::watch;

use super::routes::{entry_to_route, learned_to_history, matches_prefix};
use super::rpc::{ApiServer, HistoryView, RouteView};
use crate::rib::SharedSnapshot;

/// Read-only view over the snapshots published by the monitor loop
#[derive(Clone)]
pub struct StatusApi {
    snapshots: watch::Receiver<SharedSnapshot>,
}

impl StatusApi {
    pub fn new(snapshots: watch::Receiver<SharedSnapshot>) -> Self {
        Self { snapshots }
    }

    fn latest(&self) -> SharedSnapshot {
        self.snapshots.borrow().clone()
    }
}

#[async_trait::async_trait]
impl ApiServer for StatusApi {
    async fn show_routes(&self, prefix: Option<IpNetwork>) -> RpcResult<Vec<RouteView>> {
        let snapshot = self.latest();
        Ok(snapshot
            .routes
            .iter()
            .filter(|entry| match &prefix {
                Some(filter) => matches_prefix(entry, filter),
                _ => true,
            })
            .map(entry_to_route)
            .collect())
    }

    async fn show_history(&self) -> RpcResult<Vec<HistoryView>> {
        let snapshot = self.latest();
        // Most recent first
        Ok(snapshot.history.iter().rev().map(learned_to_history).collect())
    }
}

/// Start the JSON-RPC server, it runs until the returned handle is dropped
pub async fn serve_rpc_api(
    socket: SocketAddr,
    snapshots: watch::Receiver<SharedSnapshot>,
) -> Result<HttpServerHandle, jsonrpsee::core::Error> {
    let api = StatusApi::new(snapshots);
    info!("Starting JSON-RPC server on {}...", socket);
    let server = HttpServerBuilder::default().build(socket).await?;
    server.start(api.into_rpc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::{History, RibCache, RouteEntry};
    use std::sync::Arc;

    fn snapshot() -> SharedSnapshot {
        let mut cache = RibCache::new("192.0.2.1".parse().ok());
        let mut entries = vec![];
        for (prefix, next_hop) in [("10.1.0.0/24", "192.0.2.5"), ("172.16.0.0/16", "192.0.2.6")].iter() {
            let mut entry = RouteEntry::new(prefix.parse().unwrap());
            entry.next_hop = next_hop.parse().ok();
            entries.push(entry);
        }
        let mut history = History::with_capacity(4);
        history.push(entries[0].clone());
        history.push(entries[1].clone());
        cache.ingest_snapshot(entries).unwrap();
        Arc::new(cache.snapshot(&history))
    }

    #[tokio::test]
    async fn test_show_routes() {
        let (_tx, rx) = watch::channel(snapshot());
        let api = StatusApi::new(rx);
        assert_eq!(api.show_routes(None).await.unwrap().len(), 2);
        let filtered = api
            .show_routes(Some("10.0.0.0/8".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].prefix, "10.1.0.0/24");
    }

    #[tokio::test]
    async fn test_show_history() {
        let (_tx, rx) = watch::channel(snapshot());
        let api = StatusApi::new(rx);
        let history = api.show_history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prefix, "172.16.0.0/16");
    }
}
