use std::net::IpAddr;

use ipnetwork::IpNetwork;
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use serde::{self, Deserialize, Serialize};

#[rpc(client, server)]
pub trait Api {
    #[method(name = "show_routes")]
    async fn show_routes(&self, prefix: Option<IpNetwork>) -> RpcResult<Vec<RouteView>>;
    #[method(name = "show_history")]
    async fn show_history(&self) -> RpcResult<Vec<HistoryView>>;
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RouteView {
    pub family: String,
    pub prefix: String,
    pub next_hop: Option<IpAddr>,
    pub originator_id: Option<IpAddr>,
    pub is_local: bool,
    pub is_withdrawn: bool,
    pub is_host_route: bool,
    // Expected to be present in the kernel
    pub installed: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HistoryView {
    pub learned_at: i64,
    pub age: String,
    pub prefix: String,
    pub next_hop: Option<IpAddr>,
    pub originator_id: Option<IpAddr>,
}
