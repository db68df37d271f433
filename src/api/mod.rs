mod handler;
pub mod rpc;
mod routes;

pub use handler::{serve_rpc_api, StatusApi};
