//! # ribsync CLI
//!
//! The same binary runs the synchronizer and queries a running instance through its
//! JSON-RPC status API (localhost:8080 by default, see `--host` and `--port`).
//!
//! ## Running
//! ```sh
//! $ ribsync run ./demos/config.toml --interface eth0 -vv
//! ```
//! Use `--dry-run` to keep kernel changes in memory (they are logged instead).
//!
//! ## Routes
//! ```sh
//! $ ribsync show routes
//! IPv4
//!  Prefix          Next Hop    Originator  State      Host Route
//! -+---------------+-----------+-----------+----------+------------
//!  10.1.0.0/24     192.0.2.5   10.0.0.9    Installed  ---
//!  10.9.0.0/24     192.0.2.1   ---         Local      ---
//!  10.3.0.1/32     192.0.2.7   ---         Withdrawn  yes
//! ```
//! Filter with an address or covering prefix: `ribsync show routes 10.0.0.0/8`
//!
//! ## History
//! Routes installed from the update feed, most recent first:
//! ```sh
//! $ ribsync show history
//!  Prefix       Next Hop   Originator  Age
//! -+------------+----------+-----------+----------
//!  10.1.0.0/24  192.0.2.6  ---         00:00:12
//! ```

use std::error::Error;
use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use colored::*;
use ipnetwork::IpNetwork;
use itertools::Itertools;
use jsonrpsee::http_client::HttpClientBuilder;

use crate::api::rpc::ApiClient;
use crate::config::SyncConfig;

mod display;
mod table;

use display::{HistoryRow, RouteRow};

#[derive(Parser, Debug)]
#[clap(name = "ribsync", rename_all = "kebab-case")]
/// Mirror a BGP speaker's RIB into the kernel routing table
pub struct Args {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Status API host to query
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Status API port to query
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,
    /// Show debug logs (additive for trace logs)
    #[clap(short, parse(from_occurrences), global = true)]
    pub verbose: u8,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    #[clap()]
    /// Run the synchronizer
    Run(RunOptions),
    #[clap(alias = "s")]
    /// View the state of a running synchronizer
    #[clap(subcommand)]
    Show(Show),
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct RunOptions {
    /// Path to config.toml, defaults are used when omitted
    pub config_path: Option<String>,
    /// Managed interface. If not provided, will fall back to config file value
    #[clap(short, long)]
    pub interface: Option<String>,
    /// Address of this host, routes towards it are never installed
    #[clap(long)]
    pub local_address: Option<IpAddr>,
    /// API Listening address/port (E.g. 127.0.0.1:8080). If not provided, will fall back to config file value
    #[clap(long)]
    pub api: Option<SocketAddr>,
    /// Keep kernel changes in memory and log them
    #[clap(long)]
    pub dry_run: bool,
}

impl RunOptions {
    /// Merge command line overrides into `config`
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if let Some(local_address) = self.local_address {
            config.local_address = Some(local_address);
        }
        if let Some(api) = self.api {
            config.api = Some(api);
        }
        config.dry_run |= self.dry_run;
    }
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub enum Show {
    /// Routes learned from the speaker
    #[clap(alias = "r")]
    Routes(RouteOptions),
    /// Routes recently installed from the update feed
    #[clap(alias = "h")]
    History,
}

#[derive(Parser, Debug)]
#[clap(rename_all = "kebab-case")]
pub struct RouteOptions {
    /// IP Address or Network Prefix to filter routes
    #[clap()]
    prefix: Option<IpNetwork>,
}

async fn run_cmd(args: &Args) -> Result<(), Box<dyn Error>> {
    let client = {
        let base = format!("http://{}:{}", args.host, args.port);
        HttpClientBuilder::default().build(base)?
    };
    match &args.cmd {
        Command::Show(show) => match show {
            Show::Routes(options) => {
                let routes = client.show_routes(options.prefix).await?;
                if routes.is_empty() {
                    println!("No routes");
                }
                for (family, routes) in &routes.into_iter().group_by(|r| r.family.clone()) {
                    println!("{}", family);
                    let mut table = table::OutputTable::new();
                    for route in routes {
                        table.add_row(&RouteRow(route));
                    }
                    table.print();
                    println!();
                }
            }
            Show::History => {
                let history = client.show_history().await?;
                let mut table = table::OutputTable::new();
                for learned in history {
                    table.add_row(&HistoryRow(learned));
                }
                table.print();
            }
        },
        // Handled in main
        Command::Run(_) => (),
    }
    Ok(())
}

/// Interactive commands (other than running the synchronizer)
pub async fn query_ribsync(args: &Args) {
    if let Err(err) = run_cmd(args).await {
        eprintln!("{}", err.to_string().red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::try_parse_from(&[
            "ribsync",
            "run",
            "./demos/config.toml",
            "--interface",
            "eth1",
            "--dry-run",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        match args.cmd {
            Command::Run(options) => {
                let mut config = SyncConfig::default();
                options.apply(&mut config);
                assert_eq!(config.interface.as_deref(), Some("eth1"));
                assert!(config.dry_run);
                assert_eq!(options.config_path.as_deref(), Some("./demos/config.toml"));
            }
            cmd => panic!("Unexpected command {:?}", cmd),
        }
    }

    #[test]
    fn test_parse_show_routes() {
        let args = Args::try_parse_from(&["ribsync", "-p", "9000", "show", "routes", "10.0.0.0/8"])
            .unwrap();
        assert_eq!(args.port, 9000);
        assert!(matches!(
            args.cmd,
            Command::Show(Show::Routes(RouteOptions { prefix: Some(_) }))
        ));
    }
}
