use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use futures::StreamExt;
use ipnetwork::IpNetwork;
use log::{debug, error, info, warn};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::api::serve_rpc_api;
use crate::config::{MalformedUpdatePolicy, SyncConfig};
use crate::kernel::{IpRouteTable, MemoryRouteTable, RouteTable, RouteTableError, Synchronizer};
use crate::rib::{
    parse_monitor_line, parse_rib, History, MonitorRecord, ParseError, RibCache, RibError,
    SharedSnapshot,
};
use crate::speaker::{GobgpSpeaker, Speaker, SpeakerError};

/// Longest update line accepted from the feed
pub const MAX_UPDATE_LENGTH: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub enum SyncError {
    /// Speaker unreachable or its command failed
    Speaker(SpeakerError),
    /// RIB snapshot unusable
    Rib(RibError),
    /// Managed interface could not be resolved
    Kernel(RouteTableError),
    /// Existing routes could not be removed at startup
    Cleanup(RouteTableError),
    /// Reading the update feed failed
    Stream(LinesCodecError),
    /// Update feed reached end of file
    FeedClosed,
    /// Update feed line was not valid JSON
    Decode(ParseError),
    Api(jsonrpsee::core::Error),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SyncError::*;
        match self {
            Speaker(err) => write!(f, "BGP speaker error: {}", err),
            Rib(err) => write!(f, "RIB error: {}", err),
            Kernel(err) => write!(f, "Kernel error: {}", err),
            Cleanup(err) => write!(f, "Could not clean up existing routes: {}", err),
            Stream(err) => write!(f, "Update stream failed: {}", err),
            FeedClosed => write!(f, "Update stream closed by the speaker"),
            Decode(err) => write!(f, "Could not decode update: {}", err),
            Api(err) => write!(f, "API error: {}", err),
        }
    }
}

impl Error for SyncError {}

impl From<SpeakerError> for SyncError {
    fn from(error: SpeakerError) -> Self {
        SyncError::Speaker(error)
    }
}

impl From<RibError> for SyncError {
    fn from(error: RibError) -> Self {
        SyncError::Rib(error)
    }
}

impl From<ParseError> for SyncError {
    fn from(error: ParseError) -> Self {
        SyncError::Rib(RibError::Parse(error))
    }
}

impl From<LinesCodecError> for SyncError {
    fn from(error: LinesCodecError) -> Self {
        SyncError::Stream(error)
    }
}

impl From<jsonrpsee::core::Error> for SyncError {
    fn from(error: jsonrpsee::core::Error) -> Self {
        SyncError::Api(error)
    }
}

/// Owns the route cache and drives the kernel from the speaker's RIB
pub struct Handler {
    cache: RibCache,
    sync: Synchronizer,
    history: History,
    policy: MalformedUpdatePolicy,
    snapshots: watch::Sender<SharedSnapshot>,
}

impl Handler {
    pub fn new(
        sync: Synchronizer,
        local_address: Option<IpAddr>,
        config: &SyncConfig,
    ) -> (Self, watch::Receiver<SharedSnapshot>) {
        let (snapshots, receiver) = watch::channel(SharedSnapshot::default());
        let handler = Self {
            cache: RibCache::new(local_address),
            sync,
            history: History::with_capacity(config.history_size),
            policy: config.malformed_update,
            snapshots,
        };
        (handler, receiver)
    }

    pub fn cache(&self) -> &RibCache {
        &self.cache
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Reconcile the kernel with a full RIB snapshot
    /// Returns the number of installed routes
    pub async fn bootstrap<S>(&mut self, speaker: &S, advertise: &[IpNetwork]) -> Result<usize, SyncError>
    where
        S: Speaker + ?Sized,
    {
        if let Some(link) = self.sync.link().cloned() {
            self.sync
                .clean_routes(&link)
                .await
                .map_err(SyncError::Cleanup)?;
        } else {
            debug!("No managed interface, skipping route cleanup");
        }
        for prefix in advertise {
            speaker.originate(*prefix).await?;
        }

        let rib = speaker.rib_snapshot().await?;
        let entries = parse_rib(&rib, self.cache.local_address())?;
        let installable = self.cache.ingest_snapshot(entries)?;

        let mut installed = 0;
        for entry in installable.iter() {
            self.sync.check_overlap(entry).await;
            match self.sync.install(entry).await {
                Ok(()) => installed += 1,
                Err(err) => error!("Could not install {}: {}", entry.prefix, err),
            }
        }
        info!(
            "Installed {} of {} routes from RIB ({} prefixes)",
            installed,
            installable.len(),
            self.cache.len()
        );
        self.publish();
        Ok(installed)
    }

    /// Apply updates from the feed until it fails
    /// The feed closing is an error too, the speaker is expected to stream forever
    pub async fn monitor<R>(&mut self, feed: R) -> Result<(), SyncError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(feed, LinesCodec::new_with_max_length(MAX_UPDATE_LENGTH));
        while let Some(line) = lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let records = match parse_monitor_line(&line) {
                Ok(records) => records,
                Err(err) => match self.policy {
                    MalformedUpdatePolicy::Abort => return Err(SyncError::Decode(err)),
                    MalformedUpdatePolicy::Skip => {
                        warn!("Skipping malformed update: {}", err);
                        continue;
                    }
                },
            };
            self.handle_update(&records).await;
        }
        Err(SyncError::FeedClosed)
    }

    async fn handle_update(&mut self, records: &[MonitorRecord]) {
        let applied = match self.cache.apply_update(records) {
            Ok(applied) => applied,
            Err(err) => {
                error!("Could not apply update: {}", err);
                return;
            }
        };
        if let Some(stale) = applied.stale_route() {
            debug!("Next hop changed, removing {}", stale);
            if let Err(err) = self.sync.uninstall(stale).await {
                error!("Could not remove stale route {}: {}", stale.prefix, err);
            }
        }
        let entry = applied.current;
        if entry.is_local {
            debug!("Local route {}, kernel untouched", entry.prefix);
        } else if entry.is_withdrawn {
            if let Err(err) = self.sync.uninstall(&entry).await {
                error!("Could not remove {}: {}", entry.prefix, err);
            }
        } else {
            if let Err(err) = self.sync.install(&entry).await {
                error!("Could not install {}: {}", entry.prefix, err);
            }
            self.history.push(entry);
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = Arc::new(self.cache.snapshot(&self.history));
        // No receivers when the API is disabled
        let _ = self.snapshots.send(snapshot);
    }
}

/// Run the synchronizer against the configured speaker and kernel
pub async fn serve(config: SyncConfig) -> Result<(), SyncError> {
    let table: Arc<dyn RouteTable> = if config.dry_run {
        info!("Dry run, kernel routes are kept in memory");
        Arc::new(MemoryRouteTable::dry_run())
    } else {
        Arc::new(IpRouteTable::new(config.route_protocol))
    };
    let speaker = GobgpSpeaker::new(&config.speaker.command, config.speaker.args.clone());
    run(&config, table, &speaker).await
}

pub async fn run<S>(config: &SyncConfig, table: Arc<dyn RouteTable>, speaker: &S) -> Result<(), SyncError>
where
    S: Speaker + ?Sized,
{
    let link = match &config.interface {
        Some(name) => Some(table.find_link(name).await.map_err(SyncError::Kernel)?),
        None => None,
    };
    let local_address = config
        .local_address
        .or_else(|| link.as_ref().and_then(|link| link.addresses.first().copied()));
    match (&link, local_address) {
        (Some(link), Some(addr)) => info!("Managing routes on {}, local address {}", link, addr),
        (None, Some(addr)) => info!("Local address {}, egress from next hop routes", addr),
        (_, None) => warn!("No local address known, no route will be treated as local"),
    }

    let sync = Synchronizer::new(table, link);
    let (mut handler, snapshots) = Handler::new(sync, local_address, config);
    // Held until the monitor loop returns
    let _api = match config.api {
        Some(socket) => Some(serve_rpc_api(socket, snapshots).await?),
        None => None,
    };

    // Subscribe before the snapshot so no update in between is lost
    let feed = speaker.monitor().await?;
    handler.bootstrap(speaker, &config.advertise).await?;
    handler.monitor(feed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelRoute;
    use crate::speaker::ScriptedSpeaker;
    use std::io::Cursor;

    const RIB: &str = r#"[
        {"prefix": "10.1.0.0/24", "paths": [{"attrs": [{"type": 3, "nexthop": "192.0.2.5"}]}]},
        {"prefix": "10.2.0.0/24", "paths": [{"attrs": [{"type": 3, "nexthop": "192.0.2.1"}]}]}
    ]"#;

    fn kernel_route(dst: &str, gw: &str) -> KernelRoute {
        KernelRoute::new(dst.parse().unwrap(), Some(gw.parse().unwrap()), "eth0")
    }

    fn update(prefix: &str, next_hop: &str) -> String {
        format!(
            r#"[{{"nlri": {{"prefix": "{}"}}, "attrs": [{{"type": 3, "nexthop": "{}"}}]}}]"#,
            prefix, next_hop
        )
    }

    fn withdraw(prefix: &str) -> String {
        format!(r#"[{{"nlri": {{"prefix": "{}"}}, "attrs": [], "isWithdraw": true}}]"#, prefix)
    }

    fn feed(lines: &[String]) -> Cursor<Vec<u8>> {
        Cursor::new(lines.join("\n").into_bytes())
    }

    /// Replay `lines`, the feed then closes
    async fn replay(handler: &mut Handler, lines: &[String]) {
        let result = handler.monitor(feed(lines)).await;
        assert!(matches!(result, Err(SyncError::FeedClosed)), "{:?}", result);
    }

    fn config() -> SyncConfig {
        SyncConfig {
            interface: Some("eth0".to_string()),
            ..Default::default()
        }
    }

    async fn setup(config: &SyncConfig) -> (Arc<MemoryRouteTable>, Handler, watch::Receiver<SharedSnapshot>) {
        let table = Arc::new(MemoryRouteTable::new().with_link(
            "eth0",
            2,
            vec!["192.0.2.1".parse().unwrap()],
        ));
        let link = table.find_link("eth0").await.unwrap();
        let sync = Synchronizer::new(table.clone(), Some(link));
        let (handler, snapshots) = Handler::new(sync, "192.0.2.1".parse().ok(), config);
        (table, handler, snapshots)
    }

    #[tokio::test]
    async fn test_snapshot_then_withdraw() {
        let (table, mut handler, _) = setup(&config()).await;
        let installed = handler
            .bootstrap(&ScriptedSpeaker::new(RIB), &[])
            .await
            .unwrap();
        assert_eq!(installed, 1);
        assert_eq!(table.routes(), vec![kernel_route("10.1.0.0/24", "192.0.2.5")]);

        replay(&mut handler, &[withdraw("10.1.0.0/24")]).await;
        assert!(table.routes().is_empty());
        let prefix = "10.1.0.0/24".parse().unwrap();
        assert!(handler.cache().get(&prefix).unwrap().is_withdrawn);
    }

    #[tokio::test]
    async fn test_local_update_skips_kernel() {
        let (table, mut handler, _) = setup(&config()).await;
        handler
            .bootstrap(&ScriptedSpeaker::new(RIB), &[])
            .await
            .unwrap();
        let mutations = table.mutations();
        replay(&mut handler, &[update("10.9.0.0/24", "192.0.2.1"), withdraw("10.9.0.0/24")]).await;
        assert_eq!(table.mutations(), mutations);
        let prefix = "10.9.0.0/24".parse().unwrap();
        assert!(handler.cache().get(&prefix).unwrap().is_local);
        assert!(handler.history().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_line_aborts() {
        let (table, mut handler, _) = setup(&config()).await;
        handler
            .bootstrap(&ScriptedSpeaker::new(RIB), &[])
            .await
            .unwrap();
        let result = handler
            .monitor(feed(&[
                update("10.3.0.0/24", "192.0.2.6"),
                "[{\"nlri\": ".to_string(),
                update("10.4.0.0/24", "192.0.2.6"),
            ]))
            .await;
        assert!(matches!(result, Err(SyncError::Decode(_))));
        assert_eq!(
            table.routes(),
            vec![
                kernel_route("10.1.0.0/24", "192.0.2.5"),
                kernel_route("10.3.0.0/24", "192.0.2.6"),
            ]
        );
        assert!(handler.cache().get(&"10.4.0.0/24".parse().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_invalid_line_skipped() {
        let config = SyncConfig {
            malformed_update: MalformedUpdatePolicy::Skip,
            ..config()
        };
        let (table, mut handler, _) = setup(&config).await;
        replay(&mut handler, &["garbage".to_string(), update("10.4.0.0/24", "192.0.2.6")]).await;
        assert_eq!(table.routes(), vec![kernel_route("10.4.0.0/24", "192.0.2.6")]);
    }

    #[tokio::test]
    async fn test_empty_snapshot_rejected() {
        for rib in ["", "[]", "{}"].iter() {
            let (table, mut handler, _) = setup(&config()).await;
            let result = handler.bootstrap(&ScriptedSpeaker::new(rib), &[]).await;
            assert!(matches!(result, Err(SyncError::Rib(RibError::EmptyRib))));
            assert_eq!(table.mutations(), 0);
        }
    }

    #[tokio::test]
    async fn test_unreachable_speaker() {
        let (_, mut handler, _) = setup(&config()).await;
        let result = handler.bootstrap(&ScriptedSpeaker::unreachable(), &[]).await;
        assert!(matches!(result, Err(SyncError::Speaker(_))));
    }

    #[tokio::test]
    async fn test_last_update_wins() {
        let (table, mut handler, _) = setup(&config()).await;
        replay(
            &mut handler,
            &[
                update("10.5.0.0/24", "192.0.2.5"),
                update("10.5.0.0/24", "192.0.2.6"),
                update("10.5.0.0/24", "192.0.2.7"),
            ],
        )
        .await;
        assert_eq!(table.routes(), vec![kernel_route("10.5.0.0/24", "192.0.2.7")]);
        assert_eq!(handler.history().len(), 3);
    }

    #[tokio::test]
    async fn test_bootstrap_cleans_and_originates() {
        let (table, mut handler, _) = setup(&config()).await;
        table.add_managed_route(kernel_route("10.8.0.0/24", "192.0.2.5"));
        let speaker = ScriptedSpeaker::new(RIB);
        let advertise: Vec<IpNetwork> = vec!["198.51.100.0/24".parse().unwrap()];
        handler.bootstrap(&speaker, &advertise).await.unwrap();
        assert_eq!(speaker.originated(), advertise);
        assert_eq!(table.routes(), vec![kernel_route("10.1.0.0/24", "192.0.2.5")]);
    }

    #[tokio::test]
    async fn test_snapshots_are_published() {
        let (_, mut handler, snapshots) = setup(&config()).await;
        handler
            .bootstrap(&ScriptedSpeaker::new(RIB), &[])
            .await
            .unwrap();
        assert_eq!(snapshots.borrow().routes.len(), 2);
        replay(&mut handler, &[update("10.6.0.0/24", "192.0.2.5")]).await;
        let snapshot = snapshots.borrow().clone();
        assert_eq!(snapshot.routes.len(), 3);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn test_run_with_scripted_speaker() {
        let table = Arc::new(MemoryRouteTable::new().with_link(
            "eth0",
            2,
            vec!["192.0.2.1".parse().unwrap()],
        ));
        let speaker = ScriptedSpeaker::new(RIB).with_update(&withdraw("10.1.0.0/24"));
        let result = run(&config(), table.clone(), &speaker).await;
        assert!(matches!(result, Err(SyncError::FeedClosed)));
        assert!(table.routes().is_empty());
        assert_eq!(table.mutations(), 2);
    }

    #[tokio::test]
    async fn test_run_fails_when_feed_closes() {
        let table = Arc::new(MemoryRouteTable::new().with_link(
            "eth0",
            2,
            vec!["192.0.2.1".parse().unwrap()],
        ));
        let result = run(&config(), table.clone(), &ScriptedSpeaker::new(RIB)).await;
        assert!(matches!(result, Err(SyncError::FeedClosed)));
        // Bootstrapped routes stay in place for the next run to clean up
        assert_eq!(table.routes(), vec![kernel_route("10.1.0.0/24", "192.0.2.5")]);
    }

    #[tokio::test]
    async fn test_oversized_line_fails() {
        let (table, mut handler, _) = setup(&config()).await;
        let line = "x".repeat(MAX_UPDATE_LENGTH + 1);
        let result = handler.monitor(feed(&[line, update("10.4.0.0/24", "192.0.2.6")])).await;
        assert!(matches!(
            result,
            Err(SyncError::Stream(LinesCodecError::MaxLineLengthExceeded))
        ));
        assert_eq!(table.mutations(), 0);
    }
}
