//! Per-torrent orchestration: announce lifecycle and the peer I/O loop.
//!
//! Mirrors the reference client's `TorrentManager`: one driver owns a
//! torrent's tracker tier manager and its set of live peer connections,
//! announces `started`/`stopped` at the right times, and re-announces on
//! the tracker-supplied interval. Piece selection, the request queue, and
//! on-disk storage are out of scope — this is the networking loop, not the
//! download engine.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::peer::message::Message;
use crate::peer::session::{PeerEvent, PeerSession};
use crate::peer::PeerError;
use crate::torrent::file::TorrentFile;
use crate::tracker::{AnnounceEvent, AnnounceParams, Peer, TierManager, TrackerError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// What a peer task reports back to the driver's `run` loop.
#[derive(Debug)]
pub enum DriverEvent {
    PeerReady(SocketAddr),
    PeerMessage(SocketAddr, PeerEvent),
    PeerClosed(SocketAddr, PeerError),
}

/// Bound on the command channel each peer task listens on; a driver rarely
/// needs to queue more than a handful of outbound messages ahead of a peer.
const PEER_COMMAND_CHANNEL: usize = 32;
const EVENT_CHANNEL: usize = 256;
/// How often `run` wakes up to check whether a re-announce is due. The
/// tracker's own interval, not this constant, governs when one actually
/// fires.
const TICK: Duration = Duration::from_secs(1);

pub struct TorrentDriver {
    torrent: TorrentFile,
    peer_id: [u8; 20],
    port: u16,
    numwant: i32,
    tiers: TierManager,
    uploaded: i64,
    downloaded: i64,
    last_announce: Option<Instant>,
    interval: Duration,
    peers: HashMap<SocketAddr, mpsc::Sender<Message>>,
    events_tx: mpsc::Sender<DriverEvent>,
    events_rx: mpsc::Receiver<DriverEvent>,
    is_active: bool,
}

impl TorrentDriver {
    pub fn new(torrent: TorrentFile, peer_id: [u8; 20], port: u16, numwant: i32) -> Self {
        let tiers = TierManager::new(&torrent.announce, &torrent.announce_list);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL);
        Self {
            torrent,
            peer_id,
            port,
            numwant,
            tiers,
            uploaded: 0,
            downloaded: 0,
            last_announce: None,
            interval: Duration::from_secs(1800),
            peers: HashMap::new(),
            events_tx,
            events_rx,
            is_active: false,
        }
    }

    fn announce_params(&self, event: AnnounceEvent) -> AnnounceParams {
        AnnounceParams {
            info_hash: self.torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            left: (self.torrent.total_length() - self.downloaded).max(0),
            event,
            numwant: self.numwant,
        }
    }

    /// Sends the `started` announce and connects to whatever peers it
    /// returns. Mirrors `_start_download`.
    #[instrument(level = "debug", skip(self))]
    pub async fn start(&mut self) -> DriverResult<()> {
        self.is_active = true;
        let params = self.announce_params(AnnounceEvent::Started);
        let result = self.tiers.announce(&params, None).await?;
        self.interval = Duration::from_secs(result.interval.max(30) as u64);
        self.last_announce = Some(Instant::now());
        self.spawn_new_peers(&result.peers);
        Ok(())
    }

    /// Sends the `stopped` announce. Best-effort: a tracker that's
    /// unreachable at shutdown shouldn't block it.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&mut self) {
        self.is_active = false;
        self.peers.clear();
        let params = self.announce_params(AnnounceEvent::Stopped);
        if let Err(err) = self.tiers.announce(&params, None).await {
            warn!(error = %err, "stopped announce failed, continuing shutdown anyway");
        }
    }

    fn announce_due(&self) -> bool {
        match self.last_announce {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        }
    }

    async fn reannounce_if_due(&mut self) {
        if !self.announce_due() {
            return;
        }
        let params = self.announce_params(AnnounceEvent::None);
        match self.tiers.announce(&params, None).await {
            Ok(result) => {
                self.interval = Duration::from_secs(result.interval.max(30) as u64);
                self.last_announce = Some(Instant::now());
                self.spawn_new_peers(&result.peers);
            }
            Err(err) => warn!(error = %err, "re-announce failed, keeping existing peer set"),
        }
    }

    /// Spawns a connection task for each tracker-reported peer this driver
    /// isn't already talking to.
    fn spawn_new_peers(&mut self, reported: &[Peer]) {
        for peer in reported {
            let addr = SocketAddr::new(peer.ip, peer.port);
            if self.peers.contains_key(&addr) {
                continue;
            }
            let (cmd_tx, cmd_rx) = mpsc::channel(PEER_COMMAND_CHANNEL);
            self.peers.insert(addr, cmd_tx);
            let session = PeerSession::new(addr, self.torrent.num_pieces());
            let info_hash = self.torrent.info_hash;
            let our_peer_id = self.peer_id;
            let events_tx = self.events_tx.clone();
            tokio::spawn(run_peer_task(session, info_hash, our_peer_id, cmd_rx, events_tx));
        }
    }

    /// Logs a peer event and drops its connection bookkeeping once a peer
    /// is gone. Piece storage and request scheduling live above this.
    fn handle_peer_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::PeerReady(addr) => debug!(%addr, "peer ready"),
            DriverEvent::PeerMessage(addr, event) => debug!(%addr, ?event, "peer message"),
            DriverEvent::PeerClosed(addr, err) => {
                debug!(%addr, error = %err, "peer connection closed");
                self.peers.remove(&addr);
            }
        }
    }

    /// The driver's main loop: reacts to peer events as they arrive and
    /// checks the announce interval once a second, translating the
    /// reference client's blocking `select.select` loop into
    /// `tokio::select!`.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(TICK);
        while self.is_active {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reannounce_if_due().await;
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_peer_event(event),
                        None => break,
                    }
                }
            }
        }
    }

    pub fn request_stop(&mut self) {
        self.is_active = false;
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Owns one peer's connection for its whole lifetime: connect, handshake,
/// then alternate between reading incoming messages and forwarding
/// outbound commands, until either side closes.
async fn run_peer_task(
    mut session: PeerSession,
    info_hash: [u8; 20],
    our_peer_id: [u8; 20],
    mut commands: mpsc::Receiver<Message>,
    events: mpsc::Sender<DriverEvent>,
) {
    let addr = session.addr;
    if let Err(err) = session.connect(info_hash, our_peer_id, None).await {
        let _ = events.send(DriverEvent::PeerClosed(addr, err)).await;
        return;
    }
    let _ = events.send(DriverEvent::PeerReady(addr)).await;

    loop {
        tokio::select! {
            result = session.read_and_handle() => {
                match result {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            if let Some(reply) = outcome.reply {
                                if let Err(err) = session.send(&reply).await {
                                    let _ = events.send(DriverEvent::PeerClosed(addr, err)).await;
                                    return;
                                }
                            }
                            if let Some(event) = outcome.event {
                                if events.send(DriverEvent::PeerMessage(addr, event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        let _ = events.send(DriverEvent::PeerClosed(addr, err)).await;
                        return;
                    }
                }
            }
            command = commands.recv() => {
                match command {
                    Some(msg) => {
                        if let Err(err) = session.send(&msg).await {
                            let _ = events.send(DriverEvent::PeerClosed(addr, err)).await;
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}
