//! The state of the tracker: which peer shares which files.
use std::net::SocketAddr;

use hashbrown::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::peer_id::PeerId;

/// What the tracker knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    /// Address where the peer accepts connections.
    pub addr: SocketAddr,
    pub files: HashSet<String>,
}

impl PeerRecord {
    pub fn new<I, S>(peer_id: PeerId, addr: SocketAddr, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { peer_id, addr, files: files.into_iter().map(Into::into).collect() }
    }

    /// Files sorted by name.
    pub fn sorted_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.files.iter().cloned().collect();
        files.sort();
        files
    }
}

/// Peers known by the tracker, only kept in memory.
///
/// Every read and write goes through the same lock. No method holds the lock
/// across network I/O: callers that need to talk to peers take a snapshot
/// first.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<PeerId, PeerRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the peer, replacing any previous record with the same id.
    pub async fn register(&self, record: PeerRecord) {
        info!(
            "peer {} registered at {} with files {:?}",
            record.peer_id,
            record.addr,
            record.sorted_files()
        );
        let mut peers = self.peers.lock().await;
        peers.insert(record.peer_id.clone(), record);
    }

    /// Id and address of every peer that has `filename`, ordered by id.
    pub async fn who_has(&self, filename: &str) -> Vec<(PeerId, SocketAddr)> {
        let peers = self.peers.lock().await;
        let mut holders: Vec<(PeerId, SocketAddr)> = peers
            .values()
            .filter(|p| p.files.contains(filename))
            .map(|p| (p.peer_id.clone(), p.addr))
            .collect();
        drop(peers);

        holders.sort();
        holders
    }

    /// Add a file to a peer, returns false if the peer is not registered.
    pub async fn new_file(&self, peer_id: &PeerId, filename: &str) -> bool {
        let mut peers = self.peers.lock().await;
        match peers.get_mut(peer_id) {
            Some(record) => {
                record.files.insert(filename.to_owned());
                info!("peer {peer_id} added new file: {filename}");
                true
            }
            None => {
                debug!("new file {filename} of unknown peer {peer_id}");
                false
            }
        }
    }

    /// Remove a peer, returns false if it was not registered.
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        let removed = self.peers.lock().await.remove(peer_id).is_some();
        if removed {
            info!("peer {peer_id} disconnected");
        }
        removed
    }

    /// Replace the files of a peer with the list the peer reported, `seen`
    /// being the record the peer was asked about.
    ///
    /// The record is only touched if the peer is still registered at the
    /// same address, a peer that re-registered elsewhere keeps its new
    /// record. Files announced after `seen` was taken are kept, the report
    /// may predate them.
    pub async fn update_files(&self, seen: &PeerRecord, files: Vec<String>) -> bool {
        let peer_id = &seen.peer_id;
        let mut peers = self.peers.lock().await;
        match peers.get_mut(peer_id) {
            Some(record) if record.addr == seen.addr => {
                let mut reported: HashSet<String> = files.into_iter().collect();
                for name in record.files.difference(&seen.files) {
                    debug!("peer {peer_id} announced {name} during the verification");
                    reported.insert(name.clone());
                }
                record.files = reported;
                debug!("peer {peer_id} files are now {:?}", record.sorted_files());
                true
            }
            _ => false,
        }
    }

    /// A copy of every record, ordered by id.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        let peers = self.peers.lock().await;
        let mut records: Vec<PeerRecord> = peers.values().cloned().collect();
        drop(peers);

        records.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        records
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.lock().await.get(peer_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}
