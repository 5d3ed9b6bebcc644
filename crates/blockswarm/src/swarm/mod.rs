//! Download a file from every peer that has it, in parallel.
//!
//! A download goes through these states:
//!
//! - [`Resolving`]: ask the tracker who has the file, and agree on its block
//!   count.
//! - [`Assigning`]: spread the blocks over the peers that reported that count.
//! - [`Fetching`]: one task per peer, each asking for its own blocks.
//! - [`Reassembling`]: check that every block arrived.
//! - [`Persisting`]: write the file, share it, and tell the tracker.
//!
//! [`Resolving`]: DownloadState::Resolving
//! [`Assigning`]: DownloadState::Assigning
//! [`Fetching`]: DownloadState::Fetching
//! [`Reassembling`]: DownloadState::Reassembling
//! [`Persisting`]: DownloadState::Persisting
mod fetch;
mod plan;

pub use fetch::*;
pub use plan::*;

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    block::BlockStore,
    client::{TrackerClient, DEFAULT_TIMEOUT},
    error::Error,
    library::Library,
    peer_id::PeerId,
    record::DownloadLog,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Resolving,
    Assigning,
    Fetching,
    Reassembling,
    Persisting,
    Done,
    Failed,
}

/// A file that was fully received, but not written yet.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub store: BlockStore,
    /// How many peers were asked for blocks.
    pub peer_count: usize,
    pub elapsed: Duration,
}

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadReport {
    pub name: String,
    pub size: u64,
    pub peer_count: usize,
    pub elapsed: Duration,
    /// Where the file was written.
    pub path: PathBuf,
}

pub struct SwarmDownloader<C> {
    peer_id: PeerId,
    tracker: TrackerClient,
    library: Arc<Library>,
    chooser: C,
    timeout: Duration,
    log: Option<Arc<DownloadLog>>,
}

impl<C: BlockCountChooser> SwarmDownloader<C> {
    pub fn new(peer_id: PeerId, tracker: TrackerClient, library: Arc<Library>, chooser: C) -> Self {
        Self { peer_id, tracker, library, chooser, timeout: DEFAULT_TIMEOUT, log: None }
    }

    /// Bound of every connect and read to a source peer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record every completed download in `log`.
    pub fn with_log(mut self, log: Arc<DownloadLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Fetch `filename` from the swarm, then write it to the directory of the
    /// library and announce it to the tracker.
    #[tracing::instrument(skip(self), fields(peer_id = %self.peer_id))]
    pub async fn download(&self, filename: &str) -> Result<DownloadReport, Error> {
        let result = match self.fetch(filename).await {
            Ok(fetched) => self.persist(&fetched).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                Self::transition(filename, DownloadState::Done);
                info!(
                    "downloaded {filename}, {} bytes from {} peers in {:?}",
                    report.size, report.peer_count, report.elapsed
                );
            }
            Err(e) => {
                Self::transition(filename, DownloadState::Failed);
                warn!("download of {filename} failed: {e}");
            }
        }

        result
    }

    /// Get every block of `filename` from the peers that have it.
    ///
    /// Fails with [`Error::Incomplete`] if some blocks didn't arrive, whatever
    /// the reason: a peer that could not be reached, that closed the
    /// connection early, or that timed out.
    pub async fn fetch(&self, filename: &str) -> Result<Fetched, Error> {
        let start = Instant::now();

        Self::transition(filename, DownloadState::Resolving);
        let holders = self.tracker.who_has(filename).await?;
        debug!("holders of {filename}: {holders:?}");

        if holders.is_empty() {
            return Err(Error::NoSource(filename.to_owned()));
        }

        let block_count = choose_block_count(filename, &holders, &self.chooser)?;

        Self::transition(filename, DownloadState::Assigning);
        let plan = DownloadPlan::round_robin(filename, block_count, &holders)?;
        let peer_count = plan.peer_count();
        info!("{filename} has {block_count} blocks, fetching from {peer_count} peers");

        Self::transition(filename, DownloadState::Fetching);
        let blocks = SharedBlocks::default();
        let mut tasks = JoinSet::new();

        for assignment in plan.assignments {
            let addr = assignment.addr;
            let task = fetch_assignment(
                filename.to_owned(),
                block_count,
                assignment,
                blocks.clone(),
                self.timeout,
            );
            tasks.spawn(async move { (addr, task.await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((addr, Ok(n))) => debug!("{addr} sent {n} blocks of {filename}"),
                Ok((addr, Err(e))) => warn!("fetch of {filename} from {addr} failed: {e}"),
                Err(e) => warn!("fetch task of {filename} panicked: {e}"),
            }
        }

        Self::transition(filename, DownloadState::Reassembling);

        let blocks = std::mem::take(&mut *blocks.lock().await);

        if blocks.is_empty() && block_count > 0 {
            return Err(Error::NoData(filename.to_owned()));
        }

        let store = BlockStore::from_block_map(filename, blocks)?;
        let missing = store.missing_blocks(block_count);

        if !missing.is_empty() {
            return Err(Error::Incomplete { name: filename.to_owned(), missing });
        }

        Ok(Fetched { store, peer_count, elapsed: start.elapsed() })
    }

    /// Write a fetched file to the directory of the library, add it to the
    /// library and tell the tracker about it.
    ///
    /// Can be called again after a failure, the file is simply written again.
    pub async fn persist(&self, fetched: &Fetched) -> Result<DownloadReport, Error> {
        let start = Instant::now();
        let name = fetched.store.name();
        Self::transition(name, DownloadState::Persisting);

        let path = fetched.store.write_to_disk(self.library.dir()).await?;
        self.library.insert(Arc::new(fetched.store.clone())).await;

        let ack = self.tracker.new_file(&self.peer_id, name).await?;
        debug!("tracker acknowledged {name}: {ack}");

        let report = DownloadReport {
            name: name.to_owned(),
            size: fetched.store.size(),
            peer_count: fetched.peer_count,
            elapsed: fetched.elapsed + start.elapsed(),
            path,
        };

        if let Some(log) = &self.log {
            if let Err(e) = log.append(&report).await {
                warn!("could not record the download of {name}: {e}");
            }
        }

        Ok(report)
    }

    fn transition(filename: &str, state: DownloadState) {
        info!("{filename}: {state:?}");
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}
