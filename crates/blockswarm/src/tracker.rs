//! The tracker is the rendezvous point of the network: peers tell it which
//! files they have, and ask it who has the files they want.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{future::join_all, SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    spawn,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::{
    client::{query_block_count, verify_files, DEFAULT_TIMEOUT},
    error::Error,
    registry::{PeerRecord, Registry},
    wire::{Holder, Reply, ReplyCodec, Request, RequestCodec},
};

/// Interval between two verifications of the files of every peer.
pub const VERIFY_INTERVAL: Duration = Duration::from_secs(2);

/// The port of the tracker, unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8000;

/// Accepts the requests of peers, and periodically checks that the files
/// each peer advertised are still the ones it has.
pub struct TrackerServer {
    listener: TcpListener,
    pub registry: Arc<Registry>,
    /// Bound of the reads of a request, and of every connection to a peer.
    pub timeout: Duration,
    pub verify_interval: Duration,
}

impl TrackerServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            timeout: DEFAULT_TIMEOUT,
            verify_interval: VERIFY_INTERVAL,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the verification loop and accept connections, forever.
    #[tracing::instrument(skip(self), name = "tracker::run")]
    pub async fn run(self) -> Result<(), Error> {
        info!("tracker is listening on: {}", self.listener.local_addr()?);

        let registry = self.registry.clone();
        let (verify_interval, limit) = (self.verify_interval, self.timeout);
        let verifier = spawn(async move {
            Self::verify_loop(registry, verify_interval, limit).await;
        });

        loop {
            let (socket, remote) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("could not accept a connection: {e}");
                    if verifier.is_finished() {
                        return Err(e.into());
                    }
                    continue;
                }
            };

            let registry = self.registry.clone();

            spawn(async move {
                if let Err(e) = Self::handle_connection(socket, registry, limit).await {
                    debug!("{remote} closing connection: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        socket: TcpStream,
        registry: Arc<Registry>,
        limit: Duration,
    ) -> Result<(), Error> {
        let mut framed = Framed::new(socket, RequestCodec);

        let request = match timeout(limit, framed.next()).await? {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                // the stream is already in an error state, but writing
                // is still possible.
                warn!("invalid request: {e}");
                let mut sink = framed.map_codec(|_| ReplyCodec);
                sink.send(Reply::NotRegistered).await?;
                return Err(e);
            }
            None => return Err(Error::PeerClosedSocket),
        };

        let reply = match Self::handle_request(request, &registry, limit).await {
            Some(reply) => reply,
            None => return Ok(()),
        };

        let mut sink = framed.map_codec(|_| ReplyCodec);
        sink.send(reply).await
    }

    /// The reply of each request, `None` for requests without one.
    async fn handle_request(
        request: Request,
        registry: &Registry,
        limit: Duration,
    ) -> Option<Reply> {
        match request {
            Request::Register { addr, peer_id, files } => {
                registry.register(PeerRecord::new(peer_id, addr, files)).await;
                Some(Reply::Registered)
            }
            Request::WhoHas(filename) => {
                let holders = Self::who_has(registry, &filename, limit).await;
                debug!("who_has {filename}: {holders:?}");
                Some(Reply::Holders(holders))
            }
            Request::NewFile { peer_id, filename } => {
                registry.new_file(&peer_id, &filename).await;
                Some(Reply::NewFileAdded)
            }
            Request::Disconnect(peer_id) => {
                registry.disconnect(&peer_id).await;
                None
            }
            other => {
                warn!("{other:?} is not a tracker request");
                Some(Reply::NotRegistered)
            }
        }
    }

    /// The holders of `filename`, with the block count each one reports
    /// right now. The peers are asked concurrently, and the ones that can't
    /// answer are left out.
    pub async fn who_has(registry: &Registry, filename: &str, limit: Duration) -> Vec<Holder> {
        let candidates = registry.who_has(filename).await;

        let counts = join_all(
            candidates
                .iter()
                .map(|(_, addr)| query_block_count(*addr, filename, limit)),
        )
        .await;

        candidates
            .into_iter()
            .zip(counts)
            .filter_map(|((peer_id, addr), count)| match count {
                Ok(n) => Some(Holder { addr, block_count: Some(n) }),
                Err(e) => {
                    warn!("peer {peer_id} at {addr} didn't report {filename}: {e}");
                    None
                }
            })
            .collect()
    }

    async fn verify_loop(registry: Arc<Registry>, every: Duration, limit: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            Self::verify_peers(&registry, limit).await;
        }
    }

    /// Ask every peer if the files the tracker has for it are the ones it
    /// really has, and replace them if not. Peers that don't answer are kept
    /// as they are.
    pub async fn verify_peers(registry: &Registry, limit: Duration) {
        let peers = registry.snapshot().await;

        let results = join_all(
            peers
                .iter()
                .map(|p| verify_files(p.addr, p.sorted_files(), limit)),
        )
        .await;

        for (peer, result) in peers.into_iter().zip(results) {
            match result {
                Ok(None) => {}
                Ok(Some(files)) => {
                    info!("peer {} updated its files: {files:?}", peer.peer_id);
                    registry.update_files(&peer, files).await;
                }
                Err(e) => debug!("could not verify peer {}: {e}", peer.peer_id),
            }
        }
    }
}
