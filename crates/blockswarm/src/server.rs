//! The server of a peer, it serves the blocks of the local files to other
//! peers, and answers the tracker's questions about them.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use hashbrown::HashSet;
use tokio::{
    net::{TcpListener, TcpStream},
    spawn,
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::{
    block::BlockStore,
    error::Error,
    library::Library,
    wire::{Block, Frame, MetaHeader, Reply, ReplyCodec, Request, RequestCodec, TransferCodec},
};

/// How long a client has to send its whole request.
pub const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts connections of other peers and of the tracker.
///
/// Every connection carries one request. On any error, including an unknown
/// file or a block index that doesn't exist, the connection is closed without
/// an explanation, and the server keeps accepting new connections.
pub struct PeerServer {
    listener: TcpListener,
    library: Arc<Library>,
    read_timeout: Duration,
}

impl PeerServer {
    pub async fn bind(addr: SocketAddr, library: Arc<Library>) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, library, read_timeout: SERVER_READ_TIMEOUT })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    #[tracing::instrument(skip(self), name = "peer_server::run")]
    pub async fn run(self) -> Result<(), Error> {
        info!("peer is listening on: {}", self.listener.local_addr()?);

        loop {
            let (socket, remote) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("could not accept a connection: {e}");
                    continue;
                }
            };

            let library = self.library.clone();
            let read_timeout = self.read_timeout;

            spawn(async move {
                if let Err(e) = Self::handle_connection(socket, library, read_timeout).await {
                    debug!("{remote} closing connection: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        socket: TcpStream,
        library: Arc<Library>,
        read_timeout: Duration,
    ) -> Result<(), Error> {
        let mut framed = Framed::new(socket, RequestCodec);

        let request = timeout(read_timeout, framed.next())
            .await?
            .ok_or(Error::PeerClosedSocket)??;

        match request {
            Request::GetBlocks { filename, indices } => {
                debug!("< get_blocks {filename} {} blocks", indices.len());
                let store = Self::store(&library, filename).await?;
                let mut sink = framed.map_codec(|_| TransferCodec::default());
                Self::send_blocks(&mut sink, &store, indices.into_iter()).await
            }
            Request::Get(filename) => {
                debug!("< get {filename}");
                let store = Self::store(&library, filename).await?;
                let mut sink = framed.map_codec(|_| TransferCodec::default());
                let indices: Vec<u32> = store.ordered_blocks().map(|b| b.index).collect();
                Self::send_blocks(&mut sink, &store, indices.into_iter()).await
            }
            Request::VerifyFiles(requested) => {
                debug!("< verify_files {requested:?}");
                let actual = library.rescan().await?;

                let requested: HashSet<String> = requested.into_iter().collect();
                let same = requested.len() == actual.len()
                    && actual.iter().all(|name| requested.contains(name));

                let reply = if same { Reply::FilesOk } else { Reply::NewFilesList(actual) };
                framed.map_codec(|_| ReplyCodec).send(reply).await
            }
            Request::BlockCount(filename) => {
                debug!("< block_count {filename}");
                let store = Self::store(&library, filename).await?;
                framed
                    .map_codec(|_| ReplyCodec)
                    .send(Reply::BlockCount(store.block_count()))
                    .await
            }
            other => Err(Error::Protocol(format!("{other:?} is not a peer request"))),
        }
    }

    async fn store(library: &Library, filename: String) -> Result<Arc<BlockStore>, Error> {
        library.get(&filename).await.ok_or(Error::FileNotFound(filename))
    }

    /// Send the meta header, then the blocks in the given order.
    ///
    /// Stops at the first index the store doesn't have, the blocks before it
    /// are still delivered.
    async fn send_blocks(
        sink: &mut Framed<TcpStream, TransferCodec>,
        store: &BlockStore,
        indices: impl Iterator<Item = u32>,
    ) -> Result<(), Error> {
        let total_size = u32::try_from(store.size())
            .map_err(|_| Error::Protocol(format!("{} is too large", store.name())))?;

        sink.feed(Frame::Meta(MetaHeader {
            total_blocks: store.block_count(),
            total_size,
        }))
        .await?;

        let mut sent = 0;
        for index in indices {
            let block: Block = match store.get_block(index) {
                Ok(block) => block,
                Err(e) => {
                    sink.flush().await?;
                    return Err(e);
                }
            };
            sink.feed(Frame::Block(block)).await?;
            sent += 1;
        }

        sink.flush().await?;
        debug!("> {sent} blocks of {}", store.name());

        Ok(())
    }
}
