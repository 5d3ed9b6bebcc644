//! Client side of the text requests: everything a peer asks the tracker, and
//! what the tracker asks peers.
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use futures::SinkExt;
use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::{
    error::Error,
    peer_id::PeerId,
    wire::{Holder, Reply, Request, RequestCodec},
};

/// Bound of every connect and read on an outbound connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound of a text reply.
const MAX_REPLY_LEN: u64 = 1024 * 1024;

/// Open a connection, bounded by `limit`.
pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, Error> {
    let socket = timeout(limit, TcpStream::connect(addr)).await??;
    Ok(socket)
}

/// Send one request and read the text reply, until the server closes the
/// connection.
pub async fn exchange(
    addr: SocketAddr,
    request: Request,
    limit: Duration,
) -> Result<String, Error> {
    let socket = connect(addr, limit).await?;
    let mut framed = FramedWrite::new(socket, RequestCodec);
    timeout(limit, framed.send(request)).await??;

    let mut reply = Vec::new();
    let socket = framed.get_mut();
    timeout(limit, socket.take(MAX_REPLY_LEN).read_to_end(&mut reply)).await??;

    Ok(String::from_utf8(reply)?)
}

/// Ask a peer how many blocks it has of `filename`.
pub async fn query_block_count(
    addr: SocketAddr,
    filename: &str,
    limit: Duration,
) -> Result<u32, Error> {
    let reply = exchange(addr, Request::BlockCount(filename.to_owned()), limit).await?;
    Reply::parse_block_count(&reply)
}

/// Ask a peer to compare `files` with the files it really has.
/// Returns `None` if they match, or the real list.
pub async fn verify_files(
    addr: SocketAddr,
    files: Vec<String>,
    limit: Duration,
) -> Result<Option<Vec<String>>, Error> {
    let reply = exchange(addr, Request::VerifyFiles(files), limit).await?;
    Reply::parse_verify(&reply)
}

/// Requests that a peer sends to the tracker.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    pub addr: SocketAddr,
    pub timeout: Duration,
}

impl TrackerClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Announce the local peer and the files it shares.
    pub async fn register(
        &self,
        ip: IpAddr,
        peer_id: &PeerId,
        port: u16,
        files: &[String],
    ) -> Result<(), Error> {
        let request = Request::Register {
            addr: SocketAddr::new(ip, port),
            peer_id: peer_id.clone(),
            files: files.to_vec(),
        };
        let reply = exchange(self.addr, request, self.timeout).await?;
        debug!("tracker response: {reply}");

        match Reply::parse_register(&reply)? {
            Reply::Registered => Ok(()),
            _ => Err(Error::NotRegistered),
        }
    }

    /// Peers that have `filename`, with the block count each one reported.
    pub async fn who_has(&self, filename: &str) -> Result<Vec<Holder>, Error> {
        let reply =
            exchange(self.addr, Request::WhoHas(filename.to_owned()), self.timeout).await?;
        Reply::parse_holders(&reply)
    }

    /// Tell the tracker the local peer now has `filename`.
    /// Returns the acknowledgement text of the tracker.
    pub async fn new_file(&self, peer_id: &PeerId, filename: &str) -> Result<String, Error> {
        let request = Request::NewFile {
            peer_id: peer_id.clone(),
            filename: filename.to_owned(),
        };
        let reply = exchange(self.addr, request, self.timeout).await?;
        debug!("tracker response: {reply}");
        Ok(reply)
    }

    pub async fn disconnect(&self, peer_id: &PeerId) -> Result<(), Error> {
        exchange(self.addr, Request::Disconnect(peer_id.clone()), self.timeout).await?;
        Ok(())
    }
}
