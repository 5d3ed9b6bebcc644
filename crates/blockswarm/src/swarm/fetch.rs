//! Fetching the blocks assigned to one peer.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{sync::Mutex, time::timeout};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::{
    client::connect,
    error::Error,
    wire::{Frame, Request, RequestCodec, TransferCodec},
};

use super::plan::Assignment;

/// Blocks received so far, shared by every fetch of one download.
pub type SharedBlocks = Arc<Mutex<BTreeMap<u32, Bytes>>>;

/// Ask `assignment.addr` for its blocks and merge them into `blocks` as they
/// arrive. Returns how many blocks the peer sent.
///
/// The blocks received before an error stay in `blocks`.
pub async fn fetch_assignment(
    filename: String,
    block_count: u32,
    assignment: Assignment,
    blocks: SharedBlocks,
    limit: Duration,
) -> Result<usize, Error> {
    let Assignment { addr, indices } = assignment;
    let expected = indices.len();

    let socket = connect(addr, limit).await?;
    let mut framed = Framed::new(socket, RequestCodec);

    debug!("> get_blocks {filename} {expected} blocks to {addr}");
    let request = Request::GetBlocks { filename: filename.clone(), indices: indices.clone() };
    timeout(limit, framed.send(request)).await??;

    let mut framed = framed.map_codec(|_| TransferCodec::default());

    match timeout(limit, framed.next()).await? {
        Some(Ok(Frame::Meta(meta))) => {
            if meta.total_blocks != block_count {
                warn!(
                    "{addr} has {} blocks of {filename}, expected {block_count}",
                    meta.total_blocks
                );
            }
        }
        Some(Ok(Frame::Block(_))) => {
            return Err(Error::Protocol("block before the meta header".to_owned()))
        }
        Some(Err(e)) => return Err(e),
        None => return Err(Error::PeerClosedSocket),
    }

    let mut received = 0;

    while received < expected {
        let block = match timeout(limit, framed.next()).await? {
            Some(Ok(Frame::Block(block))) => block,
            Some(Ok(Frame::Meta(_))) => {
                return Err(Error::Protocol("second meta header".to_owned()))
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::PeerClosedSocket),
        };

        if indices.binary_search(&block.index).is_err() {
            return Err(Error::Protocol(format!(
                "{addr} sent block {} which was not requested",
                block.index
            )));
        }

        received += 1;

        let mut map = blocks.lock().await;
        if map.contains_key(&block.index) {
            warn!("block {} of {filename} received twice, keeping the first", block.index);
            continue;
        }
        map.insert(block.index, block.data);
    }

    debug!("< {received} blocks of {filename} from {addr}");

    Ok(received)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::BytesMut;
    use tokio::{io::AsyncWriteExt, net::TcpListener};
    use tokio_util::codec::Encoder;

    use super::*;
    use crate::wire::{Block, MetaHeader};

    /// A peer that reads one request, then writes `frames` and closes.
    async fn serve_once(frames: Vec<Frame>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, RequestCodec);
            let request = framed.next().await.unwrap().unwrap();
            assert!(matches!(request, Request::GetBlocks { .. }));
            let mut socket = framed.into_inner();

            let mut buf = BytesMut::new();
            let mut codec = TransferCodec::default();
            for frame in frames {
                codec.encode(frame, &mut buf).unwrap();
            }
            socket.write_all(&buf).await.unwrap();
        });

        addr
    }

    #[tokio::test]
    async fn first_block_wins() {
        let meta = Frame::Meta(MetaHeader { total_blocks: 3, total_size: 9 });
        let addr = serve_once(vec![
            meta,
            Frame::Block(Block::new(0, &b"new"[..])),
            Frame::Block(Block::new(2, &b"ccc"[..])),
        ])
        .await;

        let blocks: SharedBlocks = Arc::default();
        blocks.lock().await.insert(0, Bytes::from_static(b"old"));

        let assignment = Assignment { addr, indices: vec![0, 2] };
        let received = fetch_assignment("f".into(), 3, assignment, blocks.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(received, 2);
        let blocks = blocks.lock().await;
        assert_eq!(blocks[&0], Bytes::from_static(b"old"));
        assert_eq!(blocks[&2], Bytes::from_static(b"ccc"));
    }

    #[tokio::test]
    async fn partial_answer_keeps_what_arrived() {
        let meta = Frame::Meta(MetaHeader { total_blocks: 4, total_size: 4 });
        let addr = serve_once(vec![meta, Frame::Block(Block::new(1, &b"b"[..]))]).await;

        let blocks: SharedBlocks = Arc::default();
        let assignment = Assignment { addr, indices: vec![1, 3] };
        let r = fetch_assignment("f".into(), 4, assignment, blocks.clone(), Duration::from_secs(5)).await;

        assert!(matches!(r, Err(Error::PeerClosedSocket)));
        assert_eq!(blocks.lock().await.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn unrequested_block_is_refused() {
        let meta = Frame::Meta(MetaHeader { total_blocks: 4, total_size: 4 });
        let addr = serve_once(vec![meta, Frame::Block(Block::new(2, &b"c"[..]))]).await;

        let blocks: SharedBlocks = Arc::default();
        let assignment = Assignment { addr, indices: vec![1] };
        let r = fetch_assignment("f".into(), 4, assignment, blocks.clone(), Duration::from_secs(5)).await;

        assert!(matches!(r, Err(Error::Protocol(_))));
        assert!(blocks.lock().await.is_empty());
    }
}
