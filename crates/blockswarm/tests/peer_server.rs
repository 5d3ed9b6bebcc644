mod common;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use blockswarm::{
    client::{query_block_count, verify_files, DEFAULT_TIMEOUT},
    library::Library,
    server::PeerServer,
    wire::{Frame, MetaHeader, TransferCodec, BLOCK_SIZE},
};
use bytes::BufMut;
use common::{content, temp_dir};
use futures::StreamExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    spawn,
    time::timeout,
};
use tokio_util::codec::FramedRead;

async fn serve(files: &[(&str, &[u8])]) -> (SocketAddr, std::path::PathBuf) {
    let dir = temp_dir();
    for (name, bytes) in files {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    let library = Arc::new(Library::open(&dir).await.unwrap());
    let server = PeerServer::bind("127.0.0.1:0".parse().unwrap(), library).await.unwrap();
    let addr = server.local_addr().unwrap();
    spawn(server.run());

    (addr, dir)
}

/// Send raw bytes, return every byte the server wrote before closing.
async fn raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request).await.unwrap();

    let mut reply = Vec::new();
    let _ = socket.read_to_end(&mut reply).await;
    reply
}

fn get_blocks(filename: &str, qty: u32, indices: &[u32]) -> Vec<u8> {
    let mut buf = format!("GET_BLOCKS {filename}\n").into_bytes();
    buf.put_u32(qty);
    for index in indices {
        buf.put_u32(*index);
    }
    buf
}

async fn frames(bytes: Vec<u8>) -> Vec<Frame> {
    FramedRead::new(&bytes[..], TransferCodec::default())
        .map(|frame| frame.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn get_blocks_in_request_order() {
    let data = content(10_000);
    let (addr, dir) = serve(&[("report.pdf", &data[..])]).await;

    let reply = raw(addr, &get_blocks("report.pdf", 2, &[2, 0])).await;
    let frames = frames(reply).await;

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], Frame::Meta(MetaHeader { total_blocks: 3, total_size: 10_000 }));
    match (&frames[1], &frames[2]) {
        (Frame::Block(last), Frame::Block(first)) => {
            assert_eq!(last.index, 2);
            assert_eq!(&last.data[..], &data[2 * BLOCK_SIZE..]);
            assert_eq!(first.index, 0);
            assert_eq!(&first.data[..], &data[..BLOCK_SIZE]);
        }
        other => panic!("expected 2 blocks, got {other:?}"),
    }

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn get_sends_every_block() {
    let data = content(3 * BLOCK_SIZE + 1);
    let (addr, dir) = serve(&[("a.bin", &data[..])]).await;

    let frames = frames(raw(addr, b"GET a.bin\n").await).await;
    assert_eq!(frames.len(), 5);

    let mut bytes = Vec::new();
    for (i, frame) in frames[1..].iter().enumerate() {
        let Frame::Block(block) = frame else { panic!("expected a block") };
        assert_eq!(block.index as usize, i);
        bytes.extend_from_slice(&block.data);
    }
    assert_eq!(bytes, data);

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn absent_index_stops_the_transfer() {
    let data = content(10_000);
    let (addr, dir) = serve(&[("report.pdf", &data[..])]).await;

    let frames = frames(raw(addr, &get_blocks("report.pdf", 3, &[1, 7, 2])).await).await;

    // meta, then block 1, then nothing
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[1], Frame::Block(b) if b.index == 1));

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn oversized_qty_is_rejected() {
    let data = content(100);
    let (addr, dir) = serve(&[("report.pdf", &data[..])]).await;

    let reply = raw(addr, &get_blocks("report.pdf", 1_000_000, &[])).await;
    assert!(reply.is_empty());

    // the server is still serving
    assert_eq!(query_block_count(addr, "report.pdf", DEFAULT_TIMEOUT).await.unwrap(), 1);

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn unknown_requests_get_no_answer() {
    let (addr, dir) = serve(&[]).await;

    assert!(raw(addr, b"GET nothing.bin\n").await.is_empty());
    assert!(raw(addr, b"BLOCK_COUNT nothing.bin\n").await.is_empty());
    assert!(raw(addr, b"WHO_HAS x.txt\n").await.is_empty());
    assert!(raw(addr, b"DANCE\n").await.is_empty());

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn block_count_and_verify() {
    let data = content(2 * BLOCK_SIZE);
    let (addr, dir) = serve(&[("a.bin", &data[..]), ("b.txt", &b"b"[..])]).await;

    assert_eq!(raw(addr, b"BLOCK_COUNT a.bin\n").await, b"OK 2\n");
    // an unterminated line is accepted once the client is done writing
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(b"BLOCK_COUNT b.txt").await.unwrap();
    socket.shutdown().await.unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"OK 1\n");

    let files = vec!["a.bin".to_owned(), "b.txt".to_owned()];
    assert_eq!(verify_files(addr, files, DEFAULT_TIMEOUT).await.unwrap(), None);

    assert_eq!(raw(addr, b"VERIFY_FILES b.txt,a.bin\n").await, b"FILES_OK");

    std::fs::remove_file(dir.join("b.txt")).unwrap();
    std::fs::write(dir.join("c.txt"), b"c").unwrap();

    let files = vec!["a.bin".to_owned(), "b.txt".to_owned()];
    assert_eq!(
        verify_files(addr, files, DEFAULT_TIMEOUT).await.unwrap(),
        Some(vec!["a.bin".to_owned(), "c.txt".to_owned()])
    );
    assert_eq!(raw(addr, b"VERIFY_FILES a.bin\n").await, b"New files list: a.bin,c.txt");

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn unterminated_request_is_answered() {
    let data = content(100);
    let (addr, dir) = serve(&[("a.bin", &data[..])]).await;

    // no `\n` and no shutdown of the write half
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(b"BLOCK_COUNT a.bin").await.unwrap();

    let mut reply = Vec::new();
    timeout(Duration::from_secs(1), socket.read_to_end(&mut reply))
        .await
        .expect("the server waited for a line terminator")
        .unwrap();
    assert_eq!(reply, b"OK 1\n");

    // GET_BLOCKS still needs its terminator and indices
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(b"GET_BLOCKS a.bin").await.unwrap();
    let mut reply = Vec::new();
    let waited = timeout(Duration::from_millis(300), socket.read_to_end(&mut reply)).await;
    assert!(waited.is_err());
    assert!(reply.is_empty());

    std::fs::remove_dir_all(dir).unwrap();
}
