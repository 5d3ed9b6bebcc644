#![allow(dead_code)]
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use blockswarm::{
    client::TrackerClient,
    library::Library,
    peer_id::PeerId,
    registry::Registry,
    server::PeerServer,
    tracker::TrackerServer,
};
use rand::{distributions::Alphanumeric, Rng};
use tokio::spawn;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Show the logs of the library in the output of a failed test.
pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .without_time()
        .try_init();
}

/// A new, empty directory under the system temp dir.
pub fn temp_dir() -> PathBuf {
    let mut rng = rand::thread_rng();
    let name: String = (0..20).map(|_| rng.sample(Alphanumeric) as char).collect();
    let dir = std::env::temp_dir().join(format!("blockswarm-it-{name}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Bytes that differ from one block to the next.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

/// Run a tracker on a random port.
pub async fn tracker(verify_interval: Duration) -> (SocketAddr, Arc<Registry>) {
    let mut tracker = TrackerServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    tracker.verify_interval = verify_interval;
    tracker.timeout = Duration::from_secs(2);

    let addr = tracker.local_addr().unwrap();
    let registry = tracker.registry.clone();
    spawn(tracker.run());

    (addr, registry)
}

pub struct TestPeer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub library: Arc<Library>,
    pub tracker: TrackerClient,
}

/// Run a peer on a random port, sharing `files`, and register it.
pub async fn peer(root: &Path, id: &str, tracker: SocketAddr, files: &[(&str, &[u8])]) -> TestPeer {
    let dir = root.join(id).join("files");
    std::fs::create_dir_all(&dir).unwrap();
    for (name, bytes) in files {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    let library = Arc::new(Library::open(&dir).await.unwrap());
    let server = PeerServer::bind("127.0.0.1:0".parse().unwrap(), library.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    spawn(server.run());

    let id = PeerId::from(id);
    let tracker = TrackerClient::new(tracker).with_timeout(Duration::from_secs(2));
    tracker
        .register(LOCALHOST, &id, addr.port(), &library.names().await)
        .await
        .unwrap();

    TestPeer { id, addr, library, tracker }
}
