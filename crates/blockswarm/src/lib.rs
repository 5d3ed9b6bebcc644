//! A library for a small block-based peer-to-peer file swarm.
//!
//! The network has two roles. A single [`tracker`] keeps, in memory, which
//! peer shares which files. Every peer runs a [`server`] that serves the
//! blocks of its local files, and uses the [`swarm`] downloader to fetch a
//! missing file from every peer that has it, in parallel, each source sending
//! a disjoint set of blocks.
//!
//! Files are split into blocks of [`wire::BLOCK_SIZE`] bytes, see [`block`].
//! All the messages exchanged on the network are documented at [`wire`].
//!
//! # Example
//!
//! Download a file from the swarm and share it afterwards:
//!
//! ```no_run
//! # async fn run() -> Result<(), blockswarm::error::Error> {
//! use std::sync::Arc;
//! use blockswarm::{
//!     client::TrackerClient,
//!     library::Library,
//!     peer_id::PeerId,
//!     server::PeerServer,
//!     swarm::{MostReported, SwarmDownloader},
//! };
//!
//! let library = Arc::new(Library::open("alice/files").await?);
//! let server = PeerServer::bind("0.0.0.0:9001".parse().unwrap(), library.clone()).await?;
//! tokio::spawn(server.run());
//!
//! let tracker = TrackerClient::new("127.0.0.1:8000".parse().unwrap());
//! let peer_id = PeerId::from("alice");
//! tracker
//!     .register("127.0.0.1".parse().unwrap(), &peer_id, 9001, &library.names().await)
//!     .await?;
//!
//! let downloader = SwarmDownloader::new(peer_id, tracker, library, MostReported);
//! let report = downloader.download("report.pdf").await?;
//! println!("{} bytes from {} peers", report.size, report.peer_count);
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod client;
pub mod config;
pub mod error;
pub mod library;
pub mod peer_id;
pub mod record;
pub mod registry;
pub mod server;
pub mod swarm;
pub mod tracker;
pub mod utils;
pub mod wire;
