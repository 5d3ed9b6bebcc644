use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[clap(name = "Blockswarm Peer")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Id sent to the tracker, random if not given.
    #[clap(short, long)]
    pub peer_id: Option<String>,

    /// Port where other peers download blocks from this peer.
    #[clap(short = 'P', long, default_value_t = 0)]
    pub port: u16,

    /// IP announced to the tracker, the address of the default route if not
    /// given.
    #[clap(long)]
    pub ip: Option<IpAddr>,

    /// Address of the tracker.
    #[clap(short, long)]
    pub tracker: Option<SocketAddr>,

    /// Directory of the shared files, `<peers_dir>/<peer id>/files` if not
    /// given.
    #[clap(short, long)]
    pub files_dir: Option<PathBuf>,

    /// Download a file from the swarm, can be repeated.
    #[clap(short, long = "get")]
    pub get: Vec<String>,

    /// Block count to use when the peers of a file disagree, the count
    /// reported by the most peers if not given.
    #[clap(short, long)]
    pub block_count: Option<u32>,

    /// Keep serving files after the downloads, until Ctrl-C.
    #[clap(short, long)]
    pub seed: bool,

    /// Seconds before a connection to another peer is abandoned.
    #[clap(long)]
    pub timeout: Option<u64>,

    /// CSV file where completed downloads are recorded.
    #[clap(long)]
    pub download_log: Option<PathBuf>,

    /// Write the logs to this file instead of stdout.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Increase the verbosity, can be repeated.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
