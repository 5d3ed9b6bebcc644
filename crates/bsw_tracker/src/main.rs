use std::{net::SocketAddr, process::ExitCode};

use blockswarm::{config::Config, tracker::TrackerServer};
use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug, Default)]
#[clap(name = "Blockswarm Tracker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The tracker will accept TCP connections on this address.
    #[clap(short, long)]
    listen: Option<SocketAddr>,

    /// Seconds between two verifications of the files of every peer.
    #[clap(long)]
    verify_interval: Option<u64>,

    /// Seconds before a connection to a peer is abandoned.
    #[clap(short, long)]
    timeout: Option<u64>,

    /// Increase the verbosity, can be repeated.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("setting default subscriber failed");
    }

    let mut config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            error!("{e}, using the default configuration");
            Config::default()
        }
    };

    if let Some(listen) = args.listen {
        config.tracker_listen = listen;
    }
    if let Some(secs) = args.verify_interval {
        config.verify_interval = secs;
    }
    if let Some(secs) = args.timeout {
        config.timeout = secs;
    }

    let mut tracker = match TrackerServer::bind(config.tracker_listen).await {
        Ok(tracker) => tracker,
        Err(e) => {
            error!("could not listen on {}: {e}", config.tracker_listen);
            return ExitCode::FAILURE;
        }
    };
    tracker.verify_interval = config.verify_interval();
    tracker.timeout = config.timeout();

    match tracker.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
