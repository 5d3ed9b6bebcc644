use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    process::ExitCode,
    sync::Arc,
};

use blockswarm::{
    client::TrackerClient,
    config::Config,
    error::Error,
    library::Library,
    peer_id::PeerId,
    record::DownloadLog,
    server::PeerServer,
    swarm::{BlockCountChooser, Candidate, FixedCount, MostReported, SwarmDownloader},
    utils::{human_size, local_ip},
};
use clap::Parser;
use futures::future::join_all;
use tokio::{signal, spawn};
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

use args::Args;
mod args;

/// The `--block-count` flag, or the count most peers agree on.
enum Chooser {
    Fixed(FixedCount),
    Most(MostReported),
}

impl BlockCountChooser for Chooser {
    fn choose(&self, filename: &str, candidates: &[Candidate]) -> Option<u32> {
        match self {
            Chooser::Fixed(c) => c.choose(filename, candidates),
            Chooser::Most(c) => c.choose(filename, candidates),
        }
    }
}

/// Logs go to stdout, or to `--log-file`. The guard must live as long as the
/// program, the file writer stops when it is dropped.
fn init_logging(args: &Args) -> Option<WorkerGuard> {
    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder().with_max_level(level).without_time();

    let (result, guard) = match &args.log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = dir.map(|p| p.to_path_buf()).unwrap_or_else(|| ".".into());
            let name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "bsw.log".into());

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = builder.with_writer(writer).with_ansi(false).finish();
            (tracing::subscriber::set_global_default(subscriber), Some(guard))
        }
        None => (tracing::subscriber::set_global_default(builder.finish()), None),
    };

    if result.is_err() {
        eprintln!("setting default subscriber failed");
    }

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_logging(&args);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns false if a download failed.
async fn run(args: Args) -> Result<bool, Error> {
    let mut config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}, using the default configuration");
            Config::default()
        }
    };

    if let Some(tracker) = args.tracker {
        config.tracker_addr = tracker;
    }
    if let Some(secs) = args.timeout {
        config.timeout = secs;
    }
    if args.download_log.is_some() {
        config.download_log = args.download_log.clone();
    }

    let peer_id = args.peer_id.clone().map(PeerId::from).unwrap_or_else(PeerId::gen);
    let dir = args
        .files_dir
        .clone()
        .unwrap_or_else(|| config.peers_dir.join(peer_id.as_str()).join("files"));

    let library = Arc::new(Library::open(&dir).await?);

    let listen = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let server = PeerServer::bind(listen, library.clone())
        .await?
        .with_read_timeout(config.timeout());
    let port = server.local_addr()?.port();

    let server_handle = spawn(server.run());

    let ip = match args.ip {
        Some(ip) => ip,
        None => local_ip().await.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    };

    let tracker = TrackerClient::new(config.tracker_addr).with_timeout(config.timeout());
    tracker.register(ip, &peer_id, port, &library.names().await).await?;
    info!("peer {peer_id} registered at {ip}:{port}, sharing {dir:?}");

    let chooser = match args.block_count {
        Some(n) => Chooser::Fixed(FixedCount(n)),
        None => Chooser::Most(MostReported),
    };

    let mut downloader = SwarmDownloader::new(peer_id.clone(), tracker.clone(), library, chooser)
        .with_timeout(config.timeout());

    if let Some(path) = &config.download_log {
        downloader = downloader.with_log(Arc::new(DownloadLog::new(path)));
    }

    let results = join_all(args.get.iter().map(|name| downloader.download(name))).await;

    let mut all_ok = true;
    for (name, result) in args.get.iter().zip(results) {
        match result {
            Ok(report) => info!(
                "{name}: {} from {} peers in {:.2}s, written to {:?}",
                human_size(report.size),
                report.peer_count,
                report.elapsed.as_secs_f64(),
                report.path
            ),
            Err(e) => {
                error!("{name}: {e}");
                all_ok = false;
            }
        }
    }

    if args.seed || args.get.is_empty() {
        info!("seeding, press Ctrl-C to quit");
        tokio::select! {
            r = signal::ctrl_c() => r?,
            r = server_handle => {
                if let Ok(Err(e)) = r {
                    error!("peer server stopped: {e}");
                }
            }
        }
    }

    if let Err(e) = tracker.disconnect(&peer_id).await {
        warn!("could not disconnect from the tracker: {e}");
    }

    Ok(all_ok)
}
