use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use torrent_fetch::{
    BitTorrentClient, DownloadConfig, Peer, announce, generate_peer_id, parse_torrent_file,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Download a single-file torrent from its peers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The .torrent file to download.
    #[arg(short, long)]
    file: PathBuf,

    /// Where to write the downloaded file. Defaults to the torrent's name.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Port reported to the tracker.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Download from this peer instead of asking the tracker. Repeatable.
    #[arg(long = "peer", value_name = "IP:PORT")]
    peers: Vec<SocketAddrV4>,

    /// Give up after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds allowed for one piece before it is handed to another peer.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    piece_timeout: u64,

    /// More output; repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// File name for the torrent's advertised name, stripped of any directories.
fn output_name(name: &str) -> PathBuf {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '\\' { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        PathBuf::from("download")
    } else {
        PathBuf::from(cleaned)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let meta = parse_torrent_file(&args.file)?;
    info!(
        name = %meta.name,
        length = meta.length,
        pieces = meta.pieces.len(),
        "loaded torrent"
    );

    let peer_id = generate_peer_id();
    let peers: Vec<Peer> = if args.peers.is_empty() {
        announce(&meta, &peer_id, args.port).await?.peers
    } else {
        args.peers.iter().copied().map(Peer::from).collect()
    };

    let output = args.output.unwrap_or_else(|| output_name(&meta.name));
    let torrent = meta.into_torrent(peer_id, peers)?;
    let config = DownloadConfig {
        piece_timeout: Duration::from_secs(args.piece_timeout),
        download_timeout: args.timeout.map(Duration::from_secs),
        ..DownloadConfig::default()
    };

    let data = BitTorrentClient::new(torrent, config).download().await?;
    tokio::fs::write(&output, &data).await?;
    info!(path = %output.display(), bytes = data.len(), "saved");

    Ok(())
}
