//! Command-line entry point: load a torrent file, announce to its tracker,
//! and run the peer wire-protocol loop. Piece storage is out of scope, so
//! there is no `--output` flag here — this is a networking client, not yet
//! a downloader.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rs_torrent_client::bencode;
use rs_torrent_client::driver::TorrentDriver;
use rs_torrent_client::torrent::file::TorrentFile;
use rs_torrent_client::tracker::generate_peer_id;

#[derive(Parser, Debug)]
#[command(name = "rstc", about = "Minimal BitTorrent v1 peer-wire client")]
struct Cli {
    /// Path to the `.torrent` file to load.
    torrent: PathBuf,

    /// TCP port to advertise to trackers and peers.
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Number of peers to request per announce.
    #[arg(short, long, default_value_t = 50)]
    numwant: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let bytes = std::fs::read(&cli.torrent)
        .with_context(|| format!("reading torrent file {}", cli.torrent.display()))?;
    let value = bencode::decode(&bytes).context("decoding torrent file as bencode")?;
    let torrent = TorrentFile::parse(value).context("parsing torrent metainfo")?;

    tracing::info!(
        name = %torrent.info.name,
        info_hash = %hex::encode(torrent.info_hash),
        pieces = torrent.num_pieces(),
        "loaded torrent"
    );

    let peer_id = generate_peer_id();
    let mut driver = TorrentDriver::new(torrent, peer_id, cli.port, cli.numwant);
    driver.start().await.context("initial tracker announce failed")?;

    tokio::select! {
        _ = driver.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    driver.stop().await;
    Ok(())
}
