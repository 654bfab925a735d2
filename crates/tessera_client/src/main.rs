use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tessera::{
    config::Config,
    directory::{DirectoryClient, Request},
    error::Error,
    logging,
    metainfo::MetaInfo,
    peer::PeerId,
    torrent::{Torrent, TorrentMsg},
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tessera", author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the files of a .torrent, then keep seeding them
    Download {
        /// Path of the .torrent file
        torrent: PathBuf,
    },
    /// Create a .torrent file from a file or directory
    Create {
        path: PathBuf,

        /// Tracker url: http://, https:// or tcp://host:port
        #[arg(short, long, default_value = "")]
        announce: String,

        /// Bytes per piece
        #[arg(short, long, default_value_t = 256 * 1024)]
        piece_length: u64,

        /// Where to write the .torrent, defaults to `<name>.torrent`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Register a torrent on a directory server
    Publish {
        /// Path of the .torrent file
        torrent: PathBuf,

        /// host:port of the directory server
        directory: String,

        /// Port we seed on, defaults to the port of `listen`
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the files registered on a directory server
    List {
        /// host:port of the directory server
        directory: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    let config = Config::load(args.config).await?;

    let log_dir = if config.log { Some(Config::log_dir()?) } else { None };
    let _guard = logging::init(config.log_level, log_dir.as_deref())?;

    match args.command {
        Command::Download { torrent } => {
            let meta = MetaInfo::from_file(&torrent).await?;
            info!("{} ({} bytes) {}", meta.info.name, meta.info.total_size(), meta.info.info_hash);

            let mut torrent = Torrent::new(meta, Arc::new(config)).await?;
            let listener = torrent.listen().await?;
            let tx = torrent.tx();

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(TorrentMsg::Quit).await;
                }
            });

            torrent.run(listener).await?;
        }
        Command::Create { path, announce, piece_length, output } => {
            let meta = MetaInfo::from_path(&path, announce, piece_length).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.torrent", meta.info.name)));

            tokio::fs::write(&output, meta.to_bencode()).await?;

            println!("{} {}", meta.info.info_hash, output.display());
        }
        Command::Publish { torrent, directory, port } => {
            let meta = MetaInfo::from_file(&torrent).await?;
            let client = DirectoryClient::new(directory);

            let request = Request::Upload {
                file_name: meta.info.name.clone(),
                info_hash: meta.info.info_hash,
                file_size: meta.info.total_size(),
                peer_id: PeerId::generate(),
                port: port.unwrap_or(config.listen.port()),
            };

            if let Err(e) = client.upload(&request).await {
                error!("could not publish {}: {e}", meta.info.name);
                return Err(e);
            }
            println!("published {} {}", meta.info.name, meta.info.info_hash);
        }
        Command::List { directory } => {
            let client = DirectoryClient::new(directory);

            for file in client.list().await? {
                println!(
                    "{} {:>14} bytes {:>4} peers  {}",
                    hex::encode(file.info_hash.0),
                    file.file_size,
                    file.peers,
                    file.file_name
                );
            }
        }
    }

    Ok(())
}
