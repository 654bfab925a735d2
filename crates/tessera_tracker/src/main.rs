use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use tessera::{
    directory::{DirectoryServer, DEFAULT_INTERVAL},
    error::Error,
    logging,
};
use tracing::Level;

/// Directory server that keeps the files shared and their peers.
#[derive(Parser, Debug)]
#[command(name = "tessera-tracker", author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 6969)]
    port: u16,

    /// Seconds between announces asked of the peers
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL)]
    interval: u64,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    let _guard = logging::init(args.log_level, None)?;

    let server = DirectoryServer::bind(SocketAddr::new(args.host, args.port), args.interval).await?;

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
