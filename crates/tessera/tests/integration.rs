use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rand::{distributions::Alphanumeric, Rng};
use tessera::{
    config::ResolvedConfig,
    directory::{DirectoryClient, DirectoryServer, Request},
    error::Error,
    metainfo::{InfoHash, MetaInfo},
    peer::{self, PeerId},
    tcp_wire::{Handshake, HANDSHAKE_LEN},
    torrent::{Torrent, TorrentCtx, TorrentMsg},
    tracker::{Announce, Tracker},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    spawn,
    sync::oneshot,
    time::{sleep, timeout},
};

fn temp_dir() -> PathBuf {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    std::env::temp_dir().join(format!("tessera-it-{name}"))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Write `files` under `root` and return their content.
fn write_files(root: &Path, files: &[(&str, usize)]) -> Vec<Vec<u8>> {
    files
        .iter()
        .map(|(path, len)| {
            let path = root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let data = random_bytes(*len);
            std::fs::write(&path, &data).unwrap();
            data
        })
        .collect()
}

async fn wait_complete(torrent: &Arc<TorrentCtx>) {
    timeout(Duration::from_secs(30), async {
        while !torrent.scheduler.is_complete().await {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("the download did not complete in time");
}

// A seeder and a leecher in the same process, the leecher is told the
// address of the seeder and must end up with identical files.
#[tokio::test]
async fn seeder_to_leecher() {
    let seed_dir = temp_dir();
    let leech_dir = temp_dir();

    let files = [("share/a.bin", 70_000), ("share/sub/b.bin", 30_000), ("share/c.bin", 5)];
    let data = write_files(&seed_dir, &files);

    let meta = MetaInfo::from_path(seed_dir.join("share"), String::new(), 32 * 1024)
        .await
        .unwrap();
    assert_eq!(meta.info.pieces(), 4);

    let mut seeder = Torrent::new(
        meta.clone(),
        Arc::new(ResolvedConfig::with_download_dir(&seed_dir)),
    )
    .await
    .unwrap();
    assert!(seeder.ctx.scheduler.is_complete().await);

    let mut leecher =
        Torrent::new(meta, Arc::new(ResolvedConfig::with_download_dir(&leech_dir)))
            .await
            .unwrap();
    assert!(!leecher.ctx.scheduler.is_complete().await);

    let seeder_listener = seeder.listen().await.unwrap();
    let seeder_addr = seeder_listener.local_addr().unwrap();
    let seeder_tx = seeder.tx();
    let seeder_handle = spawn(async move { seeder.run(seeder_listener).await });

    let leecher_ctx = leecher.ctx.clone();
    let leecher_tx = leecher.tx();
    let leecher_listener = leecher.listen().await.unwrap();
    let leecher_handle = spawn(async move { leecher.run(leecher_listener).await });

    leecher_tx.send(TorrentMsg::AddPeers(vec![seeder_addr])).await.unwrap();

    wait_complete(&leecher_ctx).await;

    for ((path, _), expected) in files.iter().zip(&data) {
        let downloaded = tokio::fs::read(leech_dir.join(path)).await.unwrap();
        assert_eq!(&downloaded, expected, "{path}");
    }

    let stats = leecher_ctx.scheduler.stats().await;
    assert_eq!(stats.left, 0);
    assert_eq!(stats.downloaded, 100_005);

    // the progress survives a restart
    let progress = tokio::fs::read(
        leech_dir.join(format!(".{}.progress", leecher_ctx.info_hash)),
    )
    .await
    .unwrap();
    assert_eq!(progress, vec![1, 1, 1, 1]);

    leecher_tx.send(TorrentMsg::Quit).await.unwrap();
    seeder_tx.send(TorrentMsg::Quit).await.unwrap();
    leecher_handle.await.unwrap().unwrap();
    seeder_handle.await.unwrap().unwrap();

    let _ = std::fs::remove_dir_all(seed_dir);
    let _ = std::fs::remove_dir_all(leech_dir);
}

// The remote answers our handshake with another info hash, the connection
// must be dropped without any message sent after our handshake.
#[tokio::test]
async fn outbound_handshake_mismatch() {
    let dir = temp_dir();
    write_files(&dir, &[("f.bin", 1000)]);
    let meta = MetaInfo::from_path(dir.join("f.bin"), String::new(), 512).await.unwrap();

    let torrent = Torrent::new(meta, Arc::new(ResolvedConfig::with_download_dir(&dir)))
        .await
        .unwrap();

    let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake_addr = fake.local_addr().unwrap();

    let fake_handle = spawn(async move {
        let (mut socket, _) = fake.accept().await.unwrap();

        let mut theirs = [0u8; HANDSHAKE_LEN];
        socket.read_exact(&mut theirs).await.unwrap();

        let wrong = Handshake::new(InfoHash([9; 20]), PeerId([1; 20]));
        socket.write_all(&wrong.serialize().unwrap()).await.unwrap();

        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();

        (Handshake::deserialize(&theirs).unwrap(), rest)
    });

    let r = peer::connect_and_run(torrent.ctx.clone(), fake_addr).await;
    assert!(matches!(r, Err(Error::InfoHashMismatch)));

    let (theirs, rest) = fake_handle.await.unwrap();
    assert_eq!(theirs.info_hash, torrent.ctx.info_hash);
    assert_eq!(theirs.reserved, [0u8; 8]);
    assert!(rest.is_empty(), "sent {} bytes after the handshake", rest.len());

    let _ = std::fs::remove_dir_all(dir);
}

// A remote connects to us with the wrong info hash, we must close the
// connection without sending our handshake.
#[tokio::test]
async fn inbound_handshake_mismatch() {
    let dir = temp_dir();
    write_files(&dir, &[("f.bin", 1000)]);
    let meta = MetaInfo::from_path(dir.join("f.bin"), String::new(), 512).await.unwrap();

    let mut torrent = Torrent::new(meta, Arc::new(ResolvedConfig::with_download_dir(&dir)))
        .await
        .unwrap();
    let listener = torrent.listen().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let tx = torrent.tx();
    let handle = spawn(async move { torrent.run(listener).await });

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let wrong = Handshake::new(InfoHash([9; 20]), PeerId([1; 20]));
    socket.write_all(&wrong.serialize().unwrap()).await.unwrap();

    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), socket.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    tx.send(TorrentMsg::Quit).await.unwrap();
    handle.await.unwrap().unwrap();

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn directory_round_trip() {
    let server = DirectoryServer::bind("127.0.0.1:0", 900).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let client = DirectoryClient::new(addr.to_string());
    let info_hash = InfoHash([4; 20]);

    client
        .upload(&Request::Upload {
            file_name: "notes.txt".into(),
            info_hash,
            file_size: 1234,
            peer_id: PeerId([1; 20]),
            port: 7001,
        })
        .await
        .unwrap();

    let files = client.list().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "notes.txt");
    assert_eq!(files[0].info_hash, info_hash);
    assert_eq!(files[0].file_size, 1234);
    assert_eq!(files[0].peers, 1);

    let tracker = Tracker::new(&format!("tcp://{addr}")).unwrap();
    let res = tracker
        .announce(&Announce {
            info_hash,
            peer_id: PeerId([2; 20]),
            port: 7002,
            uploaded: 0,
            downloaded: 0,
            left: 1234,
            event: None,
        })
        .await
        .unwrap();

    assert_eq!(res.interval, 900);
    assert_eq!(res.peers, vec!["127.0.0.1:7001".parse::<SocketAddr>().unwrap()]);

    // a malformed request gets an error reply
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(b"d6:action6:delete").await.unwrap();
    socket.write_all(b"e").await.unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).await.unwrap();
    assert!(reply.starts_with(b"d5:error"));

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

// Peers find each other through a directory server.
#[tokio::test]
async fn download_through_directory() {
    let server = DirectoryServer::bind("127.0.0.1:0", 60).await.unwrap();
    let directory = server.local_addr().unwrap();
    let registry = server.registry();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_handle = spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let seed_dir = temp_dir();
    let leech_dir = temp_dir();
    let data = write_files(&seed_dir, &[("movie.bin", 200_000)]);

    let meta = MetaInfo::from_path(
        seed_dir.join("movie.bin"),
        format!("tcp://{directory}"),
        64 * 1024,
    )
    .await
    .unwrap();
    let info_hash = meta.info.info_hash;

    let mut seeder = Torrent::new(
        meta.clone(),
        Arc::new(ResolvedConfig::with_download_dir(&seed_dir)),
    )
    .await
    .unwrap();
    let seeder_tx = seeder.tx();
    let listener = seeder.listen().await.unwrap();
    let seeder_handle = spawn(async move { seeder.run(listener).await });

    // the seeder announces on start
    timeout(Duration::from_secs(5), async {
        while registry.read().await.peers(&info_hash).is_empty() {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    let mut leecher = Torrent::new(meta, Arc::new(ResolvedConfig::with_download_dir(&leech_dir)))
        .await
        .unwrap();
    let leecher_ctx = leecher.ctx.clone();
    let leecher_tx = leecher.tx();
    let listener = leecher.listen().await.unwrap();
    let leecher_handle = spawn(async move { leecher.run(listener).await });

    wait_complete(&leecher_ctx).await;

    let downloaded = tokio::fs::read(leech_dir.join("movie.bin")).await.unwrap();
    assert_eq!(downloaded, data[0]);

    leecher_tx.send(TorrentMsg::Quit).await.unwrap();
    seeder_tx.send(TorrentMsg::Quit).await.unwrap();
    leecher_handle.await.unwrap().unwrap();
    seeder_handle.await.unwrap().unwrap();
    stop_tx.send(()).unwrap();
    server_handle.await.unwrap().unwrap();

    let _ = std::fs::remove_dir_all(seed_dir);
    let _ = std::fs::remove_dir_all(leech_dir);
}
