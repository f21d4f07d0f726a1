//! End-to-end transfers against the simulated node over an in-memory link.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skyftp_link::{DEFAULT_MTU, MemoryConnector};
use skyftp_protocol::{Backend, EntryKind, Status};
use skyftp_sim::node::DEFAULT_MEMORY_BASE;
use skyftp_sim::{RemoteNode, spawn_memory};
use skyftp_transfer::status::status_report;
use skyftp_transfer::{
    ChunkGeometry, ChunkMap, ClientConfig, FtpClient, ProgressReport, TransferError,
    TransferRequest, checksum_bytes, map_path,
};
use tempfile::TempDir;

struct Fixture {
    remote: TempDir,
    local: TempDir,
    node: RemoteNode,
    client: FtpClient<MemoryConnector>,
}

impl Fixture {
    fn new() -> Self {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let node = RemoteNode::new(remote.path());
        let connector = spawn_memory(node.clone(), DEFAULT_MTU);
        let config = ClientConfig::default().with_timeout(Duration::from_secs(5));
        Self {
            remote,
            local,
            node,
            client: FtpClient::new(connector, config),
        }
    }

    fn local(&self, name: &str) -> std::path::PathBuf {
        self.local.path().join(name)
    }

    fn remote(&self, name: &str) -> std::path::PathBuf {
        self.remote.path().join(name)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn upload_1000_bytes_in_175_byte_chunks() {
    let fx = Fixture::new();
    let data = pattern(1000);
    std::fs::write(fx.local("image.bin"), &data).unwrap();

    let summary = fx
        .client
        .upload_file(fx.local("image.bin"), "/image.bin", Backend::FILE, 175)
        .await
        .unwrap();

    assert_eq!(summary.chunk_count, 6);
    assert_eq!(summary.file_size, 1000);
    assert_eq!(summary.crc32, checksum_bytes(&data));
    assert_eq!(summary.rounds, 1);

    // Five full chunks and a 125 byte tail.
    let geometry = ChunkGeometry::new(1000, 175).unwrap();
    assert_eq!(geometry.last_chunk_size(), 125);
    assert_eq!(geometry.chunk_offset(5), 875);
    let remote = read(&fx.remote("image.bin"));
    assert_eq!(remote[875..], data[875..]);
    assert_eq!(remote, data);
    assert_eq!(fx.node.pending_uploads().await, 0);
}

#[tokio::test]
async fn interrupted_download_resumes_from_chunk_map() {
    let fx = Fixture::new();
    let data = pattern(1000);
    std::fs::write(fx.remote("image.bin"), &data).unwrap();
    let local = fx.local("image.bin");

    fx.node.drop_next_transfer_after(3).await;
    let err = fx
        .client
        .download_file("/image.bin", &local, Backend::FILE, 175)
        .await
        .unwrap_err();
    assert!(err.is_resumable(), "{err}");

    // Exactly the first three chunks are on disk and recorded.
    assert_eq!(read(&map_path(&local)), b"+++---");
    assert_eq!(&read(&local)[..525], &data[..525]);
    let map = ChunkMap::open_or_create(&local, 6).unwrap();
    assert_eq!(status_report(&map).complete, 3);
    drop(map);

    let summary = fx
        .client
        .download_file("/image.bin", &local, Backend::FILE, 175)
        .await
        .unwrap();
    assert_eq!(summary.resumed_chunks, 3);
    assert_eq!(summary.rounds, 1);
    assert_eq!(read(&local), data);
    assert!(!map_path(&local).exists());
}

#[tokio::test]
async fn resume_never_rewrites_delivered_chunks() {
    let fx = Fixture::new();
    let data = pattern(1000);
    std::fs::write(fx.remote("image.bin"), &data).unwrap();

    // Chunks 0..3 are recorded as delivered but hold bytes the node never
    // sent. Only a download that skips them keeps the marker bytes.
    let local = fx.local("image.bin");
    let mut partial = vec![0xA5u8; 525];
    partial.resize(1000, 0);
    std::fs::write(&local, &partial).unwrap();
    std::fs::write(map_path(&local), b"+++---").unwrap();

    let err = fx
        .client
        .download_file("/image.bin", &local, Backend::FILE, 175)
        .await
        .unwrap_err();
    assert!(!err.is_resumable());
    match err {
        TransferError::ChecksumMismatch { local, remote } => {
            assert_eq!(remote, checksum_bytes(&data));
            assert_ne!(local, remote);
        }
        other => panic!("expected checksum mismatch, got {other}"),
    }

    let on_disk = read(&local);
    assert!(on_disk[..525].iter().all(|&b| b == 0xA5));
    assert_eq!(on_disk[525..], data[525..]);
    assert_eq!(read(&map_path(&local)), b"++++++");
}

#[tokio::test]
async fn interrupted_upload_resumes_on_the_node() {
    let fx = Fixture::new();
    let data = pattern(1000);
    std::fs::write(fx.local("image.bin"), &data).unwrap();

    fx.node.drop_next_transfer_after(2).await;
    let err = fx
        .client
        .upload_file(fx.local("image.bin"), "/image.bin", Backend::FILE, 175)
        .await
        .unwrap_err();
    assert!(err.is_resumable(), "{err}");
    assert_eq!(fx.node.pending_uploads().await, 1);

    let summary = fx
        .client
        .upload_file(fx.local("image.bin"), "/image.bin", Backend::FILE, 175)
        .await
        .unwrap();
    assert_eq!(summary.rounds, 1);
    assert_eq!(read(&fx.remote("image.bin")), data);
    assert_eq!(fx.node.pending_uploads().await, 0);
}

#[tokio::test]
async fn empty_file_travels_as_one_empty_chunk() {
    let fx = Fixture::new();
    std::fs::write(fx.local("empty.bin"), b"").unwrap();

    let up = fx
        .client
        .upload_file(fx.local("empty.bin"), "/empty.bin", Backend::FILE, 175)
        .await
        .unwrap();
    assert_eq!(up.chunk_count, 1);
    assert_eq!(up.crc32, 0);
    assert!(read(&fx.remote("empty.bin")).is_empty());

    let down = fx
        .client
        .download_file("/empty.bin", fx.local("copy.bin"), Backend::FILE, 175)
        .await
        .unwrap();
    assert_eq!(down.chunk_count, 1);
    assert_eq!(down.crc32, 0);
    assert!(read(&fx.local("copy.bin")).is_empty());
}

#[tokio::test]
async fn checksum_holds_for_any_chunk_size() {
    let fx = Fixture::new();
    let data = pattern(200);
    std::fs::write(fx.local("src.bin"), &data).unwrap();
    let expected = checksum_bytes(&data);

    for chunk_size in [1u16, 7, 200, 201] {
        let remote = format!("/c{chunk_size}.bin");
        let up = fx
            .client
            .upload_file(fx.local("src.bin"), &remote, Backend::FILE, chunk_size)
            .await
            .unwrap();
        assert_eq!(up.crc32, expected, "upload, chunk size {chunk_size}");

        let local = fx.local(&format!("back{chunk_size}.bin"));
        let down = fx
            .client
            .download_file(&remote, &local, Backend::FILE, chunk_size)
            .await
            .unwrap();
        assert_eq!(down.crc32, expected, "download, chunk size {chunk_size}");
        assert_eq!(read(&local), data);
    }
}

#[tokio::test]
async fn scattered_gaps_need_several_rounds() {
    let fx = Fixture::new();
    let data = pattern(160);
    std::fs::write(fx.remote("gaps.bin"), &data).unwrap();

    // Every even chunk of 4 bytes is already here: 20 gaps, more than one
    // status message can name.
    let local = fx.local("gaps.bin");
    let mut partial = vec![0u8; 160];
    let mut map = Vec::new();
    for chunk in 0..40 {
        if chunk % 2 == 0 {
            partial[chunk * 4..chunk * 4 + 4].copy_from_slice(&data[chunk * 4..chunk * 4 + 4]);
            map.push(b'+');
        } else {
            map.push(b'-');
        }
    }
    std::fs::write(&local, &partial).unwrap();
    std::fs::write(map_path(&local), &map).unwrap();

    let summary = fx
        .client
        .download_file("/gaps.bin", &local, Backend::FILE, 4)
        .await
        .unwrap();
    assert_eq!(summary.resumed_chunks, 20);
    assert_eq!(summary.rounds, 2);
    assert_eq!(read(&local), data);
}

#[tokio::test]
async fn existing_local_file_is_not_overwritten() {
    let fx = Fixture::new();
    std::fs::write(fx.remote("a.bin"), b"remote").unwrap();
    std::fs::write(fx.local("a.bin"), b"precious").unwrap();

    let err = fx
        .client
        .download_file("/a.bin", fx.local("a.bin"), Backend::FILE, 175)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::AlreadyExists(_)));
    assert!(!err.is_resumable());
    assert_eq!(read(&fx.local("a.bin")), b"precious");
}

#[tokio::test]
async fn missing_remote_file() {
    let fx = Fixture::new();
    let err = fx
        .client
        .download_file("/nope.bin", fx.local("nope.bin"), Backend::FILE, 175)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Remote {
            status: Status::NotFound,
            ..
        }
    ));
    assert!(!fx.local("nope.bin").exists());
    assert!(!map_path(&fx.local("nope.bin")).exists());
}

#[tokio::test]
async fn memory_round_trip() {
    let fx = Fixture::new();
    let data = pattern(700);
    std::fs::write(fx.local("blob.bin"), &data).unwrap();
    let addr = DEFAULT_MEMORY_BASE + 0x100;

    fx.client
        .upload_memory(fx.local("blob.bin"), addr, 175)
        .await
        .unwrap();
    assert_eq!(fx.node.read_memory(addr, 700).await.unwrap(), data);

    let summary = fx
        .client
        .download_memory(addr, 700, fx.local("dump.bin"), 175)
        .await
        .unwrap();
    assert_eq!(summary.chunk_count, 4);
    assert_eq!(read(&fx.local("dump.bin")), data);
}

#[tokio::test]
async fn progress_reaches_the_final_chunk() {
    let fx = Fixture::new();
    std::fs::write(fx.remote("p.bin"), pattern(1000)).unwrap();

    let reports: Arc<Mutex<Vec<ProgressReport>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let req = TransferRequest::file(fx.local("p.bin"), "/p.bin", Backend::FILE, 175);
    fx.client
        .download(
            &req,
            Some(Box::new(move |r: &ProgressReport| {
                sink.lock().unwrap().push(r.clone())
            })),
        )
        .await
        .unwrap();

    let reports = reports.lock().unwrap();
    let last = reports.last().unwrap();
    assert!(last.final_chunk);
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.chunk_count, 6);
}

#[tokio::test]
async fn file_management() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.remote("flash")).unwrap();
    std::fs::write(fx.remote("flash/a.txt"), b"hello").unwrap();

    fx.client
        .copy_file("/flash/a.txt", "/flash/b.txt", Backend::FAT)
        .await
        .unwrap();
    fx.client
        .move_file("/flash/a.txt", "/flash/c.txt", Backend::FAT)
        .await
        .unwrap();

    let entries = fx.client.list("/flash", Backend::FAT).await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(names, ["b.txt", "c.txt"]);
    assert!(entries.iter().all(|e| e.kind == EntryKind::File && e.size == 5));

    fx.client.remove("/flash/b.txt", Backend::FAT).await.unwrap();
    let err = fx
        .client
        .remove("/flash/b.txt", Backend::FAT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Remote {
            op: "remove",
            status: Status::NotFound
        }
    ));

    fx.client.mkfs("/flash", Backend::FAT, true).await.unwrap();
    assert!(fx.client.list("/flash", Backend::FAT).await.unwrap().is_empty());

    let err = fx
        .client
        .zip("/flash/c.txt", "/flash/c.z", Backend::FAT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Remote {
            status: Status::NotSupported,
            ..
        }
    ));
}
