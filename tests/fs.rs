use std::sync::Arc;

use uring::buf::fixed::FixedBufPool;
use uring::fs::Filesystem;
use uring::{Queue, Ring};

fn start_queue(entries: u32) -> Arc<Queue> {
    let ring = Arc::new(Ring::new(entries).unwrap());
    Arc::new(Queue::start(ring))
}

#[test]
fn open_write_read_sync_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data");
    let fs = Filesystem::new(start_queue(16));

    let file = fs
        .open(&path, libc::O_CREAT | libc::O_RDWR, 0o644)
        .unwrap();

    assert_eq!(file.write_at(b"the quick brown fox", 0).unwrap(), 19);
    assert_eq!(file.write_at(b"lazy dog", 4).unwrap(), 8);
    file.sync_all().unwrap();

    let mut buf = [0u8; 19];
    assert_eq!(file.read_at(&mut buf, 0).unwrap(), 19);
    assert_eq!(&buf, b"the lazy dogown fox");

    // Zero-length transfers never reach the ring.
    assert_eq!(file.write_at(b"", 0).unwrap(), 0);
    assert_eq!(file.read_at(&mut [], 0).unwrap(), 0);

    file.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"the lazy dogown fox");
}

#[test]
fn open_missing_file_fails_with_enoent() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Filesystem::new(start_queue(8));

    let err = fs
        .open(dir.path().join("absent"), libc::O_RDONLY, 0)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn registered_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let queue = start_queue(16);
    let fs = Filesystem::with_registered_files(queue, 2).unwrap();

    // More files than the initial table forces one growth underneath;
    // the facade should not notice.
    let files: Vec<_> = (0..3)
        .map(|i| {
            fs.open(
                dir.path().join(format!("f{i}")),
                libc::O_CREAT | libc::O_RDWR,
                0o600,
            )
            .unwrap()
        })
        .collect();

    for (i, file) in files.iter().enumerate() {
        let payload = format!("payload {i}");
        assert_eq!(
            file.write_at(payload.as_bytes(), 0).unwrap(),
            payload.len()
        );
    }
    for (i, file) in files.iter().enumerate() {
        let mut buf = vec![0u8; 9];
        assert_eq!(file.read_at(&mut buf, 0).unwrap(), 9);
        assert_eq!(buf, format!("payload {i}").into_bytes());
    }

    for file in files {
        file.close().unwrap();
    }
}

#[test]
fn fixed_buffer_file_io() {
    let dir = tempfile::tempdir().unwrap();
    let queue = start_queue(16);
    let pool = FixedBufPool::new(queue.ring_handle(), 32, 4).unwrap();
    let fs = Filesystem::new(queue);

    let file = fs
        .open(dir.path().join("fixed"), libc::O_CREAT | libc::O_RDWR, 0o600)
        .unwrap();

    let mut buf = pool.get();
    buf[..11].copy_from_slice(&b"via the arena"[..11]);
    assert_eq!(file.write_at_fixed(&buf, 0).unwrap(), 32);
    drop(buf);

    let mut buf = pool.get();
    assert_eq!(file.read_at_fixed(&mut buf, 0).unwrap(), 32);
    assert_eq!(&buf[..11], b"via the are");

    file.close().unwrap();
}
