use std::io::{Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use tempfile::NamedTempFile;

use uring::fd::FixedFiles;
use uring::{opcode, squeue::Flags, Ring};

#[test]
fn grow_preserves_slots() {
    let ring = Arc::new(Ring::new(8).unwrap());
    let table = FixedFiles::new(ring.clone(), 2).unwrap();

    let files: Vec<NamedTempFile> = (0..5).map(|_| NamedTempFile::new().unwrap()).collect();

    let mut slots = Vec::new();
    for file in &files {
        slots.push(table.register(file.as_file().as_raw_fd()).unwrap());
    }

    // Dense assignment through two doublings: 2 -> 4 -> 8.
    assert_eq!(slots, [0, 1, 2, 3, 4]);
    assert_eq!(table.capacity(), 8);

    // The first registration still routes to the first file: write
    // through slot 0 and observe the bytes in files[0].
    let payload = b"slot zero";
    let iovec = [libc::iovec {
        iov_base: payload.as_ptr() as *mut _,
        iov_len: payload.len(),
    }];
    let sqe = ring.get_sqe().unwrap();
    opcode::writev(sqe, slots[0] as i32, &iovec, 0, 0);
    sqe.set_flags(Flags::FIXED_FILE);
    ring.submit(1).unwrap();

    let cqe = ring.get_cqe(1).unwrap();
    assert_eq!(cqe.result(), payload.len() as i32, "{:?}", cqe.io_result());

    let mut written = String::new();
    let mut reader = files[0].as_file().try_clone().unwrap();
    reader.seek(SeekFrom::Start(0)).unwrap();
    reader.read_to_string(&mut written).unwrap();
    assert_eq!(written.as_bytes(), payload);
}

#[test]
fn unregistered_slot_is_reused() {
    let ring = Arc::new(Ring::new(4).unwrap());
    let table = FixedFiles::new(ring, 4).unwrap();

    let a = NamedTempFile::new().unwrap();
    let b = NamedTempFile::new().unwrap();
    let c = NamedTempFile::new().unwrap();

    assert_eq!(table.register(a.as_file().as_raw_fd()).unwrap(), 0);
    assert_eq!(table.register(b.as_file().as_raw_fd()).unwrap(), 1);

    table.unregister(0).unwrap();
    // First free slot wins.
    assert_eq!(table.register(c.as_file().as_raw_fd()).unwrap(), 0);
    assert_eq!(table.capacity(), 4);
}
