use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use rand::RngCore;
use tempfile::NamedTempFile;

use uring::{opcode, squeue::Flags, Builder, Ring};

fn iovec_for(buf: &[u8]) -> libc::iovec {
    libc::iovec {
        iov_base: buf.as_ptr() as *mut _,
        iov_len: buf.len(),
    }
}

#[test]
fn writev_round_trip() {
    let mut file = NamedTempFile::new().unwrap();
    let fd = file.as_file().as_raw_fd();
    let ring = Ring::new(4).unwrap();

    let mut offset = 0u64;
    for _ in 0..10 {
        let mut bufs = [[0u8; 8]; 4];
        for buf in &mut bufs {
            rand::thread_rng().fill_bytes(buf);
        }
        let iovecs: Vec<libc::iovec> = bufs.iter().map(|b| iovec_for(b)).collect();

        for (i, iov) in iovecs.iter().enumerate() {
            let sqe = ring.get_sqe().unwrap();
            opcode::writev(sqe, fd, std::slice::from_ref(iov), offset, 0);
            sqe.set_user_data(i as u64);
            offset += 8;
        }

        let submitted = ring.submit(4).unwrap();
        assert_eq!(submitted, 4);

        for _ in 0..4 {
            let cqe = ring.get_cqe(0).unwrap();
            assert_eq!(cqe.result(), 8, "writev failed: {:?}", cqe.io_result());
        }

        let mut out = [0u8; 8];
        for buf in &bufs {
            file.as_file_mut().read_exact(&mut out).unwrap();
            assert_eq!(&out, buf);
        }
    }
}

#[test]
fn readv_round_trip() {
    let mut file = NamedTempFile::new().unwrap();
    let fd = file.as_file().as_raw_fd();
    let ring = Ring::new(4).unwrap();

    let mut data = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut data);
    file.write_all(&data).unwrap();

    let mut bufs = [[0u8; 8]; 3];
    let iovecs: Vec<libc::iovec> = bufs.iter_mut().map(|b| iovec_for(b)).collect();

    for (i, iov) in iovecs.iter().enumerate() {
        let sqe = ring.get_sqe().unwrap();
        opcode::readv(sqe, fd, std::slice::from_ref(iov), i as u64 * 8, 0);
        sqe.set_user_data(i as u64);
    }

    assert_eq!(ring.submit(3).unwrap(), 3);

    // Completions of independent reads may arrive in any order.
    for _ in 0..3 {
        let cqe = ring.get_cqe(0).unwrap();
        assert_eq!(cqe.result(), 8, "readv failed: {:?}", cqe.io_result());
        let i = cqe.user_data() as usize;
        assert_eq!(bufs[i], data[i * 8..(i + 1) * 8]);
    }
}

#[test]
fn linked_copy() {
    let mut from = NamedTempFile::new().unwrap();
    let to = NamedTempFile::new().unwrap();
    let ring = Ring::new(4).unwrap();

    let mut data = vec![0u8; 4096];
    rand::thread_rng().fill_bytes(&mut data);
    from.write_all(&data).unwrap();

    let mut buf = [0u8; 32];
    let iovec = [libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut _,
        iov_len: buf.len(),
    }];

    let mut offset = 0u64;
    loop {
        let read = ring.get_sqe().unwrap();
        opcode::readv(read, from.as_file().as_raw_fd(), &iovec, offset, 0);
        read.set_flags(Flags::IO_LINK);
        read.set_user_data(1);

        let write = ring.get_sqe().unwrap();
        opcode::writev(write, to.as_file().as_raw_fd(), &iovec, offset, 0);
        write.set_user_data(2);

        ring.submit(2).unwrap();

        let rcqe = ring.get_cqe(0).unwrap();
        assert_eq!(rcqe.user_data(), 1);
        assert!(rcqe.result() >= 0, "read failed: {:?}", rcqe.io_result());

        if rcqe.result() == 0 {
            // EOF breaks the link; the chained write is canceled and
            // still posts its own completion.
            let wcqe = ring.get_cqe(1).unwrap();
            assert_eq!(wcqe.user_data(), 2);
            assert_eq!(wcqe.result(), -libc::ECANCELED);
            break;
        }

        let wcqe = ring.get_cqe(1).unwrap();
        assert_eq!(wcqe.user_data(), 2);
        assert_eq!(wcqe.result(), rcqe.result(), "{:?}", wcqe.io_result());

        offset += 32;
    }

    let mut copied = Vec::new();
    to.as_file()
        .try_clone()
        .unwrap()
        .read_to_end(&mut copied)
        .unwrap();
    assert_eq!(copied, data);
}

#[test]
fn sqe_reuse_does_not_leak_user_data() {
    let ring = Ring::new(2).unwrap();

    for _ in 0..10 {
        for i in 1..=2u64 {
            let sqe = ring.get_sqe().unwrap();
            assert_eq!(sqe.user_data(), 0, "entry handed out dirty");
            opcode::nop(sqe);
            sqe.set_user_data(i);
        }
        assert_eq!(ring.submit(2).unwrap(), 2);

        for i in 1..=2u64 {
            let cqe = ring.get_cqe(0).unwrap();
            assert_eq!(cqe.user_data(), i);
        }
    }
}

#[test]
fn queue_full_reported() {
    let ring = Ring::new(2).unwrap();
    for _ in 0..2 {
        let sqe = ring.get_sqe().unwrap();
        opcode::nop(sqe);
    }
    let err = ring.get_sqe().unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn get_cqe_would_block_when_empty() {
    let ring = Ring::new(2).unwrap();
    let err = ring.get_cqe(0).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn resubmit_before_reaping() {
    let n = 64u64;
    let ring = Ring::new(n as u32).unwrap();

    // The CQ is twice the SQ by default, so two full batches fit without
    // reaping in between.
    for _ in 0..2 {
        for i in 1..=n {
            let sqe = ring.get_sqe().unwrap();
            opcode::nop(sqe);
            sqe.set_user_data(i);
        }
        ring.submit(0).unwrap();
    }

    for _ in 0..2 {
        for i in 1..=n {
            let cqe = ring.get_cqe(1).unwrap();
            assert_eq!(cqe.user_data(), i);
        }
    }
}

#[test]
fn kernel_poll_completes_without_enter() {
    // Unprivileged SQPOLL needs a 5.11+ kernel; skip where setup refuses.
    let ring = match Builder::new().kernel_poll(2_000).build(4) {
        Ok(ring) => ring,
        Err(err) => {
            eprintln!("skipping kernel-poll test: {err}");
            return;
        }
    };

    let sqe = ring.get_sqe().unwrap();
    opcode::nop(sqe);
    sqe.set_user_data(7);
    ring.submit(0).unwrap();

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        match ring.get_cqe(0) {
            Ok(cqe) => {
                assert_eq!(cqe.user_data(), 7);
                return;
            }
            Err(_) => std::thread::yield_now(),
        }
    }
    panic!("kernel-poll thread never picked up the nop");
}

#[test]
fn register_buffers_read_write_fixed() {
    let file = NamedTempFile::new().unwrap();
    let fd = file.as_file().as_raw_fd();
    let ring = Ring::new(32).unwrap();

    let data = b"ping".to_vec();
    let mut resp = vec![0u8; data.len()];
    let iovecs = [iovec_for(&data), iovec_for(&resp)];
    ring.register_buffers(&iovecs).unwrap();

    let sqe = ring.get_sqe().unwrap();
    opcode::write_fixed(sqe, fd, data.as_ptr(), data.len() as u32, 0, 0);
    ring.submit(1).unwrap();
    let cqe = ring.get_cqe(1).unwrap();
    assert_eq!(cqe.result(), data.len() as i32, "{:?}", cqe.io_result());

    let mut out = vec![0u8; data.len()];
    let mut reader = file.as_file().try_clone().unwrap();
    reader.seek(SeekFrom::Start(0)).unwrap();
    reader.read_exact(&mut out).unwrap();
    assert_eq!(out, data);

    {
        use std::os::unix::fs::FileExt;
        file.as_file().write_all_at(b"pong", 0).unwrap();
    }

    let sqe = ring.get_sqe().unwrap();
    opcode::read_fixed(sqe, fd, resp.as_mut_ptr(), resp.len() as u32, 0, 1);
    ring.submit(1).unwrap();
    let cqe = ring.get_cqe(1).unwrap();
    assert_eq!(cqe.result(), resp.len() as i32, "{:?}", cqe.io_result());
    assert_eq!(&resp, b"pong");

    ring.unregister_buffers().unwrap();
}

#[test]
fn timeout_fires() {
    let ring = Ring::new(2).unwrap();
    let ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 50_000_000,
    };

    let sqe = ring.get_sqe().unwrap();
    opcode::timeout(sqe, &ts, false, 0);
    sqe.set_user_data(1);

    let start = Instant::now();
    ring.submit(1).unwrap();
    let cqe = ring.get_cqe(1).unwrap();

    assert_eq!(cqe.user_data(), 1);
    assert_eq!(cqe.result(), -libc::ETIME);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn async_cancel_stops_a_timeout() {
    let ring = Ring::new(4).unwrap();
    let ts = libc::timespec {
        tv_sec: 10,
        tv_nsec: 0,
    };

    let sqe = ring.get_sqe().unwrap();
    opcode::timeout(sqe, &ts, false, 0);
    sqe.set_user_data(1);
    ring.submit(0).unwrap();

    let sqe = ring.get_sqe().unwrap();
    opcode::async_cancel(sqe, 1);
    sqe.set_user_data(2);
    ring.submit(2).unwrap();

    for _ in 0..2 {
        let cqe = ring.get_cqe(1).unwrap();
        match cqe.user_data() {
            1 => assert_eq!(cqe.result(), -libc::ECANCELED),
            2 => assert_eq!(cqe.result(), 0, "{:?}", cqe.io_result()),
            other => panic!("unexpected completion tag {other}"),
        }
    }
}

#[test]
fn mkdirat_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("made-by-the-ring");
    let cpath = {
        use std::os::unix::ffi::OsStrExt;
        std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap()
    };

    let ring = Ring::new(2).unwrap();
    let sqe = ring.get_sqe().unwrap();
    opcode::mkdirat(sqe, libc::AT_FDCWD, &cpath, 0o755);
    ring.submit(1).unwrap();

    let cqe = ring.get_cqe(1).unwrap();
    assert_eq!(cqe.result(), 0, "{:?}", cqe.io_result());
    assert!(path.is_dir());
}
