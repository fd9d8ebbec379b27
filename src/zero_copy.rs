//! Thin wrappers over the Linux zero-copy syscalls.
//!
//! Every call takes an explicit file offset so the kernel never touches the
//! file cursor, and moves at most `count` bytes. `EAGAIN` on the socket side
//! surfaces as `ErrorKind::WouldBlock` for the caller's readiness loop.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// `sendfile(2)` from `file` at `offset` into the socket `out_fd`.
pub fn sendfile_at(out_fd: RawFd, file: &File, offset: u64, count: usize) -> io::Result<usize> {
    let mut off = offset as libc::off_t;
    loop {
        // SAFETY: both descriptors are live for the duration of the call and
        // `off` points to a valid off_t on our stack.
        let sent = unsafe { libc::sendfile(out_fd, file.as_raw_fd(), &mut off, count) };
        if sent >= 0 {
            return Ok(sent as usize);
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e);
        }
    }
}

/// Kernel pipe used as the staging area for socket→file splices.
pub struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors pipe2 writes.
        let r = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        if r < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }
}

/// Move up to `count` bytes from the socket `in_fd` into the pipe.
/// Returns 0 when the peer has closed the connection.
pub fn splice_socket_to_pipe(in_fd: RawFd, pipe: &Pipe, count: usize) -> io::Result<usize> {
    loop {
        // SAFETY: descriptors are open; null offsets are required for
        // sockets and pipes.
        let n = unsafe {
            libc::splice(
                in_fd,
                std::ptr::null_mut(),
                pipe.write.as_raw_fd(),
                std::ptr::null_mut(),
                count,
                libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let e = io::Error::last_os_error();
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e);
        }
    }
}

/// Drain exactly `count` bytes sitting in the pipe into `file` at `offset`.
pub fn splice_pipe_to_file(pipe: &Pipe, file: &File, offset: u64, count: usize) -> io::Result<()> {
    let mut off = offset as libc::loff_t;
    let mut left = count;
    while left > 0 {
        // SAFETY: descriptors are open and `off` is a valid loff_t.
        let n = unsafe {
            libc::splice(
                pipe.read.as_raw_fd(),
                std::ptr::null_mut(),
                file.as_raw_fd(),
                &mut off,
                left,
                libc::SPLICE_F_MOVE,
            )
        };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "pipe drained before chunk was written",
            ));
        }
        left -= n as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn sendfile_honours_offset_and_count() {
        let mut src = tempfile::tempfile().unwrap();
        src.write_all(b"0123456789").unwrap();
        let (tx, mut rx) = UnixStream::pair().unwrap();
        let n = sendfile_at(tx.as_raw_fd(), &src, 3, 4).unwrap();
        assert_eq!(n, 4);
        drop(tx);
        let mut got = Vec::new();
        rx.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"3456");
    }

    #[test]
    fn splice_round_trip_through_pipe() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(b"hello pipe").unwrap();
        let dst = tempfile::tempfile().unwrap();
        let pipe = Pipe::new().unwrap();
        let n = splice_socket_to_pipe(rx.as_raw_fd(), &pipe, 64).unwrap();
        assert_eq!(n, 10);
        splice_pipe_to_file(&pipe, &dst, 2, n).unwrap();
        let mut got = Vec::new();
        let mut f = dst;
        f.read_to_end(&mut got).unwrap();
        assert_eq!(&got[2..], b"hello pipe");
        assert_eq!(&got[..2], &[0, 0]);
    }
}
