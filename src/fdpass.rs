//! # File-descriptor inheritance across process replacement.
//!
//! The successor must own exactly the same kernel endpoints as the
//! predecessor: the accept sockets and every established client socket.
//! This module covers both directions:
//!
//! - **Predecessor**: duplicate each endpoint into an [`OwnedFd`] whose
//!   lifetime is independent of the original listener/stream object,
//!   collect them in order in [`InheritedFds`], and spawn the successor
//!   with each descriptor `dup2`'d to its recorded index.
//! - **Successor**: wrap the descriptor found at a recorded index back into
//!   a bound [`std::net::TcpListener`] or connected [`std::net::TcpStream`].
//!
//! ## Close-on-exec discipline
//! - Descriptors held in [`InheritedFds`] keep `FD_CLOEXEC` **set** so they
//!   never leak through unrelated spawns (the build toolchain runs while
//!   they are held).
//! - The handles actually passed to the successor are the `dup2` targets
//!   created inside `pre_exec`; `dup2` clears `FD_CLOEXEC` on the target,
//!   so exactly the intended indices survive the exec and everything else
//!   closes.
//! - The originals are never closed before exec: listeners keep accepting
//!   until the instant of replacement.
//!
//! ## Index layout
//! Indices start at [`FIRST_INHERITED_FD`] (stdio owns 0–2): listeners in
//! sorted-name order, then connections in gather order.

use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::dup;

use crate::config::RECOVERY_ENV_VAR;
use crate::snapshot::FIRST_INHERITED_FD;

/// Duplicates an endpoint's descriptor.
///
/// The duplicate refers to the same kernel socket but its lifetime is
/// independent of the original object: dropping the original listener or
/// stream does not invalidate the duplicate.
pub fn duplicate<F: AsFd>(fd: F) -> io::Result<OwnedFd> {
    let raw = dup(fd.as_fd().as_raw_fd()).map_err(io::Error::from)?;
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Sets or clears `FD_CLOEXEC` on a descriptor.
pub fn set_cloexec<F: AsFd>(fd: F, enabled: bool) -> io::Result<()> {
    let current =
        fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_GETFD).map_err(io::Error::from)?;
    let mut flags = FdFlag::from_bits_truncate(current);
    flags.set(FdFlag::FD_CLOEXEC, enabled);
    fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_SETFD(flags)).map_err(io::Error::from)?;
    Ok(())
}

/// Reads the `FD_CLOEXEC` flag.
pub fn is_cloexec<F: AsFd>(fd: F) -> io::Result<bool> {
    let current =
        fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_GETFD).map_err(io::Error::from)?;
    Ok(FdFlag::from_bits_truncate(current).contains(FdFlag::FD_CLOEXEC))
}

/// Duplicates a descriptor to the lowest free number at or above `min`,
/// with `FD_CLOEXEC` set.
fn dup_at_least<F: AsFd>(fd: F, min: RawFd) -> io::Result<OwnedFd> {
    let raw = fcntl(fd.as_fd().as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(min))
        .map_err(io::Error::from)?;
    // fcntl returned a fresh descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// The ordered list of descriptors to hand to the successor.
///
/// Owned exclusively by the coordinator while a copyover is in flight;
/// dropping the list closes every held duplicate, which is exactly the
/// release required when exec does not occur.
#[derive(Default)]
pub struct InheritedFds {
    files: Vec<OwnedFd>,
}

impl InheritedFds {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a duplicate and returns the index the successor will find
    /// it at. Marks the held descriptor close-on-exec so it cannot leak
    /// through unrelated spawns while the copyover is in flight.
    pub fn push(&mut self, fd: OwnedFd) -> io::Result<i32> {
        set_cloexec(&fd, true)?;
        let index = self.next_index();
        self.files.push(fd);
        Ok(index)
    }

    /// Index the next pushed descriptor will receive.
    pub fn next_index(&self) -> i32 {
        FIRST_INHERITED_FD + self.files.len() as i32
    }

    /// Number of held descriptors.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Closes every held descriptor (the exec-did-not-happen path).
    pub fn release(&mut self) {
        self.files.clear();
    }

    fn raw_fds(&self) -> Vec<RawFd> {
        self.files.iter().map(|f| f.as_raw_fd()).collect()
    }
}

/// What to exec and how to launch it.
#[derive(Debug, Clone)]
pub struct SuccessorSpec {
    /// Path of the freshly built executable.
    pub executable: PathBuf,
    /// Arguments (argv[1..]) to pass through.
    pub args: Vec<String>,
}

/// Spawns the successor process with the inherited descriptors at their
/// recorded indices and the recovery environment marker set.
///
/// Stdio is inherited (the first three descriptors of the successor are
/// the predecessor's stdio triple). On success the caller is expected to
/// grant the child a short start grace and then exit; this function never
/// touches the predecessor's lifetime itself.
pub fn spawn_successor(spec: &SuccessorSpec, fds: &InheritedFds) -> io::Result<Child> {
    let count = fds.len() as RawFd;
    let floor = FIRST_INHERITED_FD + count;

    // Lift every source above the target range so a dup2 can never clobber
    // a source that has not been copied yet. The lifted duplicates carry
    // FD_CLOEXEC and vanish at exec; only the dup2 targets survive.
    let lifted: Vec<OwnedFd> = fds
        .raw_fds()
        .into_iter()
        .map(|raw| {
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(raw) };
            dup_at_least(borrowed, floor)
        })
        .collect::<io::Result<_>>()?;

    let mapping: Vec<(RawFd, RawFd)> = lifted
        .iter()
        .enumerate()
        .map(|(i, fd)| (fd.as_raw_fd(), FIRST_INHERITED_FD + i as RawFd))
        .collect();

    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .env(RECOVERY_ENV_VAR, "1");

    unsafe {
        cmd.pre_exec(move || {
            for &(src, dst) in &mapping {
                // Async-signal-safe territory: raw libc only.
                if nix::libc::dup2(src, dst) == -1 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let child = cmd.spawn();
    // `lifted` stays alive until after the spawn so the sources cannot
    // close early.
    drop(lifted);
    child
}

/// Wraps the descriptor at an inherited index back into a listening
/// socket.
///
/// # Safety
/// `index` must be an index recorded in the snapshot for this process: the
/// descriptor must exist, be a listening TCP socket, and not be owned by
/// any other object in the successor.
pub unsafe fn listener_from_index(index: i32) -> io::Result<std::net::TcpListener> {
    let fd = OwnedFd::from_raw_fd(index as RawFd);
    let listener = std::net::TcpListener::from(fd);
    // Confirm the descriptor really is a bound socket.
    listener.local_addr()?;
    Ok(listener)
}

/// Wraps the descriptor at an inherited index back into an established
/// connection.
///
/// # Safety
/// Same contract as [`listener_from_index`], for a connected TCP socket.
pub unsafe fn stream_from_index(index: i32) -> io::Result<std::net::TcpStream> {
    let fd = OwnedFd::from_raw_fd(index as RawFd);
    let stream = std::net::TcpStream::from(fd);
    stream.peer_addr()?;
    Ok(stream)
}
