//! Sockets handed over by systemd socket activation (`sd_listen_fds(3)` protocol).

use crate::{Error, Result};

use std::os::fd::{AsFd, OwnedFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use nix::sys::socket::{SockType, getsockopt, sockopt};

/// First descriptor passed by the service manager.
pub const LISTEN_FDS_START: RawFd = 3;

/// Listening socket for the server, inherited or freshly created.
#[derive(Debug)]
pub struct ServerSocket {
    pub fd: OwnedFd,
    pub path: PathBuf,
    /// `true` when the socket came from the service manager.
    pub activated: bool,
}

/// Where inherited descriptors come from.
pub trait ActivationSource {
    /// Number of descriptors passed to this process.
    fn listen_fds(&self) -> Result<usize>;

    /// Take ownership of the first passed descriptor and return it with its bound path.
    ///
    /// Fails unless it is a listening `SOCK_STREAM` unix socket.
    fn take_first(&mut self) -> Result<(OwnedFd, PathBuf)>;
}

/// Reads `LISTEN_PID`/`LISTEN_FDS` from the environment of the current process.
#[derive(Debug, Default)]
pub struct EnvActivation {
    taken: bool,
}

impl EnvActivation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivationSource for EnvActivation {
    fn listen_fds(&self) -> Result<usize> {
        parse_listen_fds(
            std::env::var("LISTEN_PID").ok().as_deref(),
            std::env::var("LISTEN_FDS").ok().as_deref(),
            std::process::id(),
        )
    }

    fn take_first(&mut self) -> Result<(OwnedFd, PathBuf)> {
        if self.taken {
            return Err(Error::socket("descriptor already taken"));
        }
        if self.listen_fds()? == 0 {
            return Err(Error::socket("no descriptors passed"));
        }
        // SAFETY: LISTEN_PID/LISTEN_FDS say the service manager passed us fd 3, and it is
        // handed out at most once, so nothing else in this process owns it.
        #[allow(unsafe_code)]
        let adopted = unsafe { adopt_listener(LISTEN_FDS_START) }?;
        self.taken = true;
        Ok(adopted)
    }
}

/// Whether the service manager passed this process at least one descriptor.
pub fn systemd_activated() -> bool {
    EnvActivation::new().listen_fds().is_ok_and(|n| n >= 1)
}

/// Use the socket passed by the service manager, or create one with `fallback`.
///
/// More than one passed descriptor is an error; nothing else is attempted in that case.
pub fn create_socket<S, F>(source: &mut S, fallback: F) -> Result<ServerSocket>
where
    S: ActivationSource,
    F: FnOnce() -> Result<ServerSocket>,
{
    match source.listen_fds()? {
        0 => fallback(),
        1 => {
            let (fd, path) = source.take_first()?;

            #[cfg(feature = "tracing")]
            tracing::info!(path = %path.display(), "using socket-activated listener");

            Ok(ServerSocket {
                fd,
                path,
                activated: true,
            })
        }
        n => Err(Error::socket(format!("too many file descriptors: {n}"))),
    }
}

/// `sd_listen_fds(0)` semantics: descriptors only count when `LISTEN_PID` names this process.
pub fn parse_listen_fds(
    listen_pid: Option<&str>,
    listen_fds: Option<&str>,
    pid: u32,
) -> Result<usize> {
    let Some(listen_pid) = listen_pid else {
        return Ok(0);
    };
    let listen_pid: u32 = listen_pid
        .trim()
        .parse()
        .map_err(|e| Error::socket(format!("invalid LISTEN_PID {listen_pid:?}: {e}")))?;
    if listen_pid != pid {
        return Ok(0);
    }
    let Some(listen_fds) = listen_fds else {
        return Ok(0);
    };
    let n: usize = listen_fds
        .trim()
        .parse()
        .map_err(|e| Error::socket(format!("invalid LISTEN_FDS {listen_fds:?}: {e}")))?;
    let max = usize::try_from(RawFd::MAX - LISTEN_FDS_START).unwrap_or(usize::MAX);
    if n > max {
        return Err(Error::socket(format!("LISTEN_FDS out of range: {n}")));
    }
    Ok(n)
}

/// Path a listening unix stream socket is bound to.
pub fn unix_stream_listener_path(fd: &impl AsFd) -> Result<PathBuf> {
    let kind = getsockopt(fd, sockopt::SockType).map_err(|e| Error::socket(e.desc()))?;
    let listening = getsockopt(fd, sockopt::AcceptConn).map_err(|e| Error::socket(e.desc()))?;
    if kind != SockType::Stream || !listening {
        return Err(Error::socket("Protocol family not supported"));
    }

    let listener = UnixListener::from(fd.as_fd().try_clone_to_owned().map_err(Error::socket)?);
    let addr = listener
        .local_addr()
        .map_err(|_| Error::socket("Protocol family not supported"))?;
    addr.as_pathname()
        .map(PathBuf::from)
        .ok_or_else(|| Error::socket("listener is not bound to a filesystem path"))
}

/// Validate `fd` as a listening unix stream socket, then take ownership of it.
///
/// On error the descriptor is left open and unowned.
///
/// # Safety
/// `fd` must be open and must not be owned by anything else in the process.
#[allow(unsafe_code)]
unsafe fn adopt_listener(fd: RawFd) -> Result<(OwnedFd, PathBuf)> {
    use std::os::fd::{BorrowedFd, FromRawFd};

    // SAFETY: open per the caller's contract; the borrow ends before ownership is taken.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let path = unix_stream_listener_path(&borrowed)?;
    // SAFETY: not owned elsewhere per the caller's contract.
    Ok((unsafe { OwnedFd::from_raw_fd(fd) }, path))
}
