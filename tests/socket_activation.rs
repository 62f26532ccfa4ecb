// Socket activation decisions, with descriptors supplied by a test source.

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use tmuxscope::activation::unix_stream_listener_path;
use tmuxscope::{ActivationSource, Error, ServerSocket, create_socket};

/// Hands out a descriptor the way the service manager would, resolving its bound path from
/// the socket itself.
struct Passed {
    count: usize,
    socket: Option<OwnedFd>,
    taken: usize,
}

impl ActivationSource for Passed {
    fn listen_fds(&self) -> tmuxscope::Result<usize> {
        Ok(self.count)
    }

    fn take_first(&mut self) -> tmuxscope::Result<(OwnedFd, PathBuf)> {
        self.taken += 1;
        let fd = self.socket.take().ok_or_else(|| Error::Socket {
            detail: "no descriptor".to_string(),
        })?;
        let path = unix_stream_listener_path(&fd)?;
        Ok((fd, path))
    }
}

fn listener(dir: &tempfile::TempDir, name: &str) -> (OwnedFd, PathBuf) {
    let path = dir.path().join(name);
    let l = UnixListener::bind(&path).expect("bind");
    (OwnedFd::from(l), path)
}

#[test]
fn single_inherited_descriptor_is_used_as_is() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (fd, bound) = listener(&dir, "default");
    let mut source = Passed {
        count: 1,
        socket: Some(fd),
        taken: 0,
    };

    let mut fallback_calls = 0;
    let sock = create_socket(&mut source, || {
        fallback_calls += 1;
        Err(Error::Socket {
            detail: "fallback must not run".to_string(),
        })
    })
    .expect("socket");

    assert!(sock.activated);
    assert_eq!(sock.path, bound);
    assert_eq!(unix_stream_listener_path(&sock.fd).expect("path"), bound);
    assert_eq!(source.taken, 1);
    assert_eq!(fallback_calls, 0);
}

#[test]
fn several_inherited_descriptors_are_refused() {
    let mut source = Passed {
        count: 2,
        socket: None,
        taken: 0,
    };

    let mut fallback_calls = 0;
    let err = create_socket(&mut source, || {
        fallback_calls += 1;
        Err(Error::Socket {
            detail: "unreachable".to_string(),
        })
    })
    .expect_err("must fail");

    let Error::Socket { detail } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert!(detail.contains("too many file descriptors"), "{detail}");
    assert_eq!(source.taken, 0);
    assert_eq!(fallback_calls, 0);
}

#[test]
fn no_inherited_descriptor_uses_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut source = Passed {
        count: 0,
        socket: None,
        taken: 0,
    };

    let sock = create_socket(&mut source, || {
        let (fd, path) = listener(&dir, "default");
        Ok(ServerSocket {
            fd,
            path,
            activated: false,
        })
    })
    .expect("socket");

    assert!(!sock.activated);
    assert_eq!(sock.path, dir.path().join("default"));
    assert_eq!(source.taken, 0);
}

#[test]
fn inherited_non_listener_is_refused() {
    let (a, _b) = std::os::unix::net::UnixStream::pair().expect("pair");
    let mut source = Passed {
        count: 1,
        socket: Some(OwnedFd::from(a)),
        taken: 0,
    };

    let err = create_socket(&mut source, || {
        Err(Error::Socket {
            detail: "unreachable".to_string(),
        })
    })
    .expect_err("must fail");

    let Error::Socket { .. } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(source.taken, 1);
}

#[test]
fn bad_inherited_descriptor_is_reported() {
    let mut source = Passed {
        count: 1,
        socket: None,
        taken: 0,
    };

    let err = create_socket(&mut source, || {
        Err(Error::Socket {
            detail: "unreachable".to_string(),
        })
    })
    .expect_err("must fail");

    assert!(err.to_string().starts_with("systemd socket error ("));
}
