// Accept one connection on a socket passed by systemd, or on a fresh one otherwise.
//
//   systemd-socket-activate -l /tmp/tmuxscope-demo.sock cargo run --example socket_activation

use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use tmuxscope::{EnvActivation, Error, ServerSocket, create_socket, systemd_activated};

fn main() {
    if let Err(e) = smol::block_on(run()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    println!("activated: {}", systemd_activated());

    let fallback = PathBuf::from("/tmp/tmuxscope-demo.sock");
    let sock = create_socket(&mut EnvActivation::new(), || {
        let _ = std::fs::remove_file(&fallback);
        let listener = UnixListener::bind(&fallback)
            .map_err(|e| socket_error(format!("bind {}: {e}", fallback.display())))?;
        Ok(ServerSocket {
            fd: listener.into(),
            path: fallback.clone(),
            activated: false,
        })
    })?;
    println!("listening on {} (activated={})", sock.path.display(), sock.activated);

    let listener = smol::Async::new(UnixListener::from(sock.fd)).map_err(socket_error)?;
    let (_stream, _) = listener.accept().await.map_err(socket_error)?;
    println!("accepted one connection");
    Ok(())
}

fn socket_error(detail: impl std::fmt::Display) -> Error {
    Error::Socket {
        detail: detail.to_string(),
    }
}
