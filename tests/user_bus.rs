#![cfg(all(target_os = "linux", feature = "rt-async-io"))]

// `UserBus` against a fake systemd manager on the other end of a peer-to-peer connection.
//
// The manager thread answers one `StartTransientUnit` call, emitting `JobRemoved` signals
// before and/or after its reply as scripted.

use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use futures_lite::StreamExt;
use tmuxscope::{
    Error, ScopeOptions, ScopePlacement, ScopeSpawner, ScopeTarget, SliceResolver, UserBus,
};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

const MANAGER_PATH: &str = "/org/freedesktop/systemd1";
const MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

type StartTransientUnitArgs = (
    String,
    String,
    Vec<(String, OwnedValue)>,
    Vec<(String, Vec<(String, OwnedValue)>)>,
);

#[derive(Clone, Copy)]
struct JobSignal {
    id: u32,
    /// Send only `(u id, o job)`.
    short: bool,
}

fn removed(id: u32) -> JobSignal {
    JobSignal { id, short: false }
}

enum Reply {
    Job(u32),
    Error(&'static str),
}

struct Script {
    before_reply: Vec<JobSignal>,
    reply: Reply,
    after_reply: Vec<JobSignal>,
}

#[derive(Debug)]
struct Received {
    name: String,
    mode: String,
    properties: Vec<String>,
}

fn job_path(id: u32) -> OwnedObjectPath {
    OwnedObjectPath::try_from(format!("/org/freedesktop/systemd1/job/{id}")).expect("path")
}

async fn emit(server: &zbus::Connection, signal: JobSignal) -> zbus::Result<()> {
    let path = job_path(signal.id);
    if signal.short {
        server
            .emit_signal(
                None::<&str>,
                MANAGER_PATH,
                MANAGER_INTERFACE,
                "JobRemoved",
                &(signal.id, path),
            )
            .await
    } else {
        server
            .emit_signal(
                None::<&str>,
                MANAGER_PATH,
                MANAGER_INTERFACE,
                "JobRemoved",
                &(signal.id, path, "tmux-spawn-x.scope", "done"),
            )
            .await
    }
}

async fn serve(
    server: zbus::Connection,
    mut incoming: zbus::MessageStream,
    script: Script,
    received: mpsc::Sender<Received>,
) -> zbus::Result<()> {
    while let Some(msg) = incoming.next().await {
        let msg = msg?;
        let header = msg.header();
        if msg.message_type() != zbus::message::Type::MethodCall
            || header.member().map(|m| m.as_str()) != Some("StartTransientUnit")
        {
            continue;
        }
        let (name, mode, properties, _aux): StartTransientUnitArgs = msg.body().deserialize()?;

        for signal in &script.before_reply {
            emit(&server, *signal).await?;
        }
        match script.reply {
            Reply::Job(id) => server.reply(&header, &job_path(id)).await?,
            Reply::Error(text) => {
                server
                    .reply_error(&header, "org.freedesktop.systemd1.UnitExists", &text)
                    .await?
            }
        }
        for signal in &script.after_reply {
            emit(&server, *signal).await?;
        }

        let _ = received.send(Received {
            name,
            mode,
            properties: properties.into_iter().map(|(k, _)| k).collect(),
        });
    }
    Ok(())
}

/// Start a fake manager thread and return the client end of the connection.
fn fake_manager(script: Script) -> (zbus::Connection, mpsc::Receiver<Received>) {
    let (server_sock, client_sock) = UnixStream::pair().expect("socketpair");
    let guid = zbus::Guid::generate();

    let (server, client) = smol::block_on(futures_lite::future::zip(
        zbus::connection::Builder::unix_stream(server_sock)
            .server(guid)
            .expect("server guid")
            .p2p()
            .build(),
        zbus::connection::Builder::unix_stream(client_sock)
            .p2p()
            .method_timeout(Duration::from_secs(1))
            .build(),
    ));
    let server = server.expect("server connection");
    let client = client.expect("client connection");

    let incoming = zbus::MessageStream::from(&server);
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = smol::block_on(serve(server, incoming, script, tx));
    });
    (client, rx)
}

struct FixedSlice;

impl SliceResolver for FixedSlice {
    fn user_slice(&self, _pid: u32) -> tmuxscope::Result<String> {
        Ok("app.slice".to_string())
    }
}

fn place(
    client: zbus::Connection,
    opts: ScopeOptions,
) -> (tmuxscope::Result<ScopePlacement>, Duration) {
    let target = ScopeTarget {
        pid: 4242,
        parent_pid: 4000,
    };
    let started = Instant::now();
    let res = ScopeSpawner::new(opts).move_with(
        || Ok(UserBus::from_connection(client)),
        target,
        &FixedSlice,
    );
    (res, started.elapsed())
}

#[test]
fn signal_after_reply_completes() {
    let (client, received) = fake_manager(Script {
        before_reply: Vec::new(),
        reply: Reply::Job(42),
        after_reply: vec![removed(42)],
    });

    let (res, elapsed) = place(client, ScopeOptions::default());
    let placement = res.expect("placement");

    assert_eq!(placement.job_path, "/org/freedesktop/systemd1/job/42");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");

    let req = received
        .recv_timeout(Duration::from_secs(1))
        .expect("call reached the manager");
    assert_eq!(req.name, placement.unit);
    assert_eq!(req.mode, "fail");
    assert_eq!(
        req.properties,
        ["Description", "SendSIGHUP", "Slice", "PIDs", "CollectMode"]
    );
}

#[test]
fn signal_before_reply_completes() {
    let (client, _received) = fake_manager(Script {
        before_reply: vec![removed(42)],
        reply: Reply::Job(42),
        after_reply: Vec::new(),
    });

    let (res, elapsed) = place(client, ScopeOptions::default());
    let placement = res.expect("placement");

    assert_eq!(placement.job_path, "/org/freedesktop/systemd1/job/42");
    assert!(placement.processed >= 1);
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
}

#[test]
fn burst_of_signals_before_reply_does_not_stall_the_call() {
    let mut before_reply: Vec<JobSignal> = (1..=40).map(removed).collect();
    before_reply.push(removed(42));
    let (client, _received) = fake_manager(Script {
        before_reply,
        reply: Reply::Job(42),
        after_reply: Vec::new(),
    });

    let (res, elapsed) = place(client, ScopeOptions::default());
    let placement = res.expect("placement");

    assert_eq!(placement.job_path, "/org/freedesktop/systemd1/job/42");
    assert!(placement.processed >= 41, "{}", placement.processed);
    assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
}

#[test]
fn id_and_path_payload_completes() {
    let (client, _received) = fake_manager(Script {
        before_reply: Vec::new(),
        reply: Reply::Job(42),
        after_reply: vec![JobSignal { id: 42, short: true }],
    });

    let (res, _) = place(client, ScopeOptions::default());
    assert_eq!(
        res.expect("placement").job_path,
        "/org/freedesktop/systemd1/job/42"
    );
}

#[test]
fn missing_signal_times_out() {
    let (client, _received) = fake_manager(Script {
        before_reply: vec![removed(41)],
        reply: Reply::Job(42),
        after_reply: vec![removed(420)],
    });
    let mut opts = ScopeOptions::default();
    opts.deadline = Duration::from_millis(300);

    let (res, elapsed) = place(client, opts);
    let err = res.expect_err("must time out");

    let Error::Timeout { timeout } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(timeout, Duration::from_millis(300));
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
}

#[test]
fn error_reply_text_is_reported() {
    let (client, _received) = fake_manager(Script {
        before_reply: Vec::new(),
        reply: Reply::Error("Unit tmux-spawn-x.scope already exists."),
        after_reply: Vec::new(),
    });

    let (res, _) = place(client, ScopeOptions::default());
    let err = res.expect_err("must fail");

    let Error::Call { message } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(message, "Unit tmux-spawn-x.scope already exists.");
}
