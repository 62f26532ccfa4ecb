use crate::bus::{
    BusTransport, MatchId, SYSTEMD_DESTINATION, SYSTEMD_MANAGER_INTERFACE, SYSTEMD_MANAGER_PATH,
    SignalMatch,
};
use crate::{Error, Result, ScopeOptions, TransientUnitRequest, runtime};

use futures_util::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;

/// `BusTransport` backed by a zbus connection to the per-user session bus.
///
/// Each installed match owns a `zbus::MessageStream`; zbus queues matching signals on it as
/// soon as the match is registered, including while a method call is in flight.
#[derive(Debug)]
pub struct UserBus {
    conn: Option<zbus::Connection>,
    streams: Vec<(MatchId, zbus::MessageStream)>,
    pending: VecDeque<zbus::Message>,
    next_id: u64,
}

impl UserBus {
    /// Connect to the user session bus (`DBUS_SESSION_BUS_ADDRESS` or the XDG runtime socket).
    pub fn connect(opts: &ScopeOptions) -> Result<Self> {
        let call_timeout = opts.call_timeout;
        let conn = runtime::block_on(async move {
            zbus::connection::Builder::session()
                .map_err(map_connect_error)?
                .method_timeout(call_timeout)
                .build()
                .await
                .map_err(map_connect_error)
        })??;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            unique_name = conn.unique_name().map(|n| n.as_str()).unwrap_or(""),
            "connected to session bus"
        );

        Ok(Self::from_connection(conn))
    }

    /// Use an established connection, for example a peer-to-peer one to a private manager.
    pub fn from_connection(conn: zbus::Connection) -> Self {
        Self {
            conn: Some(conn),
            streams: Vec::new(),
            pending: VecDeque::new(),
            next_id: 0,
        }
    }

    fn conn(&self) -> Result<&zbus::Connection> {
        self.conn.as_ref().ok_or_else(|| Error::Bus {
            context: "session bus connection already closed".to_string(),
        })
    }
}

impl BusTransport for UserBus {
    fn add_match(&mut self, rule: &SignalMatch) -> Result<MatchId> {
        let conn = self.conn()?.clone();
        let rule = rule.to_match_rule()?;
        let stream = runtime::block_on(async move {
            zbus::MessageStream::for_match_rule(rule, &conn, Some(16)).await
        })?
        .map_err(|e| Error::Bus {
            context: format!("failed to create match signal: {e}"),
        })?;

        self.next_id += 1;
        let id = MatchId(self.next_id);
        self.streams.push((id, stream));
        Ok(id)
    }

    fn remove_match(&mut self, id: MatchId) {
        // Dropping the stream removes the match rule from the bus daemon.
        self.streams.retain(|(sid, _)| *sid != id);
    }

    fn start_transient_unit(
        &mut self,
        request: &TransientUnitRequest,
        timeout: Duration,
    ) -> Result<zbus::Message> {
        let conn = self.conn()?.clone();
        let body = request.to_dbus_args()?;
        let call = async move {
            conn.call_method(
                Some(SYSTEMD_DESTINATION),
                SYSTEMD_MANAGER_PATH,
                Some(SYSTEMD_MANAGER_INTERFACE),
                "StartTransientUnit",
                &body,
            )
            .await
            .map_err(map_call_error)
        };
        let expire = async move {
            runtime::sleep(timeout).await;
            Err(Error::call_failed(None, "Connection timed out"))
        };

        // Match queues are bounded and zbus stops reading the socket when one is full, which
        // would stall the reply behind unread signals. Move them to `pending` meanwhile.
        let streams = &mut self.streams;
        let pending = &mut self.pending;
        let buffer = async move {
            while let Some(Ok(msg)) = next_signal(streams).await {
                pending.push_back(msg);
            }
            // A closed stream shows up again in `process`; the call decides the outcome here.
            futures_lite::future::pending::<Result<zbus::Message>>().await
        };

        runtime::block_on(futures_lite::future::or(
            call,
            futures_lite::future::or(expire, buffer),
        ))?
    }

    fn process(&mut self) -> Result<Option<zbus::Message>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        for (_, stream) in &mut self.streams {
            let polled = runtime::block_on(futures_lite::future::poll_once(stream.next()))?;
            match polled {
                None => continue,
                Some(Some(Ok(msg))) => return Ok(Some(msg)),
                Some(Some(Err(e))) => return Err(Error::waiting(e)),
                Some(None) => return Err(Error::waiting("session bus connection closed")),
            }
        }
        Ok(None)
    }

    fn wait(&mut self, timeout: Duration) -> Result<()> {
        if !self.pending.is_empty() {
            return Ok(());
        }

        let streams = &mut self.streams;
        let activity = async move { Some(next_signal(streams).await) };
        let expire = async move {
            runtime::sleep(timeout).await;
            None
        };
        let next = runtime::block_on(futures_lite::future::or(activity, expire))?;

        match next {
            None => Ok(()),
            Some(Some(Ok(msg))) => {
                self.pending.push_back(msg);
                Ok(())
            }
            Some(Some(Err(e))) => Err(Error::waiting(e)),
            Some(None) => Err(Error::waiting("session bus connection closed")),
        }
    }

    fn close(&mut self) {
        self.streams.clear();
        self.pending.clear();
        // zbus closes the socket once the last clone of the connection is gone.
        self.conn = None;
    }
}

/// Next item from whichever stream has one first. Never resolves when there are no streams.
async fn next_signal(
    streams: &mut [(MatchId, zbus::MessageStream)],
) -> Option<zbus::Result<zbus::Message>> {
    if streams.is_empty() {
        return futures_lite::future::pending().await;
    }
    let nexts = streams.iter_mut().map(|(_, s)| Box::pin(s.next()));
    let (item, _, _) = futures_util::future::select_all(nexts).await;
    item
}

fn map_connect_error(err: zbus::Error) -> Error {
    Error::Connection {
        detail: err.to_string(),
    }
}

fn map_call_error(err: zbus::Error) -> Error {
    match err {
        zbus::Error::MethodError(name, detail, _reply) => {
            Error::call_failed(detail.as_deref(), name.as_str())
        }
        zbus::Error::InputOutput(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            Error::call_failed(None, "Connection timed out")
        }
        zbus::Error::InputOutput(e) => Error::call_failed(None, e),
        other => Error::call_failed(None, other),
    }
}
