//! Bus connection ownership, signal dispatch and the transport seam.

use crate::{Error, Result, TransientUnitRequest};

use std::cell::{Cell, RefCell};
use std::time::Duration;

pub(crate) const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
pub(crate) const SYSTEMD_MANAGER_PATH: &str = "/org/freedesktop/systemd1";
pub(crate) const SYSTEMD_MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

/// Identifier of an installed signal match, handed out by a `BusTransport`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MatchId(pub u64);

/// Filter for broadcast signals.
///
/// `sender` is only forwarded to the bus daemon: delivered signals carry the unique name of the
/// emitter, so local dispatch compares path, interface and member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalMatch {
    pub sender: &'static str,
    pub path: &'static str,
    pub interface: &'static str,
    pub member: &'static str,
}

impl SignalMatch {
    /// `org.freedesktop.systemd1.Manager.JobRemoved` on the manager object.
    pub const fn job_removed() -> Self {
        Self {
            sender: SYSTEMD_DESTINATION,
            path: SYSTEMD_MANAGER_PATH,
            interface: SYSTEMD_MANAGER_INTERFACE,
            member: "JobRemoved",
        }
    }

    /// Whether `msg` is a signal this filter selects.
    pub fn matches(&self, msg: &zbus::Message) -> bool {
        if msg.message_type() != zbus::message::Type::Signal {
            return false;
        }
        let header = msg.header();
        header.path().is_some_and(|p| p.as_str() == self.path)
            && header
                .interface()
                .is_some_and(|i| i.as_str() == self.interface)
            && header.member().is_some_and(|m| m.as_str() == self.member)
    }

    pub(crate) fn to_match_rule(&self) -> Result<zbus::MatchRule<'static>> {
        let builder = zbus::MatchRule::builder().msg_type(zbus::message::Type::Signal);
        let builder = builder.sender(self.sender).map_err(map_match_rule_error)?;
        let builder = builder.path(self.path).map_err(map_match_rule_error)?;
        let builder = builder
            .interface(self.interface)
            .map_err(map_match_rule_error)?;
        let builder = builder.member(self.member).map_err(map_match_rule_error)?;
        Ok(builder.build())
    }
}

/// Low-level operations on one bus connection.
///
/// Implementations are driven from a single thread: nothing here is called concurrently, and
/// `process` must never block.
pub trait BusTransport {
    /// Ask the bus to route signals selected by `rule` to this connection.
    fn add_match(&mut self, rule: &SignalMatch) -> Result<MatchId>;

    /// Undo `add_match`. Unknown ids are ignored.
    fn remove_match(&mut self, id: MatchId);

    /// Send `StartTransientUnit` and wait up to `timeout` for its reply.
    ///
    /// Signals that arrive before the reply stay queued for `process`.
    fn start_transient_unit(
        &mut self,
        request: &TransientUnitRequest,
        timeout: Duration,
    ) -> Result<zbus::Message>;

    /// Take one pending incoming signal, if any is ready.
    fn process(&mut self) -> Result<Option<zbus::Message>>;

    /// Block until incoming activity is available or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<()>;

    /// Release the connection. Called exactly once, by `Connection`'s drop.
    fn close(&mut self);
}

type Handler<'h> = Box<dyn FnMut(&zbus::Message) -> Result<()> + 'h>;

struct Registration<'h> {
    id: MatchId,
    rule: SignalMatch,
    handler: Handler<'h>,
}

/// Exclusive owner of a `BusTransport` plus the signal handlers registered on it.
///
/// Handlers may borrow state living at least as long as `'h`; they run synchronously from
/// `process`. The transport is closed when the connection is dropped.
pub struct Connection<'h, T: BusTransport> {
    transport: RefCell<T>,
    handlers: RefCell<Vec<Registration<'h>>>,
    closed: Cell<bool>,
}

impl<'h, T: BusTransport> Connection<'h, T> {
    /// Open a connection using `connect`.
    ///
    /// Errors from `connect` are reported as `Error::Connection`.
    pub fn open<F>(connect: F) -> Result<Self>
    where
        F: FnOnce() -> Result<T>,
    {
        let transport = connect().map_err(|e| match e {
            Error::Connection { .. } => e,
            other => Error::Connection {
                detail: other.to_string(),
            },
        })?;
        Ok(Self::new(transport))
    }

    pub fn new(transport: T) -> Self {
        Self {
            transport: RefCell::new(transport),
            handlers: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }

    /// Install `rule` on the bus and register `handler` for the signals it selects.
    ///
    /// The returned slot removes both when dropped.
    pub fn add_match<F>(&self, rule: SignalMatch, handler: F) -> Result<MatchSlot<'_, 'h, T>>
    where
        F: FnMut(&zbus::Message) -> Result<()> + 'h,
    {
        let id = self.transport.borrow_mut().add_match(&rule)?;
        self.handlers.borrow_mut().push(Registration {
            id,
            rule,
            handler: Box::new(handler),
        });
        Ok(MatchSlot { conn: self, id })
    }

    pub(crate) fn start_transient_unit(
        &self,
        request: &TransientUnitRequest,
        timeout: Duration,
    ) -> Result<zbus::Message> {
        self.transport
            .borrow_mut()
            .start_transient_unit(request, timeout)
    }

    /// Dispatch at most one pending signal to the matching handlers.
    ///
    /// Returns the number of messages taken off the connection (0 or 1). A handler error aborts
    /// dispatch and is returned as-is.
    pub fn process(&self) -> Result<usize> {
        let Some(msg) = self.transport.borrow_mut().process()? else {
            return Ok(0);
        };
        let mut handlers = self.handlers.borrow_mut();
        for reg in handlers.iter_mut() {
            if reg.rule.matches(&msg) {
                (reg.handler)(&msg)?;
            }
        }
        Ok(1)
    }

    /// Block for incoming activity, at most `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        self.transport.borrow_mut().wait(timeout)
    }

    fn remove_match(&self, id: MatchId) {
        self.handlers.borrow_mut().retain(|reg| reg.id != id);
        self.transport.borrow_mut().remove_match(id);
    }
}

impl<T: BusTransport> Drop for Connection<'_, T> {
    fn drop(&mut self) {
        if !self.closed.replace(true) {
            self.handlers.get_mut().clear();
            self.transport.get_mut().close();
        }
    }
}

impl<T: BusTransport> std::fmt::Debug for Connection<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("handlers", &self.handlers.borrow().len())
            .field("closed", &self.closed.get())
            .finish()
    }
}

/// Installed signal match; removed from the bus and the dispatch table on drop.
#[must_use = "dropping the slot removes the match immediately"]
pub struct MatchSlot<'c, 'h, T: BusTransport> {
    conn: &'c Connection<'h, T>,
    id: MatchId,
}

impl<T: BusTransport> MatchSlot<'_, '_, T> {
    pub fn id(&self) -> MatchId {
        self.id
    }
}

impl<T: BusTransport> Drop for MatchSlot<'_, '_, T> {
    fn drop(&mut self) {
        self.conn.remove_match(self.id);
    }
}

impl<T: BusTransport> std::fmt::Debug for MatchSlot<'_, '_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchSlot").field("id", &self.id).finish()
    }
}

fn map_match_rule_error(e: zbus::Error) -> Error {
    Error::Bus {
        context: format!("failed to create match signal: {e}"),
    }
}
