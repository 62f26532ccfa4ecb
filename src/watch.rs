use crate::bus::{BusTransport, Connection, MatchSlot, SignalMatch};
use crate::{Error, Result};

use std::cell::{Cell, RefCell};

use zbus::zvariant::OwnedObjectPath;

/// Which job we are waiting for, and whether systemd has reported it removed.
///
/// The target is unknown until the `StartTransientUnit` reply arrives; `done` only ever goes
/// from `false` to `true`.
#[derive(Debug, Default)]
pub struct JobWatch {
    target: RefCell<Option<String>>,
    done: Cell<bool>,
}

impl JobWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the job object path returned by the method call.
    pub fn set_target(&self, job_path: &str) {
        *self.target.borrow_mut() = Some(job_path.to_string());
    }

    pub fn target(&self) -> Option<String> {
        self.target.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Handle one `JobRemoved(u id, o job, s unit, s result)` delivery.
    ///
    /// A no-op while the target is unset: the signal may be dispatched before the method reply
    /// has been read.
    pub fn on_job_removed(&self, msg: &zbus::Message) -> Result<()> {
        let target = self.target.borrow();
        let Some(target) = target.as_deref() else {
            return Ok(());
        };

        let (_id, job) = decode_job_removed(msg)?;
        if job.as_str() == target {
            #[cfg(feature = "tracing")]
            tracing::debug!(job_path = %target, "scope job removed");
            self.done.set(true);
        }
        Ok(())
    }
}

/// Subscribe `watch` to `JobRemoved` signals from the systemd manager.
///
/// Must happen before the method call is sent, so a fast job cannot finish unobserved.
pub fn subscribe<'c, 'h, T: BusTransport>(
    conn: &'c Connection<'h, T>,
    watch: &'h JobWatch,
) -> Result<MatchSlot<'c, 'h, T>> {
    conn.add_match(SignalMatch::job_removed(), move |msg| {
        watch.on_job_removed(msg)
    })
}

/// Leading `(u id, o job)` of the payload. systemd appends unit name and result; only the
/// first two fields are required.
fn decode_job_removed(msg: &zbus::Message) -> Result<(u32, OwnedObjectPath)> {
    let body = msg.body();
    match body.deserialize::<(u32, OwnedObjectPath, String, String)>() {
        Ok((id, job, _unit, _result)) => Ok((id, job)),
        Err(full) => body
            .deserialize::<(u32, OwnedObjectPath)>()
            .map_err(|_| Error::decode("JobRemoved signal", full)),
    }
}
