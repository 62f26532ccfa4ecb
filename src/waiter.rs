//! Drives `StartTransientUnit` to completion under an absolute deadline.
//!
//! ```text
//! CALLING -> AWAITING_PATH -> POLLING -> { DONE | TIMED_OUT | FAILED }
//! ```

use crate::bus::{BusTransport, Connection};
use crate::watch::JobWatch;
use crate::{Error, Result, TransientUnitRequest};

use std::time::{Duration, Instant};

use zbus::zvariant::OwnedObjectPath;

/// Absolute point in time computed once at the start of an operation.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.start.elapsed();
        if elapsed >= self.budget {
            return None;
        }
        Some(self.budget - elapsed)
    }
}

/// What a successful wait produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobCompletion {
    /// Object path of the job systemd queued for the new scope.
    pub job_path: String,
    /// Messages processed while polling.
    pub processed: usize,
}

enum Phase {
    Calling,
    AwaitingPath(zbus::Message),
    Polling,
}

/// Send `request` and wait until `watch` sees its job removed or `deadline` passes.
///
/// `watch` must already be subscribed on `conn`.
pub fn run<T: BusTransport>(
    conn: &Connection<'_, T>,
    request: &TransientUnitRequest,
    watch: &JobWatch,
    deadline: Deadline,
    call_timeout: Duration,
) -> Result<JobCompletion> {
    let mut phase = Phase::Calling;
    let mut processed = 0usize;

    loop {
        phase = match phase {
            Phase::Calling => {
                let reply = conn.start_transient_unit(request, call_timeout)?;
                Phase::AwaitingPath(reply)
            }
            Phase::AwaitingPath(reply) => {
                let job = decode_job_path(&reply)?;

                #[cfg(feature = "tracing")]
                tracing::debug!(unit = %request.name(), job_path = %job.as_str(), "scope job queued");

                watch.set_target(job.as_str());
                Phase::Polling
            }
            Phase::Polling => {
                if watch.is_done() {
                    return Ok(done(watch, processed));
                }

                let n = conn.process()?;
                if n > 0 {
                    processed += n;
                    if watch.is_done() {
                        return Ok(done(watch, processed));
                    }
                    Phase::Polling
                } else {
                    let Some(remaining) = deadline.remaining() else {
                        return Err(Error::Timeout {
                            timeout: deadline.budget(),
                        });
                    };
                    conn.wait(remaining)?;
                    Phase::Polling
                }
            }
        };
    }
}

fn done(watch: &JobWatch, processed: usize) -> JobCompletion {
    JobCompletion {
        job_path: watch.target().unwrap_or_default(),
        processed,
    }
}

fn decode_job_path(reply: &zbus::Message) -> Result<OwnedObjectPath> {
    reply
        .body()
        .deserialize::<OwnedObjectPath>()
        .map_err(|e| Error::decode("method reply", e))
}
