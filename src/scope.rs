use crate::bus::{BusTransport, Connection};
use crate::slice::{ProcSliceResolver, SliceResolver};
use crate::waiter::{self, Deadline};
use crate::watch::{self, JobWatch};
use crate::{Result, ScopeOptions, UserBus, request};

/// Process to place into the new scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeTarget {
    /// Goes into `PIDs=` and the description.
    pub pid: u32,
    /// Its parent; supplies the slice and appears in the description.
    pub parent_pid: u32,
}

impl ScopeTarget {
    /// The calling process and its parent.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            parent_pid: std::os::unix::process::parent_id(),
        }
    }
}

/// Outcome of a successful placement.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ScopePlacement {
    /// Name of the transient scope unit, e.g. `tmux-spawn-<uuid>.scope`.
    pub unit: String,
    /// Job path systemd returned; already removed by the time this is returned.
    pub job_path: String,
    /// Slice the scope was started in.
    pub slice: String,
    /// Whether `slice` is the fallback because the parent's slice could not be read.
    pub slice_is_fallback: bool,
    /// Bus messages processed while waiting for the job.
    pub processed: usize,
}

/// Moves processes into fresh transient scopes of the systemd user manager.
#[derive(Clone, Debug, Default)]
pub struct ScopeSpawner {
    opts: ScopeOptions,
}

impl ScopeSpawner {
    pub fn new(opts: ScopeOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ScopeOptions {
        &self.opts
    }

    /// Place the calling process into a new scope via the user session bus.
    pub fn move_to_new_cgroup(&self) -> Result<ScopePlacement> {
        let resolver = ProcSliceResolver::new(&self.opts.proc_root);
        self.move_with(
            || UserBus::connect(&self.opts),
            ScopeTarget::current(),
            &resolver,
        )
    }

    /// Place `target` using a caller-supplied transport and slice resolver.
    ///
    /// This is the whole operation: one connection, one subscription, one request. Everything
    /// acquired is released before returning, on success and on every error path.
    pub fn move_with<T, F>(
        &self,
        connect: F,
        target: ScopeTarget,
        slices: &dyn SliceResolver,
    ) -> Result<ScopePlacement>
    where
        T: BusTransport,
        F: FnOnce() -> Result<T>,
    {
        let deadline = Deadline::after(self.opts.deadline);
        let watch = JobWatch::new();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            pid = target.pid,
            parent_pid = target.parent_pid,
            deadline_us = crate::util::duration_to_micros_saturating(self.opts.deadline),
            "moving process to new scope"
        );

        let conn = Connection::open(connect)?;
        let _slot = watch::subscribe(&conn, &watch)?;
        let request = request::build_start_transient_unit(&target, &self.opts, slices)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            unit = %request.name(),
            slice = %request.slice(),
            pid = target.pid,
            "StartTransientUnit"
        );

        let completion = waiter::run(&conn, &request, &watch, deadline, self.opts.call_timeout)
            .inspect_err(|_e| {
                #[cfg(feature = "tracing")]
                tracing::warn!(unit = %request.name(), error = %_e, "scope placement failed");
            })?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            unit = %request.name(),
            job_path = %completion.job_path,
            "process moved to new scope"
        );

        Ok(ScopePlacement {
            unit: request.name().to_string(),
            job_path: completion.job_path,
            slice: request.slice().to_string(),
            slice_is_fallback: request.slice_is_fallback(),
            processed: completion.processed,
        })
    }
}
