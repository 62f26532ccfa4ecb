//! tmuxscope moves a terminal multiplexer's pane processes into their own systemd transient
//! scopes, so each pane gets a separate cgroup under the user manager. It also picks up a
//! listening socket handed over by systemd socket activation.
//!
//! Runtime is Linux-only: it talks to the systemd user instance over the session D-Bus.
//!
//! ## Quick start
//! ```no_run
//! use tmuxscope::ScopeSpawner;
//!
//! fn place_pane() {
//!     match ScopeSpawner::default().move_to_new_cgroup() {
//!         Ok(placement) => println!("running in {}", placement.unit),
//!         // Not fatal: the pane just shares the server's cgroup.
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! ```
//!
//! ## What happens
//! 1. Connect to the user session bus.
//! 2. Subscribe to `org.freedesktop.systemd1.Manager.JobRemoved`.
//! 3. Call `StartTransientUnit` for `tmux-spawn-<uuid>.scope` with `PIDs=[getpid()]`.
//! 4. Process bus traffic until the returned job is removed, or one second has passed.
//!
//! The subscription is installed before the call so a job that finishes immediately is not
//! missed. Every step reports a distinct `Error` variant; nothing is retried.
//!
//! ## Runtime features
//! zbus needs an async runtime underneath the blocking API: `rt-async-io` (default) or
//! `rt-tokio`. Enable exactly one.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::dbg_macro)]

#[cfg(all(feature = "rt-async-io", feature = "rt-tokio"))]
compile_error!("features `rt-async-io` and `rt-tokio` are mutually exclusive; enable exactly one.");

#[cfg(not(any(feature = "rt-async-io", feature = "rt-tokio")))]
compile_error!(
    "missing runtime feature: enable one of `rt-async-io` or `rt-tokio` (default enables `rt-async-io`)."
);

pub mod activation;
pub mod bus;
mod error;
mod options;
pub mod request;
mod runtime;
mod scope;
mod session;
pub mod slice;
mod util;
pub mod waiter;
pub mod watch;

pub use crate::activation::{
    ActivationSource, EnvActivation, ServerSocket, create_socket, systemd_activated,
};
pub use crate::bus::{BusTransport, Connection, MatchId, MatchSlot, SignalMatch};
pub use crate::error::{Error, Result};
pub use crate::options::ScopeOptions;
pub use crate::request::{TransientUnitRequest, build_start_transient_unit};
pub use crate::scope::{ScopePlacement, ScopeSpawner, ScopeTarget};
pub use crate::session::UserBus;
pub use crate::slice::{ProcSliceResolver, SliceResolver};
pub use crate::waiter::{Deadline, JobCompletion};
pub use crate::watch::JobWatch;

/// Place the calling process into a new transient scope using default options.
pub fn move_to_new_cgroup() -> Result<ScopePlacement> {
    ScopeSpawner::default().move_to_new_cgroup()
}
