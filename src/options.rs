use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for `ScopeSpawner`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ScopeOptions {
    /// Total budget for the `StartTransientUnit` call plus the wait for its job to finish.
    ///
    /// Measured from the start of the operation and never extended.
    pub deadline: Duration,

    /// D-Bus method call timeout for `StartTransientUnit`.
    pub call_timeout: Duration,

    /// Prefix of generated scope names; the full name is `<prefix><uuid>.scope`.
    pub unit_prefix: String,

    /// Slice used when the parent process's user slice cannot be determined.
    pub fallback_slice: String,

    /// `CollectMode=` of the transient scope.
    pub collect_mode: String,

    /// Mount point of procfs, used to read `<pid>/cgroup`.
    ///
    /// Default: `/proc`.
    pub proc_root: PathBuf,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_micros(1_000_000),
            call_timeout: Duration::from_micros(1_000_000),
            unit_prefix: "tmux-spawn-".to_string(),
            fallback_slice: "app-tmux.slice".to_string(),
            collect_mode: "inactive-or-failed".to_string(),
            proc_root: PathBuf::from("/proc"),
        }
    }
}
