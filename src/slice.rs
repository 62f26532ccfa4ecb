use crate::{Error, Result};

use std::path::PathBuf;

/// Slice systemd reports for processes directly under the root of a hierarchy.
pub const ROOT_SLICE: &str = "-.slice";

/// Looks up the user slice a process runs in.
pub trait SliceResolver {
    fn user_slice(&self, pid: u32) -> Result<String>;
}

/// Reads `<proc_root>/<pid>/cgroup` and applies systemd's user-slice rules.
#[derive(Clone, Debug)]
pub struct ProcSliceResolver {
    proc_root: PathBuf,
}

impl ProcSliceResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl SliceResolver for ProcSliceResolver {
    fn user_slice(&self, pid: u32) -> Result<String> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        let contents = std::fs::read_to_string(&path).map_err(|e| Error::Bus {
            context: format!("read {}: {e}", path.display()),
        })?;
        parse_user_slice(&contents).ok_or_else(|| Error::Bus {
            context: format!("process {pid} is not running under a user manager"),
        })
    }
}

/// Extract the user slice from the contents of a `/proc/<pid>/cgroup` file.
///
/// Uses the `name=systemd` entry on legacy and hybrid layouts, else the unified one (`0::`). The path
/// must pass through a `user@<uid>.service`; the result is the innermost slice directly below
/// it, or `-.slice` when there is none.
pub fn parse_user_slice(contents: &str) -> Option<String> {
    let path = systemd_cgroup_path(contents)?;
    let rest = skip_user_manager(path)?;
    Some(leading_slice(rest).unwrap_or(ROOT_SLICE).to_string())
}

fn systemd_cgroup_path(contents: &str) -> Option<&str> {
    let mut unified = None;
    for line in contents.lines() {
        let mut it = line.splitn(3, ':');
        let (Some(id), Some(controllers), Some(path)) = (it.next(), it.next(), it.next()) else {
            continue;
        };
        if controllers.split(',').any(|c| c == "name=systemd") {
            return Some(path);
        }
        if id == "0" && controllers.is_empty() {
            unified = Some(path);
        }
    }
    unified
}

fn skip_user_manager(path: &str) -> Option<&str> {
    let mut rest = path.trim_start_matches('/');
    loop {
        let (head, tail) = split_component(rest);
        if head.is_empty() {
            return None;
        }
        if head.ends_with(".slice") {
            rest = tail;
            continue;
        }
        return is_user_manager(head).then_some(tail);
    }
}

fn is_user_manager(component: &str) -> bool {
    component
        .strip_prefix("user@")
        .and_then(|s| s.strip_suffix(".service"))
        .is_some_and(|uid| !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()))
}

fn leading_slice(path: &str) -> Option<&str> {
    let mut rest = path;
    let mut last = None;
    loop {
        let (head, tail) = split_component(rest);
        if head.is_empty() || !head.ends_with(".slice") || head == ".slice" {
            return last;
        }
        last = Some(head);
        rest = tail;
    }
}

fn split_component(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    match path.find('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (path, ""),
    }
}
