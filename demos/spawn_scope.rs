// Start a child and move it into its own transient scope of the user manager.
//
//   cargo run --example spawn_scope -- sleep 30

use std::process::Command;

use tmuxscope::{ProcSliceResolver, ScopeSpawner, ScopeTarget, UserBus};

fn main() {
    let mut args = std::env::args().skip(1);
    let program = args.next().unwrap_or_else(|| "sleep".to_string());
    let rest: Vec<String> = args.collect();
    let rest = if rest.is_empty() && program == "sleep" {
        vec!["30".to_string()]
    } else {
        rest
    };

    let mut child = match Command::new(&program).args(&rest).spawn() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to start {program}: {e}");
            std::process::exit(1);
        }
    };

    let spawner = ScopeSpawner::default();
    let target = ScopeTarget {
        pid: child.id(),
        parent_pid: std::process::id(),
    };
    let res = spawner.move_with(
        || UserBus::connect(spawner.options()),
        target,
        &ProcSliceResolver::new(&spawner.options().proc_root),
    );

    match res {
        Ok(p) => println!(
            "pid {} -> {} in {}{}",
            target.pid,
            p.unit,
            p.slice,
            if p.slice_is_fallback { " (fallback)" } else { "" }
        ),
        Err(e) => eprintln!("scope placement failed: {e}"),
    }

    let _ = child.wait();
}
