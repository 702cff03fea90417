// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS-level process-tree containment.

/// Configure a command so the kernel kills the child when this process
/// exits uncooperatively.
///
/// Linux: installs `PR_SET_PDEATHSIG(SIGKILL)` between fork and exec, then
/// re-checks the parent pid — if the parent already died in that window the
/// death signal would never fire, so the child exits immediately instead.
/// Other platforms: no-op.
pub fn prepare_command(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::prctl;
        use nix::sys::signal::Signal;
        use nix::unistd::{getppid, Pid};

        let parent = Pid::from_raw(std::process::id() as i32);
        unsafe {
            cmd.pre_exec(move || {
                let _ = prctl::set_pdeathsig(Signal::SIGKILL);
                if getppid() != parent {
                    nix::libc::_exit(1);
                }
                Ok(())
            });
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = cmd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepared_command_still_spawns_and_runs() {
        let mut cmd = tokio::process::Command::new("true");
        prepare_command(&mut cmd);
        let status = cmd.status().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn child_of_live_parent_is_not_killed() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("exit 7");
        prepare_command(&mut cmd);
        let status = cmd.status().await.unwrap();
        assert_eq!(status.code(), Some(7));
    }
}
