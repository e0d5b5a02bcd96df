//! OS hooks that keep a helper from outliving the attempt that spawned it.
//!
//! - `prepare_helper_child` runs in `pre_exec`: the helper leads its own process
//!   group and, for probes on Linux, receives `SIGKILL` if the broker dies first.
//! - `kill_process_group` takes down the helper together with anything it forked.
//!
//! On non-Unix platforms these are no-ops.

use std::io;

#[cfg(unix)]
pub(crate) fn prepare_helper_child(
    parent_pid: libc::pid_t,
    die_with_parent: bool,
) -> io::Result<()> {
    if unsafe { libc::setpgid(0, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }

    #[cfg(target_os = "linux")]
    if die_with_parent {
        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
            return Err(io::Error::last_os_error());
        }
        // The parent may have exited between fork and prctl.
        if unsafe { libc::getppid() } != parent_pid {
            unsafe {
                libc::raise(libc::SIGKILL);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = (parent_pid, die_with_parent);

    Ok(())
}

/// SIGKILL the helper's process group. A group that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn kill_process_group(process_group_id: u32) -> io::Result<()> {
    let pgid = process_group_id as libc::pid_t;
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_process_group_id: u32) -> io::Result<()> {
    Ok(())
}
