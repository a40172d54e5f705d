// Runs in the forked engine between fork and exec. Only async-signal-safe
// calls are allowed here.

/// Asks the kernel to SIGTERM the engine when the bridge process dies.
///
/// `bridge_pid` is captured before fork; if the bridge is already gone by the
/// time the child gets here, the child terminates itself right away.
#[cfg(target_os = "linux")]
pub(crate) fn set_parent_death(bridge_pid: libc::pid_t) {
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        if libc::getppid() != bridge_pid {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
    }
}
