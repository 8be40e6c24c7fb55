//! Signal delivery to registry-owned process groups.

use super::types::{KillSignal, RegistryError};

/// Send `signal` to the process group led by `pid`.
///
/// Returns `Ok(false)` when the group no longer exists (ESRCH): the process
/// finished on its own, which callers treat as success.
#[cfg(unix)]
pub fn send(pid: u32, signal: KillSignal) -> Result<bool, RegistryError> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        KillSignal::Term => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
        KillSignal::Int => Signal::SIGINT,
        KillSignal::Hup => Signal::SIGHUP,
    };

    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(RegistryError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn send(pid: u32, _signal: KillSignal) -> Result<bool, RegistryError> {
    Err(RegistryError::Signal {
        pid,
        reason: "process signals are only supported on unix".to_string(),
    })
}
