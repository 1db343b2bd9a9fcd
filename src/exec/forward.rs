use crate::config::types::{BootError, Result};
use crate::exec::command::WorkerCommand;
use nix::errno::Errno;
use nix::sys::signal::{kill, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
/// Signal-forwarding supervisor for images that run bootbox as PID 1
///
/// The supervisor never installs handlers. Forwarded signals and SIGCHLD are
/// blocked before the worker is spawned and collected synchronously with
/// `sigwait`, so nothing is delivered between spawn and the first wait.
/// The worker restores the original mask before exec.
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Signals relayed to the worker unchanged
pub const FORWARDED_SIGNALS: [Signal; 6] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGQUIT,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Exit status offset for a worker killed by a signal (shell convention)
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// A running worker plus the signal mask that was in force before it started
pub struct Supervisor {
    child: Pid,
    waited: SigSet,
    previous: SigSet,
}

impl Supervisor {
    /// Block the supervised signal set and spawn the worker.
    ///
    /// Must be called from a single-threaded process: signals directed at
    /// the process are otherwise delivered to threads that do not block them.
    pub fn spawn(command: &WorkerCommand) -> Result<Self> {
        let mut waited = SigSet::empty();
        for signal in FORWARDED_SIGNALS {
            waited.add(signal);
        }
        waited.add(Signal::SIGCHLD);

        let previous = waited
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .map_err(|e| start_failure("block signals", e))?;

        match spawn_worker(command, previous) {
            Ok(child) => {
                log::info!(
                    "Supervising worker pid {} ({})",
                    child,
                    command.program.display()
                );
                Ok(Self {
                    child,
                    waited,
                    previous,
                })
            }
            Err(e) => {
                restore_mask(previous);
                Err(e)
            }
        }
    }

    pub fn child_pid(&self) -> Pid {
        self.child
    }

    /// Forward signals and reap children until the worker exits.
    ///
    /// Returns the worker's exit code, or 128 + signal number when the worker
    /// was killed by a signal. Orphans reparented to us are reaped silently.
    pub fn wait(self) -> Result<i32> {
        let result = self.wait_loop();
        restore_mask(self.previous);
        result
    }

    fn wait_loop(&self) -> Result<i32> {
        loop {
            let signal = match self.waited.wait() {
                Ok(signal) => signal,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(start_failure("sigwait", e)),
            };

            if signal == Signal::SIGCHLD {
                if let Some(code) = self.reap()? {
                    return Ok(code);
                }
                continue;
            }

            log::info!("Forwarding {} to worker pid {}", signal, self.child);
            match kill(self.child, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => log::warn!("Failed to forward {} to {}: {}", signal, self.child, e),
            }
        }
    }

    /// Drain every exited child; SIGCHLD coalesces, so one signal may stand
    /// for several exits.
    fn reap(&self) -> Result<Option<i32>> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) if pid == self.child => {
                    log::info!("Worker pid {} exited with status {}", pid, code);
                    return Ok(Some(code));
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) if pid == self.child => {
                    log::info!("Worker pid {} killed by {}", pid, signal);
                    return Ok(Some(SIGNAL_EXIT_BASE + signal as i32));
                }
                Ok(WaitStatus::StillAlive) => return Ok(None),
                Ok(status) => log::debug!("Reaped orphan: {:?}", status),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    return Err(BootError::WorkerStartFailure(format!(
                        "worker pid {} vanished without an exit status",
                        self.child
                    )));
                }
                Err(e) => return Err(start_failure("waitpid", e)),
            }
        }
    }
}

fn spawn_worker(command: &WorkerCommand, child_mask: SigSet) -> Result<Pid> {
    let (argv0, args) = command
        .argv
        .split_first()
        .ok_or_else(|| BootError::WorkerStartFailure("entrypoint is empty".to_string()))?;

    let mut cmd = Command::new(&command.program);
    cmd.arg0(argv0)
        .args(args)
        .current_dir(&command.workdir)
        .env_clear()
        .envs(&command.env);

    // SAFETY: only pthread_sigmask runs between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            child_mask
                .thread_set_mask()
                .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }

    let child = cmd.spawn().map_err(|e| {
        BootError::WorkerStartFailure(format!(
            "failed to spawn {}: {}",
            command.program.display(),
            e
        ))
    })?;

    // Reaped through waitpid; the std handle is not used again.
    Ok(Pid::from_raw(child.id() as i32))
}

fn restore_mask(previous: SigSet) {
    if let Err(e) = previous.thread_set_mask() {
        log::warn!("Failed to restore signal mask: {}", e);
    }
}

fn start_failure(op: &str, err: Errno) -> BootError {
    BootError::WorkerStartFailure(format!("{} failed: {}", op, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Supervision itself is exercised through the bootbox binary in
    // tests/worker_start.rs; the test harness is multi-threaded, so SIGCHLD
    // could land on another thread here.

    #[test]
    fn forwarded_set_covers_termination_signals() {
        assert!(FORWARDED_SIGNALS.contains(&Signal::SIGTERM));
        assert!(FORWARDED_SIGNALS.contains(&Signal::SIGINT));
        assert!(!FORWARDED_SIGNALS.contains(&Signal::SIGKILL));
        assert!(!FORWARDED_SIGNALS.contains(&Signal::SIGCHLD));
    }

    #[test]
    fn signal_exit_codes_follow_shell_convention() {
        assert_eq!(SIGNAL_EXIT_BASE + Signal::SIGTERM as i32, 143);
        assert_eq!(SIGNAL_EXIT_BASE + Signal::SIGKILL as i32, 137);
    }
}
