//! Native traced-process backend: fork, `PTRACE_TRACEME`, `execv`.
//!
//! All ptrace requests for a child must come from the thread that forked it,
//! so a session using this backend stays on one thread for its lifetime.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, info, warn};

use super::backend::{Backend, Registers, StopStatus, Tracee};
use super::resolver::{Addr2Line, DEFAULT_RESOLVER, DEFAULT_RESOLVER_TIMEOUT};
use crate::error::DebugError;

// ─── Tracee ──────────────────────────────────────────────────────────────────

pub struct PtraceTracee {
    pid: Pid,
    alive: bool,
}

impl PtraceTracee {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn wait(&mut self) -> Result<StopStatus, DebugError> {
        loop {
            let raw = wait_raw(self.pid)?;
            let Some(decoded) = decode_status(raw) else {
                debug!(raw, "ignoring wait status");
                continue;
            };
            if matches!(decoded, StopStatus::Exited(_) | StopStatus::Signaled(_)) {
                self.alive = false;
            }
            return Ok(decoded);
        }
    }
}

/// `waitpid` returning the raw status word. nix's `WaitStatus` only holds
/// signals it has a `Signal` variant for, which excludes the realtime range.
fn wait_raw(pid: Pid) -> Result<i32, Errno> {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, libc::__WALL) };
        match Errno::result(ret) {
            Ok(_) => return Ok(status),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Maps a raw wait status to a stop. `None` for statuses the session never
/// asked for (continued, ptrace event stops).
fn decode_status(raw: i32) -> Option<StopStatus> {
    if libc::WIFEXITED(raw) {
        Some(StopStatus::Exited(libc::WEXITSTATUS(raw)))
    } else if libc::WIFSIGNALED(raw) {
        Some(StopStatus::Signaled(libc::WTERMSIG(raw)))
    } else if libc::WIFSTOPPED(raw) {
        // Event stops carry extra bits above the signal byte.
        if raw >> 16 != 0 {
            return None;
        }
        match libc::WSTOPSIG(raw) {
            libc::SIGTRAP => Some(StopStatus::Trapped),
            sig => Some(StopStatus::Stopped(sig)),
        }
    } else {
        None
    }
}

impl Tracee for PtraceTracee {
    fn single_step(&mut self) -> Result<StopStatus, DebugError> {
        ptrace::step(self.pid, None)?;
        self.wait()
    }

    fn registers(&self) -> Result<Registers, DebugError> {
        let regs = ptrace::getregs(self.pid)?;
        Ok(Registers {
            rax: regs.rax,
            rbx: regs.rbx,
            rcx: regs.rcx,
            rdx: regs.rdx,
            rsi: regs.rsi,
            rdi: regs.rdi,
            rbp: regs.rbp,
            rsp: regs.rsp,
            r8: regs.r8,
            r9: regs.r9,
            r10: regs.r10,
            r11: regs.r11,
            r12: regs.r12,
            r13: regs.r13,
            r14: regs.r14,
            r15: regs.r15,
            rip: regs.rip,
            eflags: regs.eflags,
        })
    }

    fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        if let Err(e) = signal::kill(self.pid, Signal::SIGKILL) {
            warn!(pid = %self.pid, "kill failed: {e}");
        }
        if let Err(e) = wait_raw(self.pid) {
            warn!(pid = %self.pid, "reap failed: {e}");
        }
        self.alive = false;
        info!(pid = %self.pid, "target terminated");
    }
}

impl Drop for PtraceTracee {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct NativeBackend {
    pub resolver_program: String,
    pub resolver_timeout: Duration,
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self {
            resolver_program: DEFAULT_RESOLVER.into(),
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }
}

impl Backend for NativeBackend {
    type Tracee = PtraceTracee;
    type Resolver = Addr2Line;

    fn open_resolver(&mut self, executable: &Path) -> Result<Addr2Line, DebugError> {
        Addr2Line::spawn(&self.resolver_program, executable, self.resolver_timeout)
    }

    fn launch(
        &mut self,
        executable: &Path,
        output: OwnedFd,
    ) -> Result<(PtraceTracee, StopStatus), DebugError> {
        // Everything the child needs is prepared before fork: only
        // async-signal-safe calls may run between fork and exec.
        let path = CString::new(executable.as_os_str().as_bytes())
            .map_err(|_| DebugError::LaunchFailure("path contains a NUL byte".into()))?;
        let argv: [*const libc::c_char; 2] = [path.as_ptr(), std::ptr::null()];
        let out_fd = output.as_raw_fd();

        match unsafe { fork() } {
            Err(e) => Err(DebugError::LaunchFailure(format!("fork: {e}"))),
            Ok(ForkResult::Child) => unsafe {
                if libc::dup2(out_fd, libc::STDOUT_FILENO) < 0
                    || libc::dup2(out_fd, libc::STDERR_FILENO) < 0
                    || ptrace::traceme().is_err()
                {
                    libc::_exit(126);
                }
                libc::execv(path.as_ptr(), argv.as_ptr());
                libc::_exit(127);
            },
            Ok(ForkResult::Parent { child }) => {
                drop(output);
                info!(pid = %child, exe = %executable.display(), "target launched");
                let mut tracee = PtraceTracee {
                    pid: child,
                    alive: true,
                };
                let first = tracee.wait()?;
                Ok((tracee, first))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> i32 {
        code << 8
    }

    fn stopped(sig: i32) -> i32 {
        (sig << 8) | 0x7f
    }

    #[test]
    fn test_decode_exit() {
        assert_eq!(decode_status(exited(0)), Some(StopStatus::Exited(0)));
        assert_eq!(decode_status(exited(3)), Some(StopStatus::Exited(3)));
    }

    #[test]
    fn test_decode_trap_and_stop() {
        assert_eq!(decode_status(stopped(libc::SIGTRAP)), Some(StopStatus::Trapped));
        assert_eq!(
            decode_status(stopped(libc::SIGSEGV)),
            Some(StopStatus::Stopped(libc::SIGSEGV))
        );
    }

    #[test]
    fn test_decode_realtime_signals() {
        let rt = libc::SIGRTMIN();
        assert_eq!(decode_status(stopped(rt)), Some(StopStatus::Stopped(rt)));
        assert_eq!(decode_status(rt), Some(StopStatus::Signaled(rt)));
        assert_eq!(decode_status(34), Some(StopStatus::Signaled(34)));
    }

    #[test]
    fn test_decode_ignores_event_stops() {
        let exec_event = stopped(libc::SIGTRAP) | (libc::PTRACE_EVENT_EXEC << 16);
        assert_eq!(decode_status(exec_event), None);
        assert_eq!(decode_status(0xffff), None);
    }
}
