//! Capability seams between the session state machine and the OS.
//!
//! The session only ever talks to a traced child through [`Tracee`] and to the
//! symbol helper through [`LineLookup`]; [`Backend`] creates both. The native
//! implementation lives in `traced` and `resolver`.

use std::os::fd::OwnedFd;
use std::path::Path;

use crate::error::DebugError;

// ─── Stop status ─────────────────────────────────────────────────────────────

/// What `waitpid` reported after the child last ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopStatus {
    /// Stopped by the single-step (or post-exec) trap.
    Trapped,
    /// Stopped by any other signal; the child is still alive.
    Stopped(i32),
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
}

// ─── Registers ───────────────────────────────────────────────────────────────

/// x86-64 general purpose registers at a stop point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub eflags: u64,
}

impl Registers {
    pub fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    /// Name/value pairs in display order.
    pub fn named(&self) -> [(&'static str, u64); 18] {
        [
            ("rax", self.rax),
            ("rbx", self.rbx),
            ("rcx", self.rcx),
            ("rdx", self.rdx),
            ("rsi", self.rsi),
            ("rdi", self.rdi),
            ("rbp", self.rbp),
            ("rsp", self.rsp),
            ("r8", self.r8),
            ("r9", self.r9),
            ("r10", self.r10),
            ("r11", self.r11),
            ("r12", self.r12),
            ("r13", self.r13),
            ("r14", self.r14),
            ("r15", self.r15),
            ("rip", self.rip),
            ("eflags", self.eflags),
        ]
    }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

pub trait Tracee {
    /// Executes exactly one instruction and waits for the next stop.
    fn single_step(&mut self) -> Result<StopStatus, DebugError>;

    fn registers(&self) -> Result<Registers, DebugError>;

    /// Kills and reaps the child if it is still around. Idempotent.
    fn terminate(&mut self);
}

pub trait LineLookup {
    /// Source line for `addr`, or `None` when the helper does not know it.
    fn lookup(&mut self, addr: u64) -> Result<Option<u32>, DebugError>;

    /// Stops the helper. Idempotent.
    fn shutdown(&mut self);
}

pub trait Backend {
    type Tracee: Tracee;
    type Resolver: LineLookup;

    fn open_resolver(&mut self, executable: &Path) -> Result<Self::Resolver, DebugError>;

    /// Starts `executable` under trace with stdout and stderr redirected to
    /// `output`. Returns the child together with its first stop.
    fn launch(
        &mut self,
        executable: &Path,
        output: OwnedFd,
    ) -> Result<(Self::Tracee, StopStatus), DebugError>;
}
