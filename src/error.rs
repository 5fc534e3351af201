use std::path::PathBuf;

use crate::engine::SessionState;

// ─── Debugger errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("no program loaded")]
    NotLoaded,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("launch failed: {0}")]
    LaunchFailure(String),

    #[error("program exited with code {code}")]
    UnexpectedExit { code: i32 },

    #[error("{label}")]
    FatalSignal { signal: i32, label: String },

    #[error("line resolver: {0}")]
    ProtocolFailure(String),

    #[error("trace: {0}")]
    Trace(#[from] nix::Error),

    #[error("loader not finished after {0} instructions")]
    StartupBudgetExhausted(u64),
}

impl DebugError {
    pub fn fatal_signal(signal: i32) -> Self {
        DebugError::FatalSignal {
            signal,
            label: signal_label(signal),
        }
    }
}

// ─── Build errors (toolchain) ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("could not run {compiler}: {source}")]
    Spawn {
        compiler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compilation failed ({status})")]
    Failed { status: String, diagnostics: String },
}

// ─── Signal labels ───────────────────────────────────────────────────────────

/// Short label shown for a signal that stopped or killed the target.
pub fn signal_label(signal: i32) -> String {
    match signal {
        libc::SIGSEGV => "segfault".into(),
        libc::SIGABRT => "aborted".into(),
        libc::SIGFPE => "FPE".into(),
        libc::SIGILL => "illegal insn".into(),
        libc::SIGBUS => "bus error".into(),
        n => format!("signal {n}"),
    }
}
