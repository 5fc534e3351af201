use std::path::PathBuf;

use crate::engine::{Backend, Fault, Registers, Session, SessionState};

// ─── Session snapshot ────────────────────────────────────────────────────────

/// Everything the window shows about a session, copied out by the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub current_line: Option<u32>,
    pub instruction_count: u64,
    pub registers: Option<Registers>,
    pub fault: Option<Fault>,
    pub resolver_fault: Option<String>,
    pub output: String,
    pub output_dropped: usize,
}

impl SessionSnapshot {
    pub fn capture<B: Backend>(session: &Session<B>) -> Self {
        Self {
            state: session.state(),
            current_line: session.current_line(),
            instruction_count: session.instruction_count(),
            registers: session.registers().copied(),
            fault: session.fault().cloned(),
            resolver_fault: session.resolver_fault().map(str::to_owned),
            output: String::from_utf8_lossy(session.output()).into_owned(),
            output_dropped: session.output_dropped(),
        }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::NotStarted,
            current_line: None,
            instruction_count: 0,
            registers: None,
            fault: None,
            resolver_fault: None,
            output: String::new(),
            output_dropped: 0,
        }
    }
}

// ─── Build log ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildLog {
    pub command: String,
    pub diagnostics: String,
    pub failed: bool,
}

// ─── Program state ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProgramState {
    #[default]
    NoProgramLoaded,
    Building,
    BuildFailed,
    Loaded,
}

// ─── Persistent state (survives runs) ────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct PersistentState {
    pub executable: Option<PathBuf>,
    pub source: Option<PathBuf>,
}

// ─── Top-level state ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct DebuggerState {
    pub program: ProgramState,
    pub session: SessionSnapshot,
    pub build: Option<BuildLog>,
    pub persistent: PersistentState,
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum StateEvent {
    BuildStarted { source: PathBuf },
    BuildFinished { log: BuildLog },
    ProgramLoaded { executable: PathBuf, source: PathBuf },
    SessionUpdated(SessionSnapshot),
    ProgramUnloaded,
}

#[derive(Clone, Debug)]
pub enum UiEvent {
    ConsoleOutput(String),
    DebuggerError(String),
}

#[derive(Clone, Debug)]
pub enum DebuggerEvent {
    State(StateEvent),
    Ui(UiEvent),
}

// ─── impl DebuggerState ──────────────────────────────────────────────────────

impl DebuggerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only place the state is mutated.
    pub fn apply(&mut self, event: StateEvent) {
        match event {
            StateEvent::BuildStarted { source } => {
                self.program = ProgramState::Building;
                self.persistent.source = Some(source);
                self.persistent.executable = None;
                self.session = SessionSnapshot::default();
                self.build = None;
            }

            StateEvent::BuildFinished { log } => {
                if log.failed {
                    self.program = ProgramState::BuildFailed;
                }
                self.build = Some(log);
            }

            StateEvent::ProgramLoaded { executable, source } => {
                self.program = ProgramState::Loaded;
                self.persistent.executable = Some(executable);
                self.persistent.source = Some(source);
                self.session = SessionSnapshot::default();
            }

            StateEvent::SessionUpdated(snapshot) => {
                self.session = snapshot;
            }

            StateEvent::ProgramUnloaded => {
                self.program = ProgramState::NoProgramLoaded;
                self.session = SessionSnapshot::default();
                self.build = None;
            }
        }
    }

    // ── Query helpers ────────────────────────────────────────────────────────

    pub fn is_loaded(&self) -> bool {
        self.program == ProgramState::Loaded
    }

    pub fn can_start(&self) -> bool {
        self.is_loaded()
            && matches!(
                self.session.state,
                SessionState::NotStarted | SessionState::Exited
            )
    }

    pub fn can_step(&self) -> bool {
        self.is_loaded() && self.session.state == SessionState::Stopped
    }

    pub fn current_line(&self) -> Option<u32> {
        match self.session.state {
            SessionState::NotStarted => None,
            _ => self.session.current_line,
        }
    }

    pub fn state_label(&self) -> &'static str {
        match self.program {
            ProgramState::NoProgramLoaded => "No program loaded",
            ProgramState::Building => "Building",
            ProgramState::BuildFailed => "Build failed",
            ProgramState::Loaded => self.session.state.label(),
        }
    }

    pub fn error_line(&self) -> Option<String> {
        self.session.fault.as_ref().map(|fault| match fault.signal {
            Some(sig) => format!("{} (signal {sig})", fault.message),
            None => fault.message.clone(),
        })
    }
}
