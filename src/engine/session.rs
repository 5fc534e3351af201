//! The debug session: one owned value holding everything about the loaded
//! program and its traced child.
//!
//! `NotStarted → Stopped ⇄ step_line → Exited | Error`
//!
//! Every operation leaves the session in one of the four states. Failures are
//! returned as [`DebugError`] *and* reflected in [`Session::state`] and the
//! error fields, so a caller may simply poll after each call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::backend::{Backend, LineLookup, Registers, StopStatus, Tracee};
use super::layout::AddressLayout;
use super::output::{DEFAULT_OUTPUT_CAPACITY, OutputCapture};
use super::resolver::{DEFAULT_RESOLVER, DEFAULT_RESOLVER_TIMEOUT};
use super::traced::NativeBackend;
use crate::error::{DebugError, signal_label};

pub const DEFAULT_STEP_BUDGET: u64 = 10_000;
pub const DEFAULT_STARTUP_BUDGET: u64 = 50_000_000;

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Stopped,
    Exited,
    Error,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::NotStarted => "Not Started",
            SessionState::Stopped => "Stopped",
            SessionState::Exited => "Exited",
            SessionState::Error => "Error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stable display label for a state.
pub fn state_string(state: SessionState) -> &'static str {
    state.label()
}

// ─── Step outcome ────────────────────────────────────────────────────────────

/// How a successful `step_line` call ended. The session state reflects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    LineChanged { line: u32 },
    Exited { code: i32 },
    Signaled { signal: i32 },
    /// Gave up after the budget without reaching a new line. Still `Stopped`.
    BudgetExhausted { steps: u64 },
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Instructions `step_line` may execute before giving up.
    pub step_budget: u64,
    /// Instructions `start` may spend inside the loader.
    pub startup_budget: u64,
    pub output_capacity: usize,
    pub resolver_program: String,
    pub resolver_timeout: Duration,
    pub layout: AddressLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            startup_budget: DEFAULT_STARTUP_BUDGET,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            resolver_program: DEFAULT_RESOLVER.into(),
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
            layout: AddressLayout::default(),
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub signal: Option<i32>,
}

pub struct Session<B: Backend = NativeBackend> {
    backend: B,
    config: SessionConfig,
    state: SessionState,

    executable: Option<PathBuf>,
    source: Option<PathBuf>,

    tracee: Option<B::Tracee>,
    resolver: Option<B::Resolver>,
    resolver_fault: Option<String>,

    registers: Option<Registers>,
    current_line: Option<u32>,
    instruction_count: u64,

    output: OutputCapture,
    fault: Option<Fault>,
}

impl Session<NativeBackend> {
    pub fn native(config: SessionConfig) -> Self {
        let backend = NativeBackend {
            resolver_program: config.resolver_program.clone(),
            resolver_timeout: config.resolver_timeout,
        };
        Session::new(backend, config)
    }
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        let output = OutputCapture::new(config.output_capacity);
        Self {
            backend,
            config,
            state: SessionState::NotStarted,
            executable: None,
            source: None,
            tracee: None,
            resolver: None,
            resolver_fault: None,
            registers: None,
            current_line: None,
            instruction_count: 0,
            output,
            fault: None,
        }
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Records the program and opens the line resolver for it. Any previous
    /// program is stopped first. Does not create the child.
    pub fn load(
        &mut self,
        executable: impl AsRef<Path>,
        source: impl AsRef<Path>,
    ) -> Result<(), DebugError> {
        let executable = executable.as_ref();
        self.stop();

        self.executable = None;
        self.source = None;
        self.fault = None;
        self.current_line = None;
        self.registers = None;

        if !executable.is_file() {
            return Err(DebugError::Load {
                path: executable.to_path_buf(),
                reason: "not a file".into(),
            });
        }

        let resolver = self.backend.open_resolver(executable)?;
        self.resolver = Some(resolver);
        self.executable = Some(executable.to_path_buf());
        self.source = Some(source.as_ref().to_path_buf());
        info!(exe = %executable.display(), "program loaded");
        Ok(())
    }

    /// Launches the program under trace and runs it up to its first source
    /// line. Allowed from `NotStarted` and `Exited` only.
    pub fn start(&mut self) -> Result<(), DebugError> {
        if !matches!(self.state, SessionState::NotStarted | SessionState::Exited) {
            return Err(DebugError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        if self.resolver.is_none() {
            return Err(DebugError::NotLoaded);
        }
        let Some(executable) = self.executable.clone() else {
            return Err(DebugError::NotLoaded);
        };

        self.release_child();
        self.fault = None;
        self.resolver_fault = None;
        self.current_line = None;
        self.registers = None;

        let write_end = match self.output.open() {
            Ok(fd) => fd,
            Err(e) => return Err(self.fail(e)),
        };
        let (tracee, first) = match self.backend.launch(&executable, write_end) {
            Ok(launched) => launched,
            Err(e) => return Err(self.fail(e)),
        };
        self.tracee = Some(tracee);

        let result = self.run_to_user_code(first);
        self.output.poll();
        result
    }

    /// Single-steps until the source line changes, the child stops running,
    /// or the step budget is spent.
    pub fn step_line(&mut self) -> Result<StepOutcome, DebugError> {
        if self.state != SessionState::Stopped {
            return Err(DebugError::InvalidState {
                operation: "step",
                state: self.state,
            });
        }

        let entry_line = self.current_line;
        let budget = self.config.step_budget;
        let mut outcome = StepOutcome::BudgetExhausted { steps: budget };

        for _ in 0..budget {
            let rip = match self.step_once()? {
                Ok(rip) => rip,
                Err(ended) => {
                    outcome = ended;
                    break;
                }
            };
            if self.config.layout.is_shared_code(rip) {
                continue;
            }
            if let Some(line) = self.current_line {
                if Some(line) != entry_line {
                    outcome = StepOutcome::LineChanged { line };
                    break;
                }
            }
        }

        self.output.poll();
        debug!(?outcome, count = self.instruction_count, "step finished");
        Ok(outcome)
    }

    /// Kills the child, closes every descriptor, shuts the resolver down and
    /// returns to `NotStarted`. Safe from any state, safe to repeat.
    pub fn stop(&mut self) {
        self.release_child();
        if let Some(mut resolver) = self.resolver.take() {
            resolver.shutdown();
            info!("line resolver stopped");
        }
        self.state = SessionState::NotStarted;
    }

    /// Pulls pending target output into the buffer.
    pub fn poll_output(&mut self) -> usize {
        self.output.poll()
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn current_line(&self) -> Option<u32> {
        self.current_line
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn registers(&self) -> Option<&Registers> {
        self.registers.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.fault.as_ref().map(|f| f.message.as_str())
    }

    pub fn error_signal(&self) -> Option<i32> {
        self.fault.as_ref().and_then(|f| f.signal)
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Last resolver failure since `start`; the line stays at its last value.
    pub fn resolver_fault(&self) -> Option<&str> {
        self.resolver_fault.as_deref()
    }

    pub fn output(&self) -> &[u8] {
        self.output.contents()
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    pub fn output_dropped(&self) -> usize {
        self.output.dropped()
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Loader fast-forward followed by settling on the first resolvable line.
    fn run_to_user_code(&mut self, first: StopStatus) -> Result<(), DebugError> {
        let layout = self.config.layout;
        let mut status = first;
        let mut loader_steps = 0u64;

        loop {
            if let Some(err) = self.end_of_run(status) {
                return Err(err);
            }
            let regs = self.tracee_ref()?.registers();
            let rip = match regs {
                Ok(regs) => regs.rip,
                Err(e) => return Err(self.fail(e)),
            };
            if layout.is_user_text(rip) {
                break;
            }
            if loader_steps >= self.config.startup_budget {
                return Err(self.fail(DebugError::StartupBudgetExhausted(loader_steps)));
            }
            let stepped = self.tracee_mut()?.single_step();
            status = match stepped {
                Ok(s) => s,
                Err(e) => return Err(self.fail(e)),
            };
            loader_steps += 1;
            self.output.poll();
        }
        debug!(loader_steps, "reached program text");

        let rip = match self.refresh() {
            Ok(rip) => rip,
            Err(e) => return Err(self.fail(e)),
        };
        self.state = SessionState::Stopped;

        // Settle: walk past startup code that has no line information, on
        // what is left of the startup budget. A failed resolver never
        // produces a line.
        let mut settled = !layout.is_shared_code(rip) && self.current_line.is_some();
        let mut budget = self.config.startup_budget.saturating_sub(loader_steps);
        while !settled && budget > 0 && self.resolver_fault.is_none() {
            budget -= 1;
            match self.step_once()? {
                Ok(rip) => {
                    settled = !layout.is_shared_code(rip) && self.current_line.is_some();
                }
                Err(StepOutcome::Exited { code }) => {
                    return Err(DebugError::UnexpectedExit { code });
                }
                Err(StepOutcome::Signaled { signal }) => {
                    return Err(DebugError::fatal_signal(signal));
                }
                Err(_) => break,
            }
        }

        info!(line = ?self.current_line, count = self.instruction_count, "target stopped");
        Ok(())
    }

    /// One instruction plus a refresh. The inner `Err` carries the outcome
    /// when the child stopped running normally; the outer one a trace failure.
    fn step_once(&mut self) -> Result<Result<u64, StepOutcome>, DebugError> {
        let stepped = self.tracee_mut()?.single_step();
        let status = match stepped {
            Ok(s) => s,
            Err(e) => return Err(self.fail(e)),
        };
        self.output.poll();

        match status {
            StopStatus::Trapped => {}
            StopStatus::Exited(code) => {
                self.mark_exited(code);
                return Ok(Err(StepOutcome::Exited { code }));
            }
            StopStatus::Signaled(signal) => {
                self.tracee = None;
                self.set_signal_fault(signal);
                return Ok(Err(StepOutcome::Signaled { signal }));
            }
            StopStatus::Stopped(signal) => {
                self.set_signal_fault(signal);
                return Ok(Err(StepOutcome::Signaled { signal }));
            }
        }

        match self.refresh() {
            Ok(rip) => Ok(Ok(rip)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Maps a terminal status seen during startup to session state.
    fn end_of_run(&mut self, status: StopStatus) -> Option<DebugError> {
        match status {
            StopStatus::Trapped => None,
            StopStatus::Exited(code) => {
                self.mark_exited(code);
                Some(DebugError::UnexpectedExit { code })
            }
            StopStatus::Signaled(signal) => {
                self.tracee = None;
                self.set_signal_fault(signal);
                Some(DebugError::fatal_signal(signal))
            }
            StopStatus::Stopped(signal) => {
                self.set_signal_fault(signal);
                Some(DebugError::fatal_signal(signal))
            }
        }
    }

    /// Re-reads registers and the source line. Returns the instruction pointer.
    fn refresh(&mut self) -> Result<u64, DebugError> {
        let regs = self.tracee_ref()?.registers()?;
        self.registers = Some(regs);
        self.instruction_count += 1;

        // Shared-library addresses are unknown to a helper bound to the
        // executable; the line would stay put anyway.
        if !self.config.layout.is_shared_code(regs.rip) {
            self.resolve_line(regs.rip);
        }
        Ok(regs.rip)
    }

    fn resolve_line(&mut self, addr: u64) {
        let Some(resolver) = self.resolver.as_mut() else {
            return;
        };
        match resolver.lookup(addr) {
            Ok(Some(line)) => self.current_line = Some(line),
            Ok(None) => {}
            Err(e) => {
                if self.resolver_fault.is_none() {
                    warn!("line resolution failed: {e}");
                }
                self.resolver_fault = Some(e.to_string());
            }
        }
    }

    fn tracee_ref(&self) -> Result<&B::Tracee, DebugError> {
        self.tracee.as_ref().ok_or(DebugError::NotLoaded)
    }

    fn tracee_mut(&mut self) -> Result<&mut B::Tracee, DebugError> {
        self.tracee.as_mut().ok_or(DebugError::NotLoaded)
    }

    fn mark_exited(&mut self, code: i32) {
        self.tracee = None;
        self.state = SessionState::Exited;
        info!(code, "target exited");
    }

    fn set_signal_fault(&mut self, signal: i32) {
        let message = signal_label(signal);
        warn!(signal, "target stopped by {message}");
        self.fault = Some(Fault {
            message,
            signal: Some(signal),
        });
        self.state = SessionState::Error;
    }

    /// Puts the session into `Error` for a non-signal failure.
    fn fail(&mut self, err: DebugError) -> DebugError {
        match &err {
            DebugError::FatalSignal { .. } | DebugError::UnexpectedExit { .. } => {}
            other => {
                self.fault = Some(Fault {
                    message: other.to_string(),
                    signal: None,
                });
                self.state = SessionState::Error;
            }
        }
        err
    }

    /// Kills any child and closes its pipe. Leaves resolver and state alone.
    fn release_child(&mut self) {
        if let Some(mut tracee) = self.tracee.take() {
            tracee.terminate();
        }
        self.output.close();
        self.output.clear();
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::{HashMap, VecDeque};
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::rc::Rc;
    use tempfile::NamedTempFile;

    const LOADER: u64 = 0x7fff_f7fd_0100;
    const LIBC: u64 = 0x7fff_f7e2_0000;
    const ENTRY: u64 = 0x401040;
    const MAIN: u64 = 0x401126;

    // ── Scripted backend ─────────────────────────────────────────────────────

    #[derive(Clone, Copy, Debug)]
    enum Event {
        At(u64),
        Status(StopStatus),
    }

    #[derive(Clone, Default)]
    struct Probe {
        launches: Rc<Cell<u32>>,
        kills: Rc<Cell<u32>>,
        shutdowns: Rc<Cell<u32>>,
        lookups: Rc<Cell<u32>>,
    }

    struct FakeTracee {
        rip: u64,
        events: VecDeque<Event>,
        alive: bool,
        probe: Probe,
    }

    impl Tracee for FakeTracee {
        fn single_step(&mut self) -> Result<StopStatus, DebugError> {
            match self.events.pop_front() {
                Some(Event::At(rip)) => {
                    self.rip = rip;
                    Ok(StopStatus::Trapped)
                }
                Some(Event::Status(status)) => {
                    if matches!(status, StopStatus::Exited(_) | StopStatus::Signaled(_)) {
                        self.alive = false;
                    }
                    Ok(status)
                }
                None => {
                    self.alive = false;
                    Ok(StopStatus::Exited(0))
                }
            }
        }

        fn registers(&self) -> Result<Registers, DebugError> {
            Ok(Registers {
                rip: self.rip,
                ..Default::default()
            })
        }

        fn terminate(&mut self) {
            if self.alive {
                self.alive = false;
                self.probe.kills.set(self.probe.kills.get() + 1);
            }
        }
    }

    impl Drop for FakeTracee {
        fn drop(&mut self) {
            self.terminate();
        }
    }

    struct FakeResolver {
        lines: HashMap<u64, u32>,
        broken: bool,
        probe: Probe,
    }

    impl LineLookup for FakeResolver {
        fn lookup(&mut self, addr: u64) -> Result<Option<u32>, DebugError> {
            self.probe.lookups.set(self.probe.lookups.get() + 1);
            if self.broken {
                return Err(DebugError::ProtocolFailure("helper exited".into()));
            }
            Ok(self.lines.get(&addr).copied())
        }

        fn shutdown(&mut self) {
            self.probe.shutdowns.set(self.probe.shutdowns.get() + 1);
        }
    }

    struct FakeBackend {
        first: StopStatus,
        events: Vec<Event>,
        output: Vec<u8>,
        lines: HashMap<u64, u32>,
        broken_resolver: bool,
        probe: Probe,
    }

    impl Backend for FakeBackend {
        type Tracee = FakeTracee;
        type Resolver = FakeResolver;

        fn open_resolver(&mut self, _executable: &Path) -> Result<FakeResolver, DebugError> {
            Ok(FakeResolver {
                lines: self.lines.clone(),
                broken: self.broken_resolver,
                probe: self.probe.clone(),
            })
        }

        fn launch(
            &mut self,
            _executable: &Path,
            output: OwnedFd,
        ) -> Result<(FakeTracee, StopStatus), DebugError> {
            self.probe.launches.set(self.probe.launches.get() + 1);
            let mut pipe = File::from(output);
            pipe.write_all(&self.output).unwrap();
            let tracee = FakeTracee {
                rip: LOADER,
                events: self.events.iter().copied().collect(),
                alive: true,
                probe: self.probe.clone(),
            };
            Ok((tracee, self.first))
        }
    }

    /// Loader → `_start` (no line info) → `main` at line 5, then `program`.
    fn backend(program: &[Event]) -> FakeBackend {
        let mut events = vec![
            Event::At(LOADER + 4),
            Event::At(LIBC),
            Event::At(ENTRY),
            Event::At(ENTRY + 4),
            Event::At(MAIN),
        ];
        events.extend_from_slice(program);
        FakeBackend {
            first: StopStatus::Trapped,
            events,
            output: Vec::new(),
            lines: HashMap::from([
                (MAIN, 5),
                (MAIN + 4, 5),
                (MAIN + 10, 6),
                (MAIN + 20, 7),
                (MAIN + 30, 8),
                (LIBC + 0x40, 42),
            ]),
            broken_resolver: false,
            probe: Probe::default(),
        }
    }

    fn session_with(
        backend: FakeBackend,
        config: SessionConfig,
    ) -> (Session<FakeBackend>, Probe, NamedTempFile) {
        let exe = NamedTempFile::new().unwrap();
        let probe = backend.probe.clone();
        let mut session = Session::new(backend, config);
        session.load(exe.path(), "/tmp/prog.c").unwrap();
        (session, probe, exe)
    }

    fn started(program: &[Event]) -> (Session<FakeBackend>, Probe, NamedTempFile) {
        let (mut session, probe, exe) = session_with(backend(program), SessionConfig::default());
        session.start().unwrap();
        (session, probe, exe)
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn test_new_session_is_blank() {
        let session = Session::new(backend(&[]), SessionConfig::default());
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(session.instruction_count(), 0);
        assert_eq!(session.output_len(), 0);
        assert!(session.error_message().is_none());
        assert!(session.error_signal().is_none());
        assert!(session.current_line().is_none());
        assert!(session.registers().is_none());
        assert!(!session.is_loaded());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(state_string(SessionState::NotStarted), "Not Started");
        assert_eq!(state_string(SessionState::Stopped), "Stopped");
        assert_eq!(state_string(SessionState::Exited), "Exited");
        assert_eq!(state_string(SessionState::Error), "Error");
    }

    #[test]
    fn test_start_requires_load() {
        let mut session = Session::new(backend(&[]), SessionConfig::default());
        assert!(matches!(session.start(), Err(DebugError::NotLoaded)));
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_load_rejects_missing_executable() {
        let mut session = Session::new(backend(&[]), SessionConfig::default());
        let err = session.load("/nonexistent/prog", "/tmp/prog.c").unwrap_err();
        assert!(matches!(err, DebugError::Load { .. }));
        assert!(!session.is_loaded());
        assert!(session.executable().is_none());
    }

    #[test]
    fn test_load_records_paths() {
        let (session, probe, exe) = session_with(backend(&[]), SessionConfig::default());
        assert!(session.is_loaded());
        assert_eq!(session.executable(), Some(exe.path()));
        assert_eq!(session.source(), Some(Path::new("/tmp/prog.c")));
        assert_eq!(probe.launches.get(), 0);
        assert_eq!(session.state(), SessionState::NotStarted);
    }

    #[test]
    fn test_start_stops_on_first_line_of_main() {
        let (session, probe, _exe) = started(&[]);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), Some(5));
        assert_eq!(session.registers().map(|r| r.rip), Some(MAIN));
        assert!(session.instruction_count() > 0);
        assert_eq!(probe.launches.get(), 1);
    }

    #[test]
    fn test_loader_addresses_are_never_resolved() {
        let (_session, probe, _exe) = started(&[]);
        // ENTRY, ENTRY + 4 and MAIN only.
        assert_eq!(probe.lookups.get(), 3);
    }

    #[test]
    fn test_step_line_reaches_next_line() {
        let (mut session, _probe, _exe) =
            started(&[Event::At(MAIN + 4), Event::At(MAIN + 10), Event::At(MAIN + 20)]);
        let before = session.instruction_count();

        let outcome = session.step_line().unwrap();
        assert_eq!(outcome, StepOutcome::LineChanged { line: 6 });
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), Some(6));
        assert_eq!(session.instruction_count(), before + 2);

        assert_eq!(
            session.step_line().unwrap(),
            StepOutcome::LineChanged { line: 7 }
        );
    }

    #[test]
    fn test_shared_code_does_not_end_a_step() {
        let (mut session, _probe, _exe) = started(&[
            Event::At(LIBC + 0x40),
            Event::At(LIBC + 0x44),
            Event::At(MAIN + 10),
        ]);
        let outcome = session.step_line().unwrap();
        assert_eq!(outcome, StepOutcome::LineChanged { line: 6 });
    }

    #[test]
    fn test_budget_exhaustion_keeps_stopped() {
        let spin: Vec<Event> = (0..100).map(|_| Event::At(MAIN + 4)).collect();
        let config = SessionConfig {
            step_budget: 40,
            ..SessionConfig::default()
        };
        let (mut session, _probe, _exe) = session_with(backend(&spin), config);
        session.start().unwrap();
        let before = session.instruction_count();

        let outcome = session.step_line().unwrap();
        assert_eq!(outcome, StepOutcome::BudgetExhausted { steps: 40 });
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), Some(5));
        assert_eq!(session.instruction_count(), before + 40);
        assert!(session.error_message().is_none());
    }

    #[test]
    fn test_unresolved_address_keeps_last_line() {
        let (mut session, _probe, _exe) =
            started(&[Event::At(0x401300), Event::At(MAIN + 20)]);
        // 0x401300 has no line: the line stays at 5 and stepping goes on.
        let outcome = session.step_line().unwrap();
        assert_eq!(outcome, StepOutcome::LineChanged { line: 7 });
    }

    #[test]
    fn test_exit_during_step() {
        let mut b = backend(&[Event::At(MAIN + 4), Event::Status(StopStatus::Exited(0))]);
        b.output = b"one\ntwo\nthree\nfour\n".to_vec();
        let (mut session, probe, _exe) = session_with(b, SessionConfig::default());
        session.start().unwrap();

        let outcome = session.step_line().unwrap();
        assert_eq!(outcome, StepOutcome::Exited { code: 0 });
        assert_eq!(session.state(), SessionState::Exited);
        assert_eq!(session.output(), b"one\ntwo\nthree\nfour\n");
        assert_eq!(probe.kills.get(), 0);

        assert!(matches!(
            session.step_line(),
            Err(DebugError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_restart_after_exit() {
        let (mut session, probe, _exe) = started(&[
            Event::At(MAIN + 10),
            Event::At(MAIN + 30),
            Event::Status(StopStatus::Exited(3)),
        ]);
        assert_eq!(
            session.step_line().unwrap(),
            StepOutcome::LineChanged { line: 6 }
        );
        assert_eq!(
            session.step_line().unwrap(),
            StepOutcome::LineChanged { line: 8 }
        );
        assert_eq!(
            session.step_line().unwrap(),
            StepOutcome::Exited { code: 3 }
        );
        assert_eq!(session.current_line(), Some(8));

        // The old run's line must not make `_start` look settled.
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), Some(5));
        assert_eq!(session.registers().map(|r| r.rip), Some(MAIN));
        assert_eq!(probe.launches.get(), 2);
    }

    #[test]
    fn test_small_step_budget_still_settles_in_main() {
        let mut b = backend(&[Event::At(MAIN + 10)]);
        // A long libc start path between `_start` and `main`.
        let prologue: Vec<Event> = (0..500).map(|i| Event::At(LIBC + 0x100 + i)).collect();
        b.events.splice(4..4, prologue);
        let config = SessionConfig {
            step_budget: 2,
            ..SessionConfig::default()
        };
        let (mut session, _probe, _exe) = session_with(b, config);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), Some(5));
        assert_eq!(session.registers().map(|r| r.rip), Some(MAIN));

        assert_eq!(
            session.step_line().unwrap(),
            StepOutcome::LineChanged { line: 6 }
        );
    }

    #[test]
    fn test_settling_is_bounded_by_startup_budget() {
        let mut b = backend(&[]);
        b.events.splice(4..4, (0..50).map(|i| Event::At(LIBC + 0x100 + i)));
        // Three loader steps, then 19 left for settling: not enough for `main`.
        let config = SessionConfig {
            startup_budget: 22,
            ..SessionConfig::default()
        };
        let (mut session, _probe, _exe) = session_with(b, config);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.current_line().is_none());
        assert!(session.config().layout.is_shared_code(session.registers().unwrap().rip));
    }

    #[test]
    fn test_segfault_during_step() {
        let (mut session, probe, _exe) = started(&[
            Event::At(MAIN + 4),
            Event::Status(StopStatus::Stopped(libc::SIGSEGV)),
        ]);
        let outcome = session.step_line().unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Signaled {
                signal: libc::SIGSEGV
            }
        );
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error_message(), Some("segfault"));
        assert_eq!(session.error_signal(), Some(libc::SIGSEGV));

        // Terminal until stopped.
        assert!(session.step_line().is_err());
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Error);

        session.stop();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert_eq!(probe.kills.get(), 1);
    }

    #[test]
    fn test_killed_by_signal_during_step() {
        let (mut session, probe, _exe) =
            started(&[Event::Status(StopStatus::Signaled(libc::SIGABRT))]);
        session.step_line().unwrap();
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error_message(), Some("aborted"));
        assert_eq!(session.error_signal(), Some(libc::SIGABRT));
        session.stop();
        // Already dead: nothing to kill.
        assert_eq!(probe.kills.get(), 0);
    }

    #[test]
    fn test_other_signal_label() {
        let (mut session, _probe, _exe) =
            started(&[Event::Status(StopStatus::Stopped(libc::SIGUSR1))]);
        session.step_line().unwrap();
        assert_eq!(
            session.error_message(),
            Some(format!("signal {}", libc::SIGUSR1).as_str())
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut session, probe, _exe) = started(&[]);
        let line = session.current_line();
        let count = session.instruction_count();

        let err = session.start().unwrap_err();
        assert!(matches!(
            err,
            DebugError::InvalidState {
                operation: "start",
                state: SessionState::Stopped
            }
        ));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.current_line(), line);
        assert_eq!(session.instruction_count(), count);
        assert_eq!(probe.launches.get(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut session, probe, _exe) = started(&[]);
        session.stop();
        assert_eq!(session.state(), SessionState::NotStarted);
        session.stop();
        assert_eq!(session.state(), SessionState::NotStarted);

        assert_eq!(probe.kills.get(), 1);
        assert_eq!(probe.shutdowns.get(), 1);
        assert_eq!(session.output_len(), 0);
        assert!(!session.is_loaded());
    }

    #[test]
    fn test_stop_then_start_needs_reload() {
        let (mut session, _probe, exe) = started(&[]);
        session.stop();
        assert!(matches!(session.start(), Err(DebugError::NotLoaded)));

        session.load(exe.path(), "/tmp/prog.c").unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_exit_before_user_code() {
        let mut b = backend(&[]);
        b.events = vec![
            Event::At(LOADER + 4),
            Event::Status(StopStatus::Exited(127)),
        ];
        let (mut session, _probe, _exe) = session_with(b, SessionConfig::default());
        let err = session.start().unwrap_err();
        assert!(matches!(err, DebugError::UnexpectedExit { code: 127 }));
        assert_eq!(session.state(), SessionState::Exited);
    }

    #[test]
    fn test_signal_before_user_code() {
        let mut b = backend(&[]);
        b.events = vec![Event::Status(StopStatus::Stopped(libc::SIGILL))];
        let (mut session, _probe, _exe) = session_with(b, SessionConfig::default());
        let err = session.start().unwrap_err();
        assert!(matches!(err, DebugError::FatalSignal { .. }));
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(session.error_message(), Some("illegal insn"));
    }

    #[test]
    fn test_startup_budget() {
        let mut b = backend(&[]);
        b.events = (0..10).map(|i| Event::At(LOADER + i)).collect();
        let config = SessionConfig {
            startup_budget: 3,
            ..SessionConfig::default()
        };
        let (mut session, _probe, _exe) = session_with(b, config);
        let err = session.start().unwrap_err();
        assert!(matches!(err, DebugError::StartupBudgetExhausted(3)));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.error_message().is_some());
        assert!(session.error_signal().is_none());
    }

    #[test]
    fn test_broken_resolver_does_not_stop_the_child() {
        let mut b = backend(&[Event::At(MAIN + 4), Event::At(MAIN + 10)]);
        b.broken_resolver = true;
        // Settling gives up at `_start` once the resolver has failed.
        let (mut session, _probe, _exe) = session_with(b, SessionConfig::default());
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.current_line().is_none());
        assert!(session.resolver_fault().is_some());

        let outcome = session.step_line().unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::BudgetExhausted { .. } | StepOutcome::Exited { .. }
        ));
        assert_ne!(session.state(), SessionState::Error);
    }

    #[test]
    fn test_output_is_bounded() {
        let mut b = backend(&[]);
        b.output = b"0123456789abcdef".to_vec();
        let config = SessionConfig {
            output_capacity: 8,
            ..SessionConfig::default()
        };
        let (mut session, _probe, _exe) = session_with(b, config);
        session.start().unwrap();
        session.poll_output();
        assert_eq!(session.output(), b"01234567");
        assert_eq!(session.output_dropped(), 8);
    }

    #[test]
    fn test_reload_resets_session() {
        let (mut session, probe, exe) =
            started(&[Event::Status(StopStatus::Stopped(libc::SIGFPE))]);
        session.step_line().unwrap();
        assert_eq!(session.error_message(), Some("FPE"));

        session.load(exe.path(), "/tmp/other.c").unwrap();
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.error_message().is_none());
        assert!(session.current_line().is_none());
        assert_eq!(session.source(), Some(Path::new("/tmp/other.c")));
        assert_eq!(probe.shutdowns.get(), 1);
        assert_eq!(probe.kills.get(), 1);
    }
}
