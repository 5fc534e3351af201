//! Background thread that owns the session and turns window commands into
//! state events.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::engine::{Backend, NativeBackend, Session, StepOutcome};
use crate::error::{BuildError, signal_label};
use crate::state::{BuildLog, DebuggerEvent, SessionSnapshot, StateEvent, UiEvent};
use crate::toolchain::Toolchain;
use crate::ui::command::Command;

pub struct Worker<B: Backend = NativeBackend> {
    session: Session<B>,
    toolchain: Toolchain,
    events: Sender<DebuggerEvent>,
    // Last program handed to `load`, kept so Run after Stop can reload it.
    program: Option<(PathBuf, PathBuf)>,
}

impl Worker<NativeBackend> {
    pub fn native(config: &AppConfig, events: Sender<DebuggerEvent>) -> Self {
        Self::new(
            Session::native(config.session.clone()),
            config.toolchain.clone(),
            events,
        )
    }
}

impl<B: Backend> Worker<B> {
    pub fn new(session: Session<B>, toolchain: Toolchain, events: Sender<DebuggerEvent>) -> Self {
        Self {
            session,
            toolchain,
            events,
            program: None,
        }
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    /// Runs one command. Returns `false` once the loop should end.
    pub fn handle(&mut self, command: Command) -> bool {
        debug!(?command, "command");
        match command {
            Command::Debug { source } => self.debug(source),
            Command::Load { executable, source } => self.load(executable, source),
            Command::Start => self.start(),
            Command::StepLine => self.step_line(),
            Command::Stop => {
                self.session.stop();
                self.console("stopped");
                self.publish();
            }
            Command::Quit => return false,
        }
        true
    }

    /// Drains output a running child produced between commands.
    pub fn idle(&mut self) {
        if self.session.poll_output() > 0 {
            self.publish();
        }
    }

    pub fn shutdown(&mut self) {
        self.session.stop();
        info!("worker finished");
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    fn debug(&mut self, source: PathBuf) {
        self.session.stop();
        self.program = None;
        self.send_state(StateEvent::BuildStarted {
            source: source.clone(),
        });

        match self.toolchain.build(&source) {
            Ok(build) => {
                self.send_state(StateEvent::BuildFinished {
                    log: BuildLog {
                        command: build.command,
                        diagnostics: build.diagnostics,
                        failed: false,
                    },
                });
                self.load(build.executable, source);
            }
            Err(e) => {
                let diagnostics = match &e {
                    BuildError::Failed { diagnostics, .. } => diagnostics.clone(),
                    BuildError::Spawn { .. } => String::new(),
                };
                warn!("build failed: {e}");
                self.send_state(StateEvent::BuildFinished {
                    log: BuildLog {
                        command: self.toolchain.compiler.clone(),
                        diagnostics,
                        failed: true,
                    },
                });
                self.error(e.to_string());
            }
        }
    }

    fn load(&mut self, executable: PathBuf, source: PathBuf) {
        match self.session.load(&executable, &source) {
            Ok(()) => {
                self.console(format!("loaded {}", executable.display()));
                self.send_state(StateEvent::ProgramLoaded {
                    executable: executable.clone(),
                    source: source.clone(),
                });
                self.program = Some((executable, source));
            }
            Err(e) => {
                self.program = None;
                self.send_state(StateEvent::ProgramUnloaded);
                self.error(e.to_string());
            }
        }
    }

    fn start(&mut self) {
        if !self.session.is_loaded() {
            if let Some((executable, source)) = self.program.clone() {
                if let Err(e) = self.session.load(&executable, &source) {
                    self.error(e.to_string());
                    self.publish();
                    return;
                }
            }
        }

        match self.session.start() {
            Ok(()) => match self.session.current_line() {
                Some(line) => self.console(format!("started at line {line}")),
                None => self.console("started"),
            },
            Err(e) => self.error(e.to_string()),
        }
        self.publish();
    }

    fn step_line(&mut self) {
        match self.session.step_line() {
            Ok(StepOutcome::LineChanged { .. }) => {}
            Ok(StepOutcome::Exited { code }) => {
                self.console(format!("program exited with code {code}"));
            }
            Ok(StepOutcome::Signaled { signal }) => {
                self.console(format!("program stopped: {}", signal_label(signal)));
            }
            Ok(StepOutcome::BudgetExhausted { steps }) => {
                self.console(format!("no new line after {steps} instructions"));
            }
            Err(e) => self.error(e.to_string()),
        }
        self.publish();
    }

    // ── Events ───────────────────────────────────────────────────────────────

    fn publish(&self) {
        self.send_state(StateEvent::SessionUpdated(SessionSnapshot::capture(
            &self.session,
        )));
    }

    fn send_state(&self, event: StateEvent) {
        // The window is gone once the receiver drops; nothing left to tell.
        let _ = self.events.send(DebuggerEvent::State(event));
    }

    fn console(&self, text: impl Into<String>) {
        let _ = self
            .events
            .send(DebuggerEvent::Ui(UiEvent::ConsoleOutput(text.into())));
    }

    fn error(&self, text: String) {
        warn!("{text}");
        let _ = self.events.send(DebuggerEvent::Ui(UiEvent::DebuggerError(text)));
    }
}

/// Worker thread body: blocks for commands, polls output between them.
pub fn run_loop(config: AppConfig, cmd_rx: Receiver<Command>, event_tx: Sender<DebuggerEvent>) {
    let poll_interval = config.poll_interval;
    let mut worker = Worker::native(&config, event_tx);

    if let Some(source) = config.initial_source.clone() {
        worker.handle(Command::Debug { source });
    }

    loop {
        match cmd_rx.recv_timeout(poll_interval) {
            Ok(command) => {
                if !worker.handle(command) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => worker.idle(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    worker.shutdown();
}
