//! Line resolver channel: one long-lived `addr2line -f -e <exe>` co-process.
//!
//! Each request writes the address as a hex literal and waits for two reply
//! lines (function name, `file:line`). Every wait is bounded by a timeout.
//! After a timeout the stream can no longer be trusted, so the channel is
//! marked broken and later calls fail immediately.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::backend::LineLookup;
use crate::error::DebugError;

pub const DEFAULT_RESOLVER: &str = "addr2line";
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(2);

const UNRESOLVED: &str = "??";

/// Raw reply for one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub function: String,
    pub location: String,
}

pub struct Addr2Line {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    timeout: Duration,
    broken: Option<String>,
    cache: HashMap<u64, Option<u32>>,
}

impl Addr2Line {
    pub fn spawn(program: &str, executable: &Path, timeout: Duration) -> Result<Self, DebugError> {
        let mut cmd = Command::new(program);
        cmd.arg("-f").arg("-e").arg(executable);
        Self::from_command(cmd, timeout).map_err(|e| DebugError::Load {
            path: executable.to_path_buf(),
            reason: format!("cannot start {program}: {e}"),
        })
    }

    fn from_command(mut cmd: Command, timeout: Duration) -> std::io::Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("resolver stdout not captured"))?;

        let (tx, responses) = mpsc::channel();
        let reader = thread::Builder::new()
            .name("line-resolver".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            child,
            stdin,
            responses,
            reader: Some(reader),
            timeout,
            broken: None,
            cache: HashMap::new(),
        })
    }

    /// One synchronous round trip.
    pub fn resolve(&mut self, addr: u64) -> Result<Resolution, DebugError> {
        if let Some(reason) = &self.broken {
            return Err(DebugError::ProtocolFailure(reason.clone()));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(DebugError::ProtocolFailure("channel closed".into()));
        };

        if let Err(e) = writeln!(stdin, "{addr:#x}").and_then(|_| stdin.flush()) {
            return Err(self.mark_broken(format!("write failed: {e}")));
        }

        let function = self.next_line()?;
        let location = self.next_line()?;
        Ok(Resolution { function, location })
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    fn next_line(&mut self) -> Result<String, DebugError> {
        match self.responses.recv_timeout(self.timeout) {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => {
                Err(self.mark_broken(format!("no reply within {:?}", self.timeout)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.mark_broken("helper exited".into())),
        }
    }

    fn mark_broken(&mut self, reason: String) -> DebugError {
        warn!("line resolver broken: {reason}");
        self.broken = Some(reason.clone());
        DebugError::ProtocolFailure(reason)
    }
}

impl LineLookup for Addr2Line {
    fn lookup(&mut self, addr: u64) -> Result<Option<u32>, DebugError> {
        if let Some(line) = self.cache.get(&addr) {
            return Ok(*line);
        }
        let resolution = self.resolve(addr)?;
        let line = parse_line_number(&resolution.location);
        debug!("{addr:#x} -> {} ({:?})", resolution.location, line);
        self.cache.insert(addr, line);
        Ok(line)
    }

    fn shutdown(&mut self) {
        // EOF on stdin is enough for addr2line; the kill covers a wedged helper.
        self.stdin.take();
        let _ = self.child.kill();
        if let Err(e) = self.child.wait() {
            warn!("reaping line resolver failed: {e}");
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.broken.get_or_insert_with(|| "channel closed".into());
    }
}

impl Drop for Addr2Line {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.shutdown();
        }
    }
}

/// Extracts the line from a `file:line` reply. `None` for the unresolved
/// marker, a missing or zero line, or anything unparsable.
pub fn parse_line_number(location: &str) -> Option<u32> {
    let (path, rest) = location.trim_end().rsplit_once(':')?;
    if path == UNRESOLVED {
        return None;
    }
    // addr2line may append " (discriminator N)".
    let digits: &str = {
        let rest = rest.trim_start();
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(line) => Some(line),
    }
}
