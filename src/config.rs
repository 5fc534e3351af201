use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::engine::{
    AddressLayout, DEFAULT_OUTPUT_CAPACITY, DEFAULT_RESOLVER, DEFAULT_STARTUP_BUDGET,
    DEFAULT_STEP_BUDGET, SessionConfig,
};
use crate::toolchain::{DEFAULT_COMPILER, Toolchain};

/// Single-step source debugger for small C programs.
#[derive(Parser, Debug, Clone)]
#[command(name = "stepdbg", version)]
pub struct Cli {
    /// C source to compile and open in the debugger right away
    pub source: Option<PathBuf>,

    /// Directory shown in the file browser (defaults to $HOME)
    #[arg(long, env = "STEPDBG_ROOT")]
    pub root: Option<PathBuf>,

    /// Instructions a line step may execute before giving up
    #[arg(long, env = "STEPDBG_STEP_BUDGET", default_value_t = DEFAULT_STEP_BUDGET)]
    pub step_budget: u64,

    /// Instructions allowed inside the dynamic loader before start fails
    #[arg(long, env = "STEPDBG_STARTUP_BUDGET", default_value_t = DEFAULT_STARTUP_BUDGET)]
    pub startup_budget: u64,

    /// Bytes of program output kept per run
    #[arg(long, env = "STEPDBG_OUTPUT_CAPACITY", default_value_t = DEFAULT_OUTPUT_CAPACITY)]
    pub output_capacity: usize,

    /// Address-to-line helper (addr2line compatible)
    #[arg(long, env = "STEPDBG_RESOLVER", default_value = DEFAULT_RESOLVER)]
    pub resolver: String,

    #[arg(long, env = "STEPDBG_RESOLVER_TIMEOUT_MS", default_value_t = 2000)]
    pub resolver_timeout_ms: u64,

    /// C compiler used to build the selected source
    #[arg(long, env = "STEPDBG_CC", default_value = DEFAULT_COMPILER)]
    pub cc: String,

    /// How often the worker drains program output while idle
    #[arg(long, env = "STEPDBG_POLL_INTERVAL_MS", default_value_t = 50)]
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub toolchain: Toolchain,
    pub root: PathBuf,
    pub initial_source: Option<PathBuf>,
    pub poll_interval: Duration,
}

impl Cli {
    pub fn into_config(self) -> AppConfig {
        let root = self
            .root
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        AppConfig {
            session: SessionConfig {
                step_budget: self.step_budget,
                startup_budget: self.startup_budget,
                output_capacity: self.output_capacity,
                resolver_program: self.resolver,
                resolver_timeout: Duration::from_millis(self.resolver_timeout_ms),
                layout: AddressLayout::default(),
            },
            toolchain: Toolchain::new(self.cc),
            root,
            initial_source: self.source,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            toolchain: Toolchain::default(),
            root: PathBuf::from("."),
            initial_source: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}
