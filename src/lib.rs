//! Single-step source debugger for small C programs on x86-64 Linux.
//!
//! [`engine::Session`] drives a traced child one instruction at a time and
//! maps its instruction pointer back to source lines through an `addr2line`
//! co-process. Everything else here is the desktop shell around it.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("stepdbg traces x86-64 Linux processes only");

pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod state;
pub mod toolchain;
pub mod ui;
pub mod worker;
