//! Builds a C source into a debuggable executable next to it.
//!
//! The debugger itself never compiles anything; the shell calls this before
//! `Session::load` and shows the diagnostics when it fails.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::error::BuildError;

pub const DEFAULT_COMPILER: &str = "cc";

#[derive(Clone, Debug)]
pub struct Toolchain {
    pub compiler: String,
    pub flags: Vec<String>,
}

/// A successful build. `diagnostics` holds any warnings.
#[derive(Clone, Debug)]
pub struct Build {
    pub executable: PathBuf,
    pub command: String,
    pub diagnostics: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::new(DEFAULT_COMPILER)
    }
}

impl Toolchain {
    /// Debug info, no optimisation, fixed load address.
    pub fn new(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
            flags: vec!["-g".into(), "-O0".into(), "-no-pie".into()],
        }
    }

    pub fn build(&self, source: &Path) -> Result<Build, BuildError> {
        let executable = executable_for(source);
        let mut cmd = Command::new(&self.compiler);
        cmd.args(&self.flags).arg("-o").arg(&executable).arg(source);
        let command = format!(
            "{} {} -o {} {}",
            self.compiler,
            self.flags.join(" "),
            executable.display(),
            source.display()
        );

        info!("building: {command}");
        let output = cmd.output().map_err(|source| BuildError::Spawn {
            compiler: self.compiler.clone(),
            source,
        })?;

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() || !executable.is_file() {
            return Err(BuildError::Failed {
                status: output.status.to_string(),
                diagnostics,
            });
        }

        Ok(Build {
            executable,
            command,
            diagnostics,
        })
    }
}

/// `dir/prog.c` → `dir/prog`.
pub fn executable_for(source: &Path) -> PathBuf {
    source.with_extension("")
}

pub fn is_c_source(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "c")
}
