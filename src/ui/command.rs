use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Command {
    // Program
    /// Build a C source, then load the result.
    Debug { source: PathBuf },
    Load { executable: PathBuf, source: PathBuf },

    // Execution
    Start,
    StepLine,
    Stop,

    Quit,
}
