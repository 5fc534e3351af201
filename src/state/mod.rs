mod debugger_state;

pub use debugger_state::{
    BuildLog,
    // Events
    DebuggerEvent,
    // Core state
    DebuggerState,
    PersistentState,
    ProgramState,
    SessionSnapshot,
    StateEvent,
    UiEvent,
};
